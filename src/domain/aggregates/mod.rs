//! Aggregates module
pub mod catalog;
pub mod order;
pub mod cart;
pub mod delivery;

pub use catalog::{index_stores, Product, Store, StoreIndex, Variant, VariantListing};
pub use order::{DeliveryType, Order, OrderItem, OrderStatus, PaymentMethod, ShippingInfo, StoreSnapshot, UnknownVariant};
pub use cart::{group_by_store, Cart, CartLine};
pub use delivery::{Delivery, DeliveryAgent, DeliveryStatus};
