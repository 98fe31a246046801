//! Persistence interfaces
//!
//! Services receive these as trait objects. `postgres` is the production
//! implementation, `memory` backs the tests and local demos.

use async_trait::async_trait;
use uuid::Uuid;
use crate::domain::aggregates::{Delivery, DeliveryAgent, Order, Store, VariantListing};
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PgRepository;

/// One order transaction. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Loads the variant with its product and store and holds it until the unit of
    /// work ends, so nobody else can change its stock in between.
    async fn lock_listing(&mut self, variant_id: Uuid) -> Result<Option<VariantListing>>;

    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Takes `quantity` off the variant's stock. Returns `false`, changing nothing,
    /// when less than `quantity` is left.
    async fn decrement_stock(&mut self, variant_id: Uuid, quantity: u32) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>>;
    /// Newest first.
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>>;
    /// Orders with at least one item sold by `store_id`, newest first.
    async fn orders_for_store(&self, store_id: Uuid) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Stores among `ids` that exist; unknown ids are skipped.
    async fn find_stores(&self, ids: &[Uuid]) -> Result<Vec<Store>>;
    async fn find_listings(&self, variant_ids: &[Uuid]) -> Result<Vec<VariantListing>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryInsert { Inserted, DuplicateOrder, DuplicateTrackingNumber }

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn find_agent(&self, agent_id: Uuid) -> Result<Option<DeliveryAgent>>;
    async fn find_agent_by_user(&self, user_id: Uuid) -> Result<Option<DeliveryAgent>>;
    async fn insert_delivery(&self, delivery: &Delivery) -> Result<DeliveryInsert>;
    async fn find_delivery_for_order(&self, order_id: Uuid) -> Result<Option<Delivery>>;
}
