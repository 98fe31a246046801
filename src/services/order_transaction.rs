//! Order transaction
//!
//! Turns a submitted cart into a committed order: everything the buyer sent
//! except variant ids and quantities is ignored, prices and stores are re-read
//! under lock, and the order, its items and the stock decrements commit together
//! or not at all.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use crate::domain::aggregates::{
    index_stores, CartLine, DeliveryType, Order, OrderItem, OrderStatus, PaymentMethod, ShippingInfo, StoreSnapshot,
    VariantListing,
};
use crate::domain::value_objects::{Money, PhoneNumber, Wilaya};
use crate::repository::{OrderRepository, UnitOfWork};
use crate::services::delivery_fee::DeliveryFeeCalculator;
use crate::services::Identity;
use crate::{MarketplaceError, Result};

/// Largest quantity a single cart line may ask for.
pub const MAX_LINE_QUANTITY: u32 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestedLine { pub variant_id: Uuid, pub quantity: u32 }

/// Shipping fields as submitted; all optional until validated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShippingDetails {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub wilaya: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlaceOrder {
    pub user_id: Uuid,
    pub cart: Vec<RequestedLine>,
    pub delivery_type: DeliveryType,
    pub payment_method: PaymentMethod,
    pub shipping: ShippingDetails,
    pub delivery_latitude: Option<f64>,
    pub delivery_longitude: Option<f64>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ShippingDetails {
    /// Complete, well-formed shipping info, as required for home delivery.
    pub fn validate(&self) -> Result<ShippingInfo> {
        let fields = [("name", &self.name), ("phone", &self.phone), ("address", &self.address), ("wilaya", &self.wilaya), ("city", &self.city)];
        let missing: Vec<&str> = fields.iter().filter(|(_, v)| present(v).is_none()).map(|(k, _)| *k).collect();
        if !missing.is_empty() {
            return Err(MarketplaceError::validation(format!("Missing shipping information: {}", missing.join(", "))));
        }
        let field = |v: &Option<String>| present(v).unwrap_or_default().to_string();
        let phone = PhoneNumber::parse(&field(&self.phone)).map_err(|e| MarketplaceError::validation(e.to_string()))?;
        let wilaya = field(&self.wilaya).parse::<Wilaya>().map_err(|e| MarketplaceError::validation(e.to_string()))?;
        Ok(ShippingInfo { name: field(&self.name), phone, address: field(&self.address), city: field(&self.city), wilaya })
    }
}

#[derive(Clone)]
pub struct OrderTransactionService {
    orders: Arc<dyn OrderRepository>,
    fees: DeliveryFeeCalculator,
}

impl OrderTransactionService {
    pub fn new(orders: Arc<dyn OrderRepository>, fees: DeliveryFeeCalculator) -> Self { Self { orders, fees } }

    /// Checks everything that can be checked without touching storage.
    fn preflight(&self, identity: &Identity, request: &PlaceOrder) -> Result<Option<ShippingInfo>> {
        if request.user_id != identity.user_id {
            return Err(MarketplaceError::Forbidden("You can only place orders for your own account".into()));
        }
        if request.cart.is_empty() {
            return Err(MarketplaceError::validation("Cart is empty"));
        }
        if let Some(line) = request.cart.iter().find(|l| l.quantity == 0) {
            return Err(MarketplaceError::validation(format!("Quantity for variant {} must be at least 1", line.variant_id)));
        }
        if let Some(line) = request.cart.iter().find(|l| l.quantity > MAX_LINE_QUANTITY) {
            return Err(MarketplaceError::validation(format!(
                "Quantity for variant {} must be at most {}",
                line.variant_id, MAX_LINE_QUANTITY
            )));
        }
        let latitude_ok = request.delivery_latitude.map_or(true, |lat| (-90.0..=90.0).contains(&lat));
        let longitude_ok = request.delivery_longitude.map_or(true, |lng| (-180.0..=180.0).contains(&lng));
        if !(latitude_ok && longitude_ok) {
            return Err(MarketplaceError::validation("Invalid delivery coordinates"));
        }
        match request.delivery_type {
            DeliveryType::Delivery => request.shipping.validate().map(Some),
            DeliveryType::ClickCollect => Ok(None),
        }
    }

    #[instrument(skip(self, identity, request), fields(user_id = %request.user_id, lines = request.cart.len(), delivery_type = %request.delivery_type))]
    pub async fn place_order(&self, identity: &Identity, request: PlaceOrder) -> Result<Order> {
        let shipping = self.preflight(identity, &request)?;

        let uow = self.orders.begin().await?;
        match self.run(uow, request, shipping).await {
            Ok(order) => {
                info!(order_id = %order.id, total = %order.total, delivery_fee = %order.delivery_fee, "Order placed");
                Ok(order)
            }
            Err(e) => {
                if e.is_business_rule() { warn!(error = %e, "Order rejected") } else { warn!(error = %e, "Order transaction failed") }
                Err(e)
            }
        }
    }

    async fn run(&self, mut uow: Box<dyn UnitOfWork>, request: PlaceOrder, shipping: Option<ShippingInfo>) -> Result<Order> {
        // Total demand per variant; one variant may appear on several lines.
        let mut demand: HashMap<Uuid, u32> = HashMap::new();
        for line in &request.cart {
            let total = demand.entry(line.variant_id).or_default();
            *total = total
                .checked_add(line.quantity)
                .ok_or_else(|| MarketplaceError::validation(format!("Quantity for variant {} is too large", line.variant_id)))?;
        }
        let mut variant_ids: Vec<Uuid> = demand.keys().copied().collect();
        variant_ids.sort();

        let mut listings: HashMap<Uuid, VariantListing> = HashMap::new();
        for variant_id in variant_ids.iter().copied() {
            let listing = uow.lock_listing(variant_id).await?.ok_or(MarketplaceError::ProductNotFound(variant_id))?;
            let requested = demand[&variant_id];
            if !listing.variant.can_fulfil(requested) {
                return Err(MarketplaceError::InsufficientStock { title: listing.display_title(), requested, available: listing.variant.stock });
            }
            listings.insert(variant_id, listing);
        }

        let priced: Vec<(&VariantListing, u32)> = request.cart.iter().map(|l| (&listings[&l.variant_id], l.quantity)).collect();

        if request.delivery_type == DeliveryType::ClickCollect {
            if let Some((listing, _)) = priced.iter().find(|(l, _)| !l.store.click_collect) {
                return Err(MarketplaceError::ClickCollectUnavailable { store: listing.store.name.clone() });
            }
        }

        let lines: Vec<CartLine> = priced.iter().map(|(l, quantity)| CartLine {
            product_id: l.product.id,
            variant_id: l.variant.id,
            title: l.display_title(),
            unit_price: l.product.price,
            quantity: *quantity,
            store_id: l.store.id,
        }).collect();

        let delivery_fee = match &shipping {
            Some(info) => {
                let stores = index_stores(priced.iter().map(|(l, _)| l.store.clone()));
                self.fees.compute(&lines, &stores, info.wilaya).total_fee
            }
            None => Money::ZERO,
        };

        let order_id = Uuid::now_v7();
        let items: Vec<OrderItem> = lines.iter().map(|l| OrderItem {
            id: Uuid::now_v7(),
            order_id,
            variant_id: l.variant_id,
            product_id: l.product_id,
            store_id: l.store_id,
            title: l.title.clone(),
            quantity: l.quantity,
            price: l.unit_price,
        }).collect();
        let subtotal: Money = items.iter().map(OrderItem::line_total).sum();
        let first_store = &priced[0].0.store;

        let order = Order {
            id: order_id,
            user_id: request.user_id,
            status: OrderStatus::Pending,
            total: subtotal + delivery_fee,
            delivery_fee,
            payment_method: request.payment_method,
            delivery_type: request.delivery_type,
            store: Some(StoreSnapshot {
                id: first_store.id, name: first_store.name.clone(), address: first_store.address.clone(), city: first_store.city.clone(),
            }),
            shipping,
            delivery_latitude: request.delivery_latitude,
            delivery_longitude: request.delivery_longitude,
            items,
            created_at: Utc::now(),
        };

        uow.insert_order(&order).await?;

        for variant_id in variant_ids {
            let requested = demand[&variant_id];
            if !uow.decrement_stock(variant_id, requested).await? {
                let listing = &listings[&variant_id];
                return Err(MarketplaceError::InsufficientStock { title: listing.display_title(), requested, available: listing.variant.stock });
            }
        }

        uow.commit().await?;
        Ok(order)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::domain::aggregates::catalog::fixtures::store;
    use crate::domain::aggregates::{Product, Store, Variant};
    use crate::repository::InMemoryRepository;

    pub async fn stock_variant(repo: &InMemoryRepository, store: &Store, title: &str, price: i64, stock: u32) -> Uuid {
        let product = Product { id: Uuid::new_v4(), store_id: store.id, title: title.into(), price: Money::dzd(price) };
        let variant = Variant { id: Uuid::new_v4(), product_id: product.id, size: None, color: None, stock };
        let id = variant.id;
        repo.add_product(product).await;
        repo.add_variant(variant).await;
        id
    }

    pub async fn open_store(repo: &InMemoryRepository, name: &str, wilaya: &str) -> Store {
        let s = store(name, wilaya);
        repo.add_store(s.clone()).await;
        s
    }

    pub fn shipping_to(wilaya: &str) -> ShippingDetails {
        ShippingDetails {
            name: Some("Amina B.".into()), phone: Some("0555123456".into()), address: Some("12 rue Didouche Mourad".into()),
            city: Some("Alger Centre".into()), wilaya: Some(wilaya.into()),
        }
    }

    pub fn delivery_request(user_id: Uuid, cart: Vec<RequestedLine>, wilaya: &str) -> PlaceOrder {
        PlaceOrder {
            user_id, cart, delivery_type: DeliveryType::Delivery, payment_method: PaymentMethod::Cod,
            shipping: shipping_to(wilaya), delivery_latitude: Some(36.75), delivery_longitude: Some(3.05),
        }
    }

    pub fn line(variant_id: Uuid, quantity: u32) -> RequestedLine { RequestedLine { variant_id, quantity } }
}
