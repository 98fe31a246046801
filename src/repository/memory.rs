//! In-memory repository
//!
//! Units of work take an owned lock on the whole state, which serializes order
//! transactions the way row locks do in Postgres. Writes are staged and only
//! applied on commit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;
use crate::domain::aggregates::{Delivery, DeliveryAgent, Order, Product, Store, Variant, VariantListing};
use crate::repository::{CatalogRepository, DeliveryInsert, DeliveryRepository, OrderRepository, UnitOfWork};
use crate::{MarketplaceError, Result};

#[derive(Debug, Default)]
struct State {
    stores: HashMap<Uuid, Store>,
    products: HashMap<Uuid, Product>,
    variants: HashMap<Uuid, Variant>,
    orders: Vec<Order>,
    agents: Vec<DeliveryAgent>,
    deliveries: Vec<Delivery>,
}

impl State {
    fn listing(&self, variant_id: Uuid) -> Option<VariantListing> {
        let variant = self.variants.get(&variant_id)?;
        let product = self.products.get(&variant.product_id)?;
        let store = self.stores.get(&product.store_id)?;
        Some(VariantListing { variant: variant.clone(), product: product.clone(), store: store.clone() })
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
    delivery_outage: Arc<AtomicBool>,
}

impl InMemoryRepository {
    pub fn new() -> Self { Self::default() }

    pub async fn add_store(&self, store: Store) { self.state.lock().await.stores.insert(store.id, store); }
    pub async fn add_product(&self, product: Product) { self.state.lock().await.products.insert(product.id, product); }
    pub async fn add_variant(&self, variant: Variant) { self.state.lock().await.variants.insert(variant.id, variant); }
    pub async fn add_agent(&self, agent: DeliveryAgent) { self.state.lock().await.agents.push(agent); }

    pub async fn stock(&self, variant_id: Uuid) -> Option<u32> {
        self.state.lock().await.variants.get(&variant_id).map(|v| v.stock)
    }

    pub async fn orders(&self) -> Vec<Order> { self.state.lock().await.orders.clone() }
    pub async fn deliveries(&self) -> Vec<Delivery> { self.state.lock().await.deliveries.clone() }

    /// While set, every delivery insert fails with a storage error.
    pub fn set_delivery_outage(&self, down: bool) { self.delivery_outage.store(down, Ordering::SeqCst); }
}

struct MemoryUnitOfWork {
    state: OwnedMutexGuard<State>,
    orders: Vec<Order>,
    stock: HashMap<Uuid, u32>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_listing(&mut self, variant_id: Uuid) -> Result<Option<VariantListing>> {
        let mut listing = self.state.listing(variant_id);
        if let (Some(l), Some(staged)) = (listing.as_mut(), self.stock.get(&variant_id)) {
            l.variant.stock = *staged;
        }
        Ok(listing)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        if self.state.orders.iter().chain(&self.orders).any(|o| o.id == order.id) {
            return Err(MarketplaceError::Conflict(format!("order {} already exists", order.id)));
        }
        self.orders.push(order.clone());
        Ok(())
    }

    async fn decrement_stock(&mut self, variant_id: Uuid, quantity: u32) -> Result<bool> {
        let current = match self.stock.get(&variant_id) {
            Some(staged) => *staged,
            None => match self.state.variants.get(&variant_id) {
                Some(v) => v.stock,
                None => return Ok(false),
            },
        };
        if current < quantity { return Ok(false); }
        self.stock.insert(variant_id, current - quantity);
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork { mut state, orders, stock } = *self;
        for (variant_id, remaining) in stock {
            if let Some(v) = state.variants.get_mut(&variant_id) { v.stock = remaining; }
        }
        state.orders.extend(orders);
        Ok(())
    }
}

fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

#[async_trait]
impl OrderRepository for InMemoryRepository {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryUnitOfWork { state, orders: Vec::new(), stock: HashMap::new() }))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.iter().find(|o| o.id == order_id).cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(newest_first(state.orders.iter().filter(|o| o.user_id == user_id).cloned().collect()))
    }

    async fn orders_for_store(&self, store_id: Uuid) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(newest_first(state.orders.iter().filter(|o| o.items.iter().any(|i| i.store_id == store_id)).cloned().collect()))
    }
}

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    async fn find_stores(&self, ids: &[Uuid]) -> Result<Vec<Store>> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.stores.get(id).cloned()).collect())
    }

    async fn find_listings(&self, variant_ids: &[Uuid]) -> Result<Vec<VariantListing>> {
        let state = self.state.lock().await;
        Ok(variant_ids.iter().filter_map(|id| state.listing(*id)).collect())
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryRepository {
    async fn find_agent(&self, agent_id: Uuid) -> Result<Option<DeliveryAgent>> {
        Ok(self.state.lock().await.agents.iter().find(|a| a.id == agent_id).cloned())
    }

    async fn find_agent_by_user(&self, user_id: Uuid) -> Result<Option<DeliveryAgent>> {
        Ok(self.state.lock().await.agents.iter().find(|a| a.user_id == user_id).cloned())
    }

    async fn insert_delivery(&self, delivery: &Delivery) -> Result<DeliveryInsert> {
        if self.delivery_outage.load(Ordering::SeqCst) {
            return Err(MarketplaceError::Storage("deliveries table unavailable".into()));
        }
        let mut state = self.state.lock().await;
        if state.deliveries.iter().any(|d| d.order_id == delivery.order_id) { return Ok(DeliveryInsert::DuplicateOrder); }
        if state.deliveries.iter().any(|d| d.tracking_number == delivery.tracking_number) {
            return Ok(DeliveryInsert::DuplicateTrackingNumber);
        }
        state.deliveries.push(delivery.clone());
        Ok(DeliveryInsert::Inserted)
    }

    async fn find_delivery_for_order(&self, order_id: Uuid) -> Result<Option<Delivery>> {
        Ok(self.state.lock().await.deliveries.iter().find(|d| d.order_id == order_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::catalog::fixtures::store;
    use crate::domain::value_objects::Money;

    async fn seeded() -> (InMemoryRepository, Uuid) {
        let repo = InMemoryRepository::new();
        let s = store("Atlas", "Alger");
        let product = Product { id: Uuid::new_v4(), store_id: s.id, title: "Burnous".into(), price: Money::dzd(4200) };
        let variant = Variant { id: Uuid::new_v4(), product_id: product.id, size: None, color: None, stock: 5 };
        let variant_id = variant.id;
        repo.add_store(s).await;
        repo.add_product(product).await;
        repo.add_variant(variant).await;
        (repo, variant_id)
    }

    #[tokio::test]
    async fn test_uncommitted_work_is_discarded() {
        let (repo, variant_id) = seeded().await;
        {
            let mut uow = repo.begin().await.unwrap();
            assert!(uow.decrement_stock(variant_id, 2).await.unwrap());
            assert_eq!(uow.lock_listing(variant_id).await.unwrap().unwrap().variant.stock, 3);
        }
        assert_eq!(repo.stock(variant_id).await, Some(5));
    }

    #[tokio::test]
    async fn test_commit_applies_staged_stock() {
        let (repo, variant_id) = seeded().await;
        let mut uow = repo.begin().await.unwrap();
        assert!(uow.decrement_stock(variant_id, 5).await.unwrap());
        assert!(!uow.decrement_stock(variant_id, 1).await.unwrap());
        uow.commit().await.unwrap();
        assert_eq!(repo.stock(variant_id).await, Some(0));
    }
}
