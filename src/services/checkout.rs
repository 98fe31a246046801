//! Checkout pipeline
//!
//! Review (limits, fees, free-delivery hints) before the order, then the order
//! itself followed by its best-effort side effects.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;
use crate::domain::aggregates::{index_stores, Cart, CartLine, Delivery, Order, StoreIndex, VariantListing};
use crate::domain::value_objects::{Money, Wilaya};
use crate::repository::CatalogRepository;
use crate::services::cart_limits::{CartLimitViolation, CartLimits};
use crate::services::delivery_assignment::DeliveryAssignmentService;
use crate::services::delivery_fee::{DeliveryFeeCalculator, DeliveryQuote};
use crate::services::free_delivery::{FreeDeliveryEngine, FreeDeliveryStatus};
use crate::services::notifications::{DispatchReport, NotificationDispatcher, OrderPlacement};
use crate::services::order_transaction::{OrderTransactionService, PlaceOrder, RequestedLine};
use crate::services::payment_breakdown::{PaymentBreakdown, PaymentBreakdownCalculator};
use crate::services::Identity;
use crate::{MarketplaceError, Result};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutQuote {
    pub subtotal: Money,
    /// Absent until the buyer has picked a destination wilaya.
    pub delivery: Option<DeliveryQuote>,
    pub free_delivery: Vec<FreeDeliveryStatus>,
    pub incentives: Vec<FreeDeliveryStatus>,
    pub cart_violation: Option<CartLimitViolation>,
}

#[derive(Clone, Debug)]
pub struct PlacedOrder {
    pub order: Order,
    pub delivery: Option<Delivery>,
    pub notifications: DispatchReport,
}

#[derive(Clone)]
pub struct CheckoutService {
    catalog: Arc<dyn CatalogRepository>,
    transactions: OrderTransactionService,
    assignment: DeliveryAssignmentService,
    notifications: NotificationDispatcher,
    limits: CartLimits,
    fees: DeliveryFeeCalculator,
    free_delivery: FreeDeliveryEngine,
    payments: PaymentBreakdownCalculator,
}

/// Pricing and policy knobs shared by review and placement.
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckoutPolicy {
    pub limits: CartLimits,
    pub fees: DeliveryFeeCalculator,
    pub free_delivery: FreeDeliveryEngine,
    pub commission_rate: Decimal,
}

impl CheckoutService {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        transactions: OrderTransactionService,
        assignment: DeliveryAssignmentService,
        notifications: NotificationDispatcher,
        policy: CheckoutPolicy,
    ) -> Self {
        Self {
            catalog,
            transactions,
            assignment,
            notifications,
            limits: policy.limits,
            fees: policy.fees,
            free_delivery: policy.free_delivery,
            payments: PaymentBreakdownCalculator::new(policy.commission_rate),
        }
    }

    /// Cart priced from the catalog, plus the stores its lines belong to.
    async fn price_cart(&self, requested: &[RequestedLine]) -> Result<(Cart, StoreIndex)> {
        let mut ids: Vec<Uuid> = requested.iter().map(|l| l.variant_id).collect();
        ids.sort();
        ids.dedup();
        let listings: HashMap<Uuid, VariantListing> =
            self.catalog.find_listings(&ids).await?.into_iter().map(|l| (l.variant.id, l)).collect();

        let mut lines = Vec::with_capacity(requested.len());
        for line in requested {
            let listing = listings.get(&line.variant_id).ok_or(MarketplaceError::ProductNotFound(line.variant_id))?;
            lines.push(CartLine {
                product_id: listing.product.id,
                variant_id: listing.variant.id,
                title: listing.display_title(),
                unit_price: listing.product.price,
                quantity: line.quantity,
                store_id: listing.store.id,
            });
        }
        let stores = index_stores(listings.into_values().map(|l| l.store));
        Ok((Cart::from_lines(lines), stores))
    }

    pub async fn validate_cart(&self, requested: &[RequestedLine]) -> Result<Option<CartLimitViolation>> {
        let (cart, stores) = self.price_cart(requested).await?;
        Ok(self.limits.validate(cart.lines(), |id| stores.get(id).map(|s| s.name.clone())))
    }

    /// Advisory numbers for the review page. The order transaction recomputes the fee.
    #[instrument(skip(self, requested), fields(lines = requested.len()))]
    pub async fn quote(&self, requested: &[RequestedLine], destination: Option<Wilaya>) -> Result<CheckoutQuote> {
        let (cart, stores) = self.price_cart(requested).await?;
        let lines = cart.lines();
        let free_delivery = self.free_delivery.compute_status(lines, &stores);
        let incentives = self.free_delivery.incentive_stores(&free_delivery).into_iter().cloned().collect();
        Ok(CheckoutQuote {
            subtotal: cart.subtotal(),
            delivery: destination.map(|d| self.fees.compute(lines, &stores, d)),
            free_delivery,
            incentives,
            cart_violation: self.limits.validate(lines, |id| stores.get(id).map(|s| s.name.clone())),
        })
    }

    /// Places the order, then assigns a delivery and notifies everyone involved.
    /// Once the order is committed this succeeds whatever the side effects do.
    #[instrument(skip(self, identity, request), fields(user_id = %identity.user_id))]
    pub async fn submit(&self, identity: &Identity, request: PlaceOrder) -> Result<PlacedOrder> {
        let order = self.transactions.place_order(identity, request).await?;
        let delivery = self.assignment.assign_if_applicable(&order).await;

        let stores = match self.catalog.find_stores(&order.store_ids()).await {
            Ok(stores) => index_stores(stores),
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Could not load stores for notifications");
                StoreIndex::new()
            }
        };
        let notifications = self
            .notifications
            .dispatch(OrderPlacement { order: &order, stores: &stores, delivery: delivery.as_ref() })
            .await;

        Ok(PlacedOrder { order, delivery, notifications })
    }

    pub async fn payment_breakdown(&self, order: &Order) -> Result<PaymentBreakdown> {
        let stores = index_stores(self.catalog.find_stores(&order.store_ids()).await?);
        Ok(self.payments.breakdown(order, &stores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::catalog::fixtures::with_free_delivery;
    use crate::domain::aggregates::{DeliveryAgent, DeliveryType};
    use crate::repository::InMemoryRepository;
    use crate::services::delivery_assignment::DesignatedAgentSelector;
    use crate::services::notifications::{LogMessenger, Messenger, Notification, DEFAULT_TIMEOUT};
    use async_trait::async_trait;
    use std::time::{Duration, Instant};
    use crate::services::order_transaction::fixtures::*;

    async fn checkout(repo: &InMemoryRepository, agent_user_id: Option<Uuid>) -> CheckoutService {
        checkout_with(repo, agent_user_id, Arc::new(LogMessenger), DEFAULT_TIMEOUT)
    }

    fn checkout_with(
        repo: &InMemoryRepository,
        agent_user_id: Option<Uuid>,
        messenger: Arc<dyn Messenger>,
        timeout: Duration,
    ) -> CheckoutService {
        let shared = Arc::new(repo.clone());
        CheckoutService::new(
            shared.clone(),
            OrderTransactionService::new(shared.clone(), DeliveryFeeCalculator::default()),
            DeliveryAssignmentService::new(shared.clone(), Arc::new(DesignatedAgentSelector::new(shared, agent_user_id))),
            NotificationDispatcher::new(messenger, Some("ops@opensase.dz".into()), timeout),
            CheckoutPolicy::default(),
        )
    }

    struct Stalled;

    #[async_trait]
    impl Messenger for Stalled {
        async fn send(&self, _notification: &Notification) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_submit_assigns_and_notifies() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo, "Atlas", "Alger").await;
        let a = stock_variant(&repo, &store, "Burnous", 4200, 10).await;
        let agent = DeliveryAgent { id: Uuid::new_v4(), user_id: Uuid::new_v4(), is_active: true };
        repo.add_agent(agent.clone()).await;
        let me = Identity { user_id: Uuid::new_v4() };

        let placed = checkout(&repo, Some(agent.user_id)).await
            .submit(&me, delivery_request(me.user_id, vec![line(a, 2)], "16"))
            .await
            .unwrap();

        assert_eq!(placed.order.total, Money::dzd(8900));
        let delivery = placed.delivery.unwrap();
        assert_eq!(delivery.cod_amount, Money::dzd(8900));
        assert_eq!(delivery.agent_id, agent.id);
        assert_eq!(placed.notifications.sent, 4);
        assert_eq!(repo.stock(a).await, Some(8));
    }

    #[tokio::test]
    async fn test_side_effect_failures_keep_the_order() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo, "Atlas", "Alger").await;
        let a = stock_variant(&repo, &store, "Burnous", 4200, 10).await;
        let agent = DeliveryAgent { id: Uuid::new_v4(), user_id: Uuid::new_v4(), is_active: true };
        repo.add_agent(agent.clone()).await;
        repo.set_delivery_outage(true);
        let me = Identity { user_id: Uuid::new_v4() };

        let placed = checkout(&repo, Some(agent.user_id)).await
            .submit(&me, delivery_request(me.user_id, vec![line(a, 1)], "Alger"))
            .await
            .unwrap();
        assert!(placed.delivery.is_none());
        assert_eq!(repo.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_slow_notifications_do_not_hold_the_order() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo, "Atlas", "Alger").await;
        let a = stock_variant(&repo, &store, "Burnous", 4200, 10).await;
        let agent = DeliveryAgent { id: Uuid::new_v4(), user_id: Uuid::new_v4(), is_active: true };
        repo.add_agent(agent.clone()).await;
        let me = Identity { user_id: Uuid::new_v4() };
        let svc = checkout_with(&repo, Some(agent.user_id), Arc::new(Stalled), Duration::from_millis(100));

        let started = Instant::now();
        let placed = svc.submit(&me, delivery_request(me.user_id, vec![line(a, 1)], "Alger")).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(placed.notifications.abandoned, 4);
        assert_eq!(placed.notifications.sent, 0);
        assert_eq!(repo.orders().await.len(), 1);
        assert_eq!(repo.stock(a).await, Some(9));
    }

    #[tokio::test]
    async fn test_quote() {
        let repo = InMemoryRepository::new();
        let near = with_free_delivery(open_store(&repo, "Atlas", "Alger").await, 10000);
        repo.add_store(near.clone()).await;
        let far = open_store(&repo, "Sahel", "Oran").await;
        let a = stock_variant(&repo, &near, "Burnous", 4200, 10).await;
        let b = stock_variant(&repo, &far, "Tapis", 9000, 10).await;
        let svc = checkout(&repo, None).await;

        let quote = svc.quote(&[line(a, 2), line(b, 1)], Some("Alger".parse().unwrap())).await.unwrap();
        assert_eq!(quote.subtotal, Money::dzd(17400));
        let delivery = quote.delivery.unwrap();
        assert_eq!(delivery.total_fee, Money::dzd(800));
        assert!(delivery.has_outside_destination_products);
        assert_eq!(quote.free_delivery.len(), 1);
        assert_eq!(quote.incentives.len(), 1);
        assert_eq!(quote.incentives[0].amount_to_free_delivery, Money::dzd(1600));
        assert!(quote.cart_violation.is_none());

        let no_destination = svc.quote(&[line(a, 1)], None).await.unwrap();
        assert!(no_destination.delivery.is_none());
    }

    #[tokio::test]
    async fn test_validate_cart_uses_store_names() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo, "Atlas", "Alger").await;
        let a = stock_variant(&repo, &store, "Burnous", 4200, 100).await;
        let b = stock_variant(&repo, &store, "Chechia", 1500, 100).await;
        let svc = checkout(&repo, None).await;

        assert!(svc.validate_cart(&[line(a, 10), line(b, 10)]).await.unwrap().is_none());
        let violation = svc.validate_cart(&[line(a, 10), line(b, 10), line(a, 1)]).await.unwrap().unwrap();
        assert_eq!(violation.store_name.as_deref(), Some("Atlas"));
        assert!(matches!(svc.validate_cart(&[line(Uuid::new_v4(), 1)]).await, Err(MarketplaceError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn test_breakdown_of_placed_orders_is_valid() {
        let repo = InMemoryRepository::new();
        let local = open_store(&repo, "Atlas", "Alger").await;
        let remote = open_store(&repo, "Sahel", "Oran").await;
        let a = stock_variant(&repo, &local, "Burnous", 4200, 10).await;
        let b = stock_variant(&repo, &remote, "Tapis", 9000, 10).await;
        let svc = checkout(&repo, None).await;
        let me = Identity { user_id: Uuid::new_v4() };

        for cart in [vec![line(a, 3)], vec![line(a, 1), line(b, 2)], vec![line(b, 1)]] {
            let placed = svc.submit(&me, delivery_request(me.user_id, cart, "Alger")).await.unwrap();
            let breakdown = svc.payment_breakdown(&placed.order).await.unwrap();
            assert!(breakdown.is_valid);
            assert_eq!(placed.order.delivery_type, DeliveryType::Delivery);
        }
    }
}
