//! Order notifications
//!
//! Fan-out after a successful placement: buyer, each seller, the admin inbox and
//! the assigned agent. Sends run concurrently and share one time budget; when it
//! runs out the stragglers are aborted and the order response goes out anyway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use crate::domain::aggregates::{Delivery, Order, StoreIndex};
use crate::domain::events::{DeliveryEvent, DomainEvent, OrderEvent};
use crate::{MarketplaceError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const SUBJECT_PREFIX: &str = "marketplace.notifications";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    Buyer { user_id: Uuid },
    /// `owner_id` is `None` when the store could not be loaded.
    Seller { store_id: Uuid, owner_id: Option<Uuid> },
    Admin { address: String },
    Agent { agent_id: Uuid },
}

impl Recipient {
    pub fn audience(&self) -> &'static str {
        match self {
            Self::Buyer { .. } => "buyer",
            Self::Seller { .. } => "seller",
            Self::Admin { .. } => "admin",
            Self::Agent { .. } => "agent",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient: Recipient,
    pub event: DomainEvent,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    fn new(recipient: Recipient, event: DomainEvent) -> Self {
        Self { id: Uuid::now_v7(), recipient, event, created_at: Utc::now() }
    }
}

/// Transport for notifications.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Publishes notifications as JSON on `marketplace.notifications.<audience>`.
pub struct NatsMessenger { client: async_nats::Client }

impl NatsMessenger {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

#[async_trait]
impl Messenger for NatsMessenger {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let subject = format!("{}.{}", SUBJECT_PREFIX, notification.recipient.audience());
        let payload = serde_json::to_vec(notification).map_err(|e| MarketplaceError::Messaging(e.to_string()))?;
        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| MarketplaceError::Messaging(e.to_string()))
    }
}

/// Used when no broker is configured.
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(notification_id = %notification.id, audience = notification.recipient.audience(), "Notification (log only)");
        Ok(())
    }
}

/// What just happened, as needed to address everyone involved.
pub struct OrderPlacement<'a> {
    pub order: &'a Order,
    pub stores: &'a StoreIndex,
    pub delivery: Option<&'a Delivery>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport { pub total: usize, pub sent: usize, pub failed: usize, pub abandoned: usize }

impl DispatchReport {
    fn record(&mut self, joined: std::result::Result<(&'static str, Result<()>), JoinError>) {
        match joined {
            Ok((_, Ok(()))) => self.sent += 1,
            Ok((audience, Err(e))) => {
                self.failed += 1;
                warn!(audience, error = %e, "Notification failed");
            }
            Err(e) => {
                self.failed += 1;
                warn!(error = %e, "Notification task died");
            }
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    messenger: Arc<dyn Messenger>,
    admin_address: Option<String>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(messenger: Arc<dyn Messenger>, admin_address: Option<String>, timeout: Duration) -> Self {
        Self { messenger, admin_address, timeout }
    }

    pub fn compose(&self, placement: &OrderPlacement<'_>) -> Vec<Notification> {
        let order = placement.order;
        let placed = DomainEvent::Order(OrderEvent::placed(order));
        let mut out = vec![Notification::new(Recipient::Buyer { user_id: order.user_id }, placed.clone())];

        for store_id in order.store_ids() {
            let owner_id = placement.stores.get(&store_id).map(|s| s.owner_id);
            if owner_id.is_none() {
                warn!(order_id = %order.id, store_id = %store_id, "Store missing for seller notification");
            }
            out.push(Notification::new(Recipient::Seller { store_id, owner_id }, DomainEvent::Order(OrderEvent::store_items(order, store_id))));
        }

        if let Some(address) = &self.admin_address {
            out.push(Notification::new(Recipient::Admin { address: address.clone() }, placed));
        }

        if let Some(delivery) = placement.delivery {
            let event = DeliveryEvent::Assigned {
                order_id: order.id,
                delivery_id: delivery.id,
                tracking_number: delivery.tracking_number.clone(),
                cod_amount: delivery.cod_amount,
                destination: order.shipping.as_ref().map(|s| format!("{}, {}, {}", s.address, s.city, s.wilaya)),
            };
            out.push(Notification::new(Recipient::Agent { agent_id: delivery.agent_id }, DomainEvent::Delivery(event)));
        }
        out
    }

    /// Sends every notification for `placement`, waiting at most the configured
    /// timeout. Never fails; the report says what happened.
    #[instrument(skip_all, fields(order_id = %placement.order.id))]
    pub async fn dispatch(&self, placement: OrderPlacement<'_>) -> DispatchReport {
        let notifications = self.compose(&placement);
        let mut report = DispatchReport { total: notifications.len(), ..Default::default() };

        let mut tasks = JoinSet::new();
        for notification in notifications {
            let messenger = self.messenger.clone();
            tasks.spawn(async move {
                let audience = notification.recipient.audience();
                (audience, messenger.send(&notification).await)
            });
        }

        let drained = tokio::time::timeout(self.timeout, async {
            while let Some(joined) = tasks.join_next().await {
                report.record(joined);
            }
        })
        .await;

        if drained.is_err() {
            report.abandoned = tasks.len();
            tasks.abort_all();
            warn!(abandoned = report.abandoned, timeout_ms = self.timeout.as_millis() as u64, "Notification budget exhausted");
        }

        info!(total = report.total, sent = report.sent, failed = report.failed, abandoned = report.abandoned, "Order notifications dispatched");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::catalog::fixtures::store;
    use crate::domain::aggregates::{index_stores, DeliveryAgent, DeliveryType, OrderItem, OrderStatus, PaymentMethod, Store};
    use crate::domain::value_objects::Money;
    use std::time::Instant;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording { sent: Mutex<Vec<Notification>> }

    #[async_trait]
    impl Messenger for Recording {
        async fn send(&self, notification: &Notification) -> Result<()> {
            self.sent.lock().await.push(notification.clone());
            Ok(())
        }
    }

    /// Fails sellers, answers everyone else after `delay`.
    struct Flaky { delay: Duration }

    #[async_trait]
    impl Messenger for Flaky {
        async fn send(&self, notification: &Notification) -> Result<()> {
            if let Recipient::Seller { .. } = notification.recipient {
                return Err(MarketplaceError::Messaging("seller inbox offline".into()));
            }
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    fn order(stores: &[&Store]) -> Order {
        let id = Uuid::new_v4();
        let items = stores.iter().map(|s| OrderItem {
            id: Uuid::new_v4(), order_id: id, variant_id: Uuid::new_v4(), product_id: Uuid::new_v4(),
            store_id: s.id, title: "Item".into(), quantity: 1, price: Money::dzd(1000),
        }).collect::<Vec<_>>();
        Order {
            id, user_id: Uuid::new_v4(), status: OrderStatus::Pending, total: Money::dzd(1000 * items.len() as i64),
            delivery_fee: Money::ZERO, payment_method: PaymentMethod::Cod, delivery_type: DeliveryType::Delivery, store: None,
            shipping: None, delivery_latitude: None, delivery_longitude: None, items, created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_everyone_is_notified() {
        let (a, b) = (store("Atlas", "Alger"), store("Sahel", "Oran"));
        let o = order(&[&a, &b]);
        let agent = DeliveryAgent { id: Uuid::new_v4(), user_id: Uuid::new_v4(), is_active: true };
        let delivery = Delivery::for_order(&o, &agent, Utc::now());
        let messenger = Arc::new(Recording::default());
        let dispatcher = NotificationDispatcher::new(messenger.clone(), Some("ops@opensase.dz".into()), DEFAULT_TIMEOUT);

        let stores = index_stores([a.clone(), b]);
        let report = dispatcher.dispatch(OrderPlacement { order: &o, stores: &stores, delivery: Some(&delivery) }).await;

        assert_eq!(report, DispatchReport { total: 5, sent: 5, failed: 0, abandoned: 0 });
        let sent = messenger.sent.lock().await;
        let mut audiences: Vec<&str> = sent.iter().map(|n| n.recipient.audience()).collect();
        audiences.sort();
        assert_eq!(audiences, vec!["admin", "agent", "buyer", "seller", "seller"]);
        assert!(sent.iter().any(|n| n.recipient == Recipient::Seller { store_id: a.id, owner_id: Some(a.owner_id) }));
    }

    #[tokio::test]
    async fn test_no_admin_or_agent_when_unset() {
        let a = store("Atlas", "Alger");
        let o = order(&[&a]);
        let dispatcher = NotificationDispatcher::new(Arc::new(Recording::default()), None, DEFAULT_TIMEOUT);
        let stores = StoreIndex::new();
        let notes = dispatcher.compose(&OrderPlacement { order: &o, stores: &stores, delivery: None });
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].recipient, Recipient::Seller { store_id: a.id, owner_id: None });
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let a = store("Atlas", "Alger");
        let o = order(&[&a]);
        let dispatcher = NotificationDispatcher::new(Arc::new(Flaky { delay: Duration::from_millis(1) }), Some("ops".into()), DEFAULT_TIMEOUT);
        let stores = index_stores([a]);
        let report = dispatcher.dispatch(OrderPlacement { order: &o, stores: &stores, delivery: None }).await;
        assert_eq!(report, DispatchReport { total: 3, sent: 2, failed: 1, abandoned: 0 });
    }

    #[tokio::test]
    async fn test_slow_notifications_are_abandoned() {
        let a = store("Atlas", "Alger");
        let o = order(&[&a]);
        let dispatcher = NotificationDispatcher::new(Arc::new(Flaky { delay: Duration::from_secs(30) }), None, Duration::from_millis(100));
        let stores = index_stores([a]);

        let started = Instant::now();
        let report = dispatcher.dispatch(OrderPlacement { order: &o, stores: &stores, delivery: None }).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report, DispatchReport { total: 2, sent: 0, failed: 1, abandoned: 1 });
    }
}
