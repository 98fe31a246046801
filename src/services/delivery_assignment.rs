//! Delivery assignment
//!
//! Runs after the order transaction has committed. A failure here never undoes
//! the order; the order simply waits for manual assignment.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use crate::domain::aggregates::{Delivery, DeliveryAgent, Order};
use crate::repository::{DeliveryInsert, DeliveryRepository};
use crate::{MarketplaceError, Result};

pub const MAX_TRACKING_ATTEMPTS: usize = 3;

/// Chooses who delivers an order.
#[async_trait]
pub trait AgentSelector: Send + Sync {
    async fn select(&self, order: &Order) -> Result<Option<DeliveryAgent>>;
}

/// Always picks the one agent configured for the platform, if it is active.
pub struct DesignatedAgentSelector {
    agents: Arc<dyn DeliveryRepository>,
    agent_user_id: Option<Uuid>,
}

impl DesignatedAgentSelector {
    pub fn new(agents: Arc<dyn DeliveryRepository>, agent_user_id: Option<Uuid>) -> Self { Self { agents, agent_user_id } }
}

#[async_trait]
impl AgentSelector for DesignatedAgentSelector {
    async fn select(&self, _order: &Order) -> Result<Option<DeliveryAgent>> {
        let Some(user_id) = self.agent_user_id else { return Ok(None) };
        Ok(self.agents.find_agent_by_user(user_id).await?.filter(|a| a.is_active))
    }
}

#[derive(Clone)]
pub struct DeliveryAssignmentService {
    deliveries: Arc<dyn DeliveryRepository>,
    selector: Arc<dyn AgentSelector>,
}

impl DeliveryAssignmentService {
    pub fn new(deliveries: Arc<dyn DeliveryRepository>, selector: Arc<dyn AgentSelector>) -> Self { Self { deliveries, selector } }

    /// Creates the delivery for a home-delivery order. Click & collect orders,
    /// a missing agent and storage failures all yield `None`.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn assign_if_applicable(&self, order: &Order) -> Option<Delivery> {
        if !order.is_delivery() { return None; }
        match self.assign(order).await {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(error = %e, "Delivery assignment failed, order left for manual assignment");
                None
            }
        }
    }

    async fn assign(&self, order: &Order) -> Result<Option<Delivery>> {
        let Some(agent) = self.selector.select(order).await? else {
            info!("No active delivery agent available, order left for manual assignment");
            return Ok(None);
        };

        let mut delivery = Delivery::for_order(order, &agent, Utc::now());
        for attempt in 1..=MAX_TRACKING_ATTEMPTS {
            match self.deliveries.insert_delivery(&delivery).await? {
                DeliveryInsert::Inserted => {
                    info!(delivery_id = %delivery.id, agent_id = %agent.id, tracking_number = %delivery.tracking_number, cod_amount = %delivery.cod_amount, "Delivery assigned");
                    return Ok(Some(delivery));
                }
                DeliveryInsert::DuplicateOrder => {
                    warn!("Order already has a delivery");
                    return self.deliveries.find_delivery_for_order(order.id).await;
                }
                DeliveryInsert::DuplicateTrackingNumber => {
                    debug!(attempt, tracking_number = %delivery.tracking_number, "Tracking number taken, regenerating");
                    delivery.regenerate_tracking_number();
                }
            }
        }
        Err(MarketplaceError::Conflict(format!("no unique tracking number after {} attempts", MAX_TRACKING_ATTEMPTS)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{DeliveryStatus, DeliveryType, OrderStatus, PaymentMethod};
    use crate::domain::value_objects::Money;
    use crate::repository::InMemoryRepository;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn order(delivery_type: DeliveryType) -> Order {
        Order {
            id: Uuid::new_v4(), user_id: Uuid::new_v4(), status: OrderStatus::Pending, total: Money::dzd(8900),
            delivery_fee: Money::dzd(500), payment_method: PaymentMethod::Cod, delivery_type, store: None,
            shipping: None, delivery_latitude: None, delivery_longitude: None, items: vec![], created_at: Utc::now(),
        }
    }

    async fn with_agent(active: bool) -> (InMemoryRepository, DeliveryAgent) {
        let repo = InMemoryRepository::new();
        let agent = DeliveryAgent { id: Uuid::new_v4(), user_id: Uuid::new_v4(), is_active: active };
        repo.add_agent(agent.clone()).await;
        (repo, agent)
    }

    fn service(repo: &InMemoryRepository, agent_user_id: Option<Uuid>) -> DeliveryAssignmentService {
        let repo: Arc<dyn DeliveryRepository> = Arc::new(repo.clone());
        DeliveryAssignmentService::new(repo.clone(), Arc::new(DesignatedAgentSelector::new(repo, agent_user_id)))
    }

    #[tokio::test]
    async fn test_assigns_delivery_orders() {
        let (repo, agent) = with_agent(true).await;
        let o = order(DeliveryType::Delivery);
        let delivery = service(&repo, Some(agent.user_id)).assign_if_applicable(&o).await.unwrap();
        assert_eq!(delivery.agent_id, agent.id);
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.cod_amount, Money::dzd(8900));
        assert!(delivery.tracking_number.as_str().starts_with("TRK-"));
        assert_eq!(repo.deliveries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_skips_click_collect_and_missing_agents() {
        let (repo, agent) = with_agent(true).await;
        assert!(service(&repo, Some(agent.user_id)).assign_if_applicable(&order(DeliveryType::ClickCollect)).await.is_none());
        assert!(service(&repo, None).assign_if_applicable(&order(DeliveryType::Delivery)).await.is_none());
        assert!(service(&repo, Some(Uuid::new_v4())).assign_if_applicable(&order(DeliveryType::Delivery)).await.is_none());

        let (idle_repo, idle) = with_agent(false).await;
        assert!(service(&idle_repo, Some(idle.user_id)).assign_if_applicable(&order(DeliveryType::Delivery)).await.is_none());
        assert!(repo.deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_is_swallowed() {
        let (repo, agent) = with_agent(true).await;
        repo.set_delivery_outage(true);
        assert!(service(&repo, Some(agent.user_id)).assign_if_applicable(&order(DeliveryType::Delivery)).await.is_none());
    }

    #[tokio::test]
    async fn test_second_assignment_returns_existing_delivery() {
        let (repo, agent) = with_agent(true).await;
        let svc = service(&repo, Some(agent.user_id));
        let o = order(DeliveryType::Delivery);
        let first = svc.assign_if_applicable(&o).await.unwrap();
        let second = svc.assign_if_applicable(&o).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(repo.deliveries().await.len(), 1);
    }

    /// Reports a tracking number clash for the first `clashes` inserts.
    struct Clashing { clashes: usize, calls: AtomicUsize, inner: InMemoryRepository }

    #[async_trait]
    impl DeliveryRepository for Clashing {
        async fn find_agent(&self, id: Uuid) -> Result<Option<DeliveryAgent>> { self.inner.find_agent(id).await }
        async fn find_agent_by_user(&self, id: Uuid) -> Result<Option<DeliveryAgent>> { self.inner.find_agent_by_user(id).await }
        async fn insert_delivery(&self, delivery: &Delivery) -> Result<DeliveryInsert> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.clashes { return Ok(DeliveryInsert::DuplicateTrackingNumber); }
            self.inner.insert_delivery(delivery).await
        }
        async fn find_delivery_for_order(&self, id: Uuid) -> Result<Option<Delivery>> { self.inner.find_delivery_for_order(id).await }
    }

    #[tokio::test]
    async fn test_tracking_number_collisions_retry() {
        let (repo, agent) = with_agent(true).await;
        let assign = |clashes| {
            let deliveries: Arc<dyn DeliveryRepository> = Arc::new(Clashing { clashes, calls: AtomicUsize::new(0), inner: repo.clone() });
            DeliveryAssignmentService::new(deliveries.clone(), Arc::new(DesignatedAgentSelector::new(deliveries, Some(agent.user_id))))
        };
        assert!(assign(2).assign_if_applicable(&order(DeliveryType::Delivery)).await.is_some());
        assert!(assign(3).assign_if_applicable(&order(DeliveryType::Delivery)).await.is_none());
    }
}
