//! HTTP surface
use axum::extract::FromRef;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use crate::config::{AppConfig, RateLimitFailurePolicy};
use crate::repository::{CatalogRepository, DeliveryRepository, OrderRepository};
use crate::services::{
    CheckoutService, DeliveryAssignmentService, DesignatedAgentSelector, Messenger, NotificationDispatcher,
    OrderTransactionService,
};

pub mod auth;
pub mod checkout;
pub mod error;
pub mod orders;
pub mod rate_limit;

use auth::Authenticator;
use rate_limit::RateLimiter;

/// Storage handles the API needs. Postgres and the in-memory repository both
/// provide all three.
#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub deliveries: Arc<dyn DeliveryRepository>,
}

impl Repositories {
    pub fn shared<R>(repo: R) -> Self
    where
        R: OrderRepository + CatalogRepository + DeliveryRepository + 'static,
    {
        let repo = Arc::new(repo);
        Self { orders: repo.clone(), catalog: repo.clone(), deliveries: repo }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub checkout: CheckoutService,
    pub orders: Arc<dyn OrderRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub authenticator: Arc<dyn Authenticator>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub rate_limit_policy: RateLimitFailurePolicy,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        repos: Repositories,
        messenger: Arc<dyn Messenger>,
        authenticator: Arc<dyn Authenticator>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let policy = config.checkout_policy();
        let selector = DesignatedAgentSelector::new(repos.deliveries.clone(), config.default_delivery_agent_user_id);
        let checkout = CheckoutService::new(
            repos.catalog.clone(),
            OrderTransactionService::new(repos.orders.clone(), policy.fees),
            DeliveryAssignmentService::new(repos.deliveries.clone(), Arc::new(selector)),
            NotificationDispatcher::new(messenger, config.admin_notification_address.clone(), config.notification_timeout),
            policy,
        );
        Self {
            checkout,
            orders: repos.orders,
            catalog: repos.catalog,
            deliveries: repos.deliveries,
            authenticator,
            rate_limiter,
            rate_limit_policy: config.rate_limit.failure_policy,
        }
    }
}

impl FromRef<AppState> for Arc<dyn Authenticator> {
    fn from_ref(state: &AppState) -> Self { state.authenticator.clone() }
}

pub fn router(state: AppState) -> Router {
    let limited = middleware::from_fn_with_state(state.clone(), rate_limit::enforce);
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-marketplace"})) }))
        .route("/orders", post(orders::place_order).layer(limited).get(orders::list_orders))
        .route("/orders/:id/payment-breakdown", get(orders::payment_breakdown))
        .route("/cart/validate", post(checkout::validate_cart))
        .route("/checkout/quote", post(checkout::quote))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
