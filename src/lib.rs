//! OpenSASE Marketplace - multi-vendor order placement and fulfillment
//!
//! Buyers order from independent stores in a single checkout. This crate owns
//! the part of the platform where money and stock move:
//!
//! ## Features
//! - Cart limits and free-delivery progress for checkout review
//! - Delivery fee tiers by wilaya
//! - Atomic order placement (stock check, server-side pricing, stock decrement)
//! - Automatic delivery-agent assignment
//! - Cash-on-delivery payment breakdown per store
//! - Time-bounded order notifications

use thiserror::Error;
use uuid::Uuid;

pub mod api;
pub mod config;
pub mod domain;
pub mod repository;
pub mod services;

pub use config::AppConfig;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum MarketplaceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Too many requests, please try again later")]
    RateLimited,

    #[error("Product not found: variant {0}")]
    ProductNotFound(Uuid),

    #[error("Insufficient stock for {title}: requested {requested}, available {available}")]
    InsufficientStock { title: String, requested: u32, available: u32 },

    #[error("{store} does not offer click & collect")]
    ClickCollectUnavailable { store: String },

    #[error("Order not found")]
    OrderNotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Messaging error: {0}")]
    Messaging(String),
}

impl MarketplaceError {
    pub fn validation(message: impl Into<String>) -> Self { Self::Validation(message.into()) }

    /// Failures of the order's own business rules, as opposed to infrastructure.
    pub fn is_business_rule(&self) -> bool {
        matches!(self, Self::ProductNotFound(_) | Self::InsufficientStock { .. } | Self::ClickCollectUnavailable { .. })
    }
}

impl From<sqlx::Error> for MarketplaceError {
    fn from(err: sqlx::Error) -> Self { Self::Storage(err.to_string()) }
}

impl From<validator::ValidationErrors> for MarketplaceError {
    fn from(err: validator::ValidationErrors) -> Self { Self::Validation(err.to_string()) }
}

pub type Result<T> = std::result::Result<T, MarketplaceError>;
