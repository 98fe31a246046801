//! Configuration
//!
//! Everything comes from the environment (a `.env` file is loaded first by
//! `main`). Only `DATABASE_URL` and `JWT_SECRET` are required.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::Money;
use crate::services::cart_limits::{CartLimits, MAX_ITEMS_PER_STORE, MAX_QUANTITY_PER_LINE, MAX_STORES_PER_CART};
use crate::services::checkout::CheckoutPolicy;
use crate::services::delivery_fee::{DeliveryFeeCalculator, FeeSchedule, DEFAULT_INTER_WILAYA_FEE, DEFAULT_INTRA_WILAYA_FEE};
use crate::services::free_delivery::{FreeDeliveryEngine, DEFAULT_NUDGE_WINDOW};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// What to do with a request when the rate limiter itself errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RateLimitFailurePolicy {
    /// Let the request through and log it.
    #[default]
    FailOpen,
    /// Reject the request as if the limit had been hit.
    FailClosed,
}

impl FromStr for RateLimitFailurePolicy {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-open" | "open" => Ok(Self::FailOpen),
            "fail-closed" | "closed" => Ok(Self::FailClosed),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitSettings {
    pub requests: u32,
    pub window: Duration,
    pub failure_policy: RateLimitFailurePolicy,
}

impl Default for RateLimitSettings {
    fn default() -> Self { Self { requests: 10, window: Duration::from_secs(60), failure_policy: RateLimitFailurePolicy::FailOpen } }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub admin_notification_address: Option<String>,
    pub default_delivery_agent_user_id: Option<Uuid>,
    pub jwt_secret: String,
    pub notification_timeout: Duration,
    pub rate_limit: RateLimitSettings,
    pub fee_schedule: FeeSchedule,
    pub free_delivery_nudge_window: Money,
    pub platform_commission_rate: Decimal,
    pub cart_limits: CartLimits,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary source of variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
            match raw {
                None => Ok(default),
                Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
            }
        }

        let money = |key: &'static str, default: i64| -> Result<Money, ConfigError> {
            let amount: Decimal = parse_or(key, get(key), Decimal::from(default))?;
            if amount.is_sign_negative() {
                return Err(ConfigError::Invalid { key, value: amount.to_string() });
            }
            Ok(Money::new(amount))
        };

        let commission: Decimal = parse_or("PLATFORM_COMMISSION_RATE", get("PLATFORM_COMMISSION_RATE"), Decimal::ZERO)?;
        if commission.is_sign_negative() || commission > Decimal::ONE {
            return Err(ConfigError::Invalid { key: "PLATFORM_COMMISSION_RATE", value: commission.to_string() });
        }

        let default_agent = match get("DEFAULT_DELIVERY_AGENT_USER_ID") {
            None => None,
            Some(value) => Some(Uuid::parse_str(&value).map_err(|_| ConfigError::Invalid { key: "DEFAULT_DELIVERY_AGENT_USER_ID", value })?),
        };

        let defaults = RateLimitSettings::default();
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: parse_or("PORT", get("PORT"), 8083)?,
            nats_url: get("NATS_URL"),
            admin_notification_address: get("ADMIN_NOTIFICATION_ADDRESS"),
            default_delivery_agent_user_id: default_agent,
            jwt_secret: required("JWT_SECRET")?,
            notification_timeout: Duration::from_millis(parse_or("NOTIFICATION_TIMEOUT_MS", get("NOTIFICATION_TIMEOUT_MS"), 5000)?),
            rate_limit: RateLimitSettings {
                requests: parse_or("RATE_LIMIT_REQUESTS", get("RATE_LIMIT_REQUESTS"), defaults.requests)?,
                window: Duration::from_secs(parse_or("RATE_LIMIT_WINDOW_SECS", get("RATE_LIMIT_WINDOW_SECS"), defaults.window.as_secs())?),
                failure_policy: parse_or("RATE_LIMIT_FAILURE_POLICY", get("RATE_LIMIT_FAILURE_POLICY"), defaults.failure_policy)?,
            },
            fee_schedule: FeeSchedule {
                intra_wilaya: money("DELIVERY_FEE_INTRA", DEFAULT_INTRA_WILAYA_FEE)?,
                inter_wilaya: money("DELIVERY_FEE_INTER", DEFAULT_INTER_WILAYA_FEE)?,
            },
            free_delivery_nudge_window: money("FREE_DELIVERY_NUDGE_WINDOW", DEFAULT_NUDGE_WINDOW)?,
            platform_commission_rate: commission,
            cart_limits: CartLimits {
                max_quantity_per_line: parse_or("CART_MAX_QUANTITY_PER_LINE", get("CART_MAX_QUANTITY_PER_LINE"), MAX_QUANTITY_PER_LINE)?,
                max_stores: parse_or("CART_MAX_STORES", get("CART_MAX_STORES"), MAX_STORES_PER_CART)?,
                max_items_per_store: parse_or("CART_MAX_ITEMS_PER_STORE", get("CART_MAX_ITEMS_PER_STORE"), MAX_ITEMS_PER_STORE)?,
            },
        })
    }

    pub fn checkout_policy(&self) -> CheckoutPolicy {
        CheckoutPolicy {
            limits: self.cart_limits,
            fees: DeliveryFeeCalculator::new(self.fee_schedule),
            free_delivery: FreeDeliveryEngine::new(self.free_delivery_nudge_window),
            commission_rate: self.platform_commission_rate,
        }
    }
}
