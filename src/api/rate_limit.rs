//! Request rate limiting for order placement
//!
//! Fixed window per client address. When the limiter itself fails the request
//! is let through or rejected according to [`RateLimitFailurePolicy`].

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;
use crate::api::AppState;
use crate::config::RateLimitFailurePolicy;
use crate::MarketplaceError;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limiter backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counts one request for `key` and says whether it may proceed.
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError>;
}

#[derive(Debug)]
struct Window { count: u32, started: Instant }

pub struct InMemoryRateLimiter {
    windows: DashMap<String, Window>,
    limit: u32,
    window: Duration,
}

impl InMemoryRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self { Self { windows: DashMap::new(), limit, window } }

    /// Drops windows that have already run out.
    pub fn purge_expired(&self) {
        let window = self.window;
        self.windows.retain(|_, w| w.started.elapsed() < window);
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window { count: 0, started: now });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { count: 0, started: now };
        }
        let reset_after = self.window.saturating_sub(now.duration_since(entry.started));
        if entry.count >= self.limit {
            return Ok(RateLimitDecision { allowed: false, limit: self.limit, remaining: 0, reset_after });
        }
        entry.count += 1;
        Ok(RateLimitDecision { allowed: true, limit: self.limit, remaining: self.limit - entry.count, reset_after })
    }
}

/// Client address as reported by the proxy in front of us.
pub fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = || headers.get("x-real-ip").and_then(|v| v.to_str().ok()).map(str::trim).filter(|ip| !ip.is_empty());
    format!("ip:{}", forwarded.or_else(real_ip).unwrap_or("unknown"))
}

fn with_headers(mut response: Response, decision: &RateLimitDecision) -> Response {
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_after.as_secs()));
    response
}

pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = client_key(request.headers());
    match state.rate_limiter.check(&key).await {
        Ok(decision) if decision.allowed => with_headers(next.run(request).await, &decision),
        Ok(decision) => {
            warn!(key = %key, "Rate limit exceeded");
            with_headers(MarketplaceError::RateLimited.into_response(), &decision)
        }
        Err(e) => match state.rate_limit_policy {
            RateLimitFailurePolicy::FailOpen => {
                warn!(key = %key, error = %e, "Rate limiter error, letting request through");
                next.run(request).await
            }
            RateLimitFailurePolicy::FailClosed => {
                warn!(key = %key, error = %e, "Rate limiter error, rejecting request");
                MarketplaceError::RateLimited.into_response()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_window() {
        let limiter = InMemoryRateLimiter::new(2, Duration::from_secs(60));
        assert_eq!(limiter.check("ip:1").await.unwrap().remaining, 1);
        assert!(limiter.check("ip:1").await.unwrap().allowed);
        assert!(!limiter.check("ip:1").await.unwrap().allowed);
        assert!(limiter.check("ip:2").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = InMemoryRateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.check("ip:1").await.unwrap().allowed);
        assert!(!limiter.check("ip:1").await.unwrap().allowed);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check("ip:1").await.unwrap().allowed);
        tokio::time::sleep(Duration::from_millis(80)).await;
        limiter.purge_expired();
        assert!(limiter.windows.is_empty());
    }

    #[test]
    fn test_client_key() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), "ip:unknown");
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_key(&headers), "ip:10.0.0.9");
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_key(&headers), "ip:203.0.113.7");
    }
}
