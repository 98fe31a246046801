//! Caller identity
//!
//! Sessions are issued elsewhere; this side only verifies the credential and
//! turns it into an [`Identity`]. The token is read from the `auth_token` cookie
//! or an `Authorization: Bearer` header.

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use crate::services::Identity;
use crate::MarketplaceError;

pub const AUTH_COOKIE: &str = "auth_token";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingCredentials,
    #[error("Session expired")]
    Expired,
    #[error("Invalid credentials")]
    InvalidToken,
}

impl From<AuthError> for MarketplaceError {
    fn from(err: AuthError) -> Self { Self::Unauthorized(err.to_string()) }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 tokens signed with the shared platform secret.
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn issue(&self, user_id: Uuid, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims { sub: user_id, iat: now, exp: now + ttl.as_secs() as i64 };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|_| AuthError::InvalidToken)
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken,
        })?;
        Ok(Identity { user_id: data.claims.sub })
    }
}

/// Token from the session cookie, falling back to a bearer header.
pub fn credential(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == AUTH_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    Arc<dyn Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = MarketplaceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authenticator = <Arc<dyn Authenticator> as FromRef<S>>::from_ref(state);
        let token = credential(&parts.headers).ok_or(AuthError::MissingCredentials)?;
        Ok(authenticator.authenticate(&token).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_issue_and_verify() {
        let auth = JwtAuthenticator::new(b"test-secret");
        let user_id = Uuid::new_v4();
        let token = auth.issue(user_id, Duration::from_secs(60)).unwrap();
        assert_eq!(auth.authenticate(&token).await.unwrap(), Identity { user_id });

        let other = JwtAuthenticator::new(b"another-secret");
        assert_eq!(other.authenticate(&token).await.unwrap_err(), AuthError::InvalidToken);
        assert_eq!(auth.authenticate("garbage").await.unwrap_err(), AuthError::InvalidToken);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let auth = JwtAuthenticator::new(b"test-secret");
        let now = Utc::now().timestamp();
        let claims = Claims { sub: Uuid::new_v4(), iat: now - 7200, exp: now - 3600 };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();
        assert_eq!(auth.authenticate(&token).await.unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn test_credential_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(credential(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(credential(&headers).as_deref(), Some("abc.def"));

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth_token=xyz.123"));
        assert_eq!(credential(&headers).as_deref(), Some("xyz.123"));
    }
}
