//! Error to HTTP response mapping
use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::error;
use crate::MarketplaceError;

impl MarketplaceError {
    /// HTTP status for this error. Order rule failures are reported as 500 with
    /// their message so clients can show it as is.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::OrderNotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ProductNotFound(_)
            | Self::InsufficientStock { .. }
            | Self::ClickCollectUnavailable { .. }
            | Self::Storage(_)
            | Self::Messaging(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Messaging(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for MarketplaceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if matches!(self, Self::Storage(_) | Self::Messaging(_)) {
            error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "success": false, "error": self.public_message() }))).into_response()
    }
}

/// `Json` whose rejections use the same error body as everything else.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = MarketplaceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| MarketplaceError::validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_codes() {
        assert_eq!(MarketplaceError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(MarketplaceError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(MarketplaceError::ProductNotFound(Uuid::nil()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(MarketplaceError::Forbidden("no".into()).status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_storage_details_stay_internal() {
        let err = MarketplaceError::Storage("relation \"orders\" does not exist".into());
        assert_eq!(err.public_message(), "Internal server error");
        let stock = MarketplaceError::InsufficientStock { title: "Burnous".into(), requested: 5, available: 3 };
        assert_eq!(stock.public_message(), "Insufficient stock for Burnous: requested 5, available 3");
    }
}
