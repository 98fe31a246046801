//! Cart review endpoints used before checkout
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::error::ApiJson;
use crate::api::orders::CartItemRequest;
use crate::api::AppState;
use crate::domain::value_objects::Wilaya;
use crate::services::RequestedLine;
use crate::{MarketplaceError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartReviewRequest {
    pub cart: Vec<CartItemRequest>,
    /// Destination, when the buyer has already chosen one.
    pub wilaya: Option<String>,
}

impl CartReviewRequest {
    fn lines(&self) -> Vec<RequestedLine> {
        self.cart.iter().map(|l| RequestedLine { variant_id: l.variant_id, quantity: l.quantity }).collect()
    }
}

pub async fn validate_cart(State(state): State<AppState>, ApiJson(body): ApiJson<CartReviewRequest>) -> Result<Json<Value>> {
    let violation = state.checkout.validate_cart(&body.lines()).await?;
    Ok(Json(json!({ "success": true, "valid": violation.is_none(), "violation": violation })))
}

pub async fn quote(State(state): State<AppState>, ApiJson(body): ApiJson<CartReviewRequest>) -> Result<Json<Value>> {
    let destination = match body.wilaya.as_deref().map(str::trim).filter(|w| !w.is_empty()) {
        Some(raw) => Some(raw.parse::<Wilaya>().map_err(|e| MarketplaceError::validation(e.to_string()))?),
        None => None,
    };
    let quote = state.checkout.quote(&body.lines(), destination).await?;
    Ok(Json(json!({ "success": true, "quote": quote })))
}
