//! Order placement and order read endpoints
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::{Validate, ValidationError};
use crate::api::error::ApiJson;
use crate::api::AppState;
use crate::domain::aggregates::{DeliveryType, Order, PaymentMethod};
use crate::domain::value_objects::TrackingNumber;
use crate::services::{Identity, PlaceOrder, RequestedLine, ShippingDetails};
use crate::{MarketplaceError, Result};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRequest {
    pub variant_id: Uuid,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: u32,
    /// Display only. Prices are always re-read from the catalog.
    pub price: Option<serde_json::Number>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, message = "Cart is empty"), custom = "valid_lines")]
    pub cart: Vec<CartItemRequest>,
    pub delivery_method: DeliveryType,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 255, message = "Address is too long"))]
    pub address: Option<String>,
    #[validate(length(max = 32, message = "Phone number is too long"))]
    pub phone: Option<String>,
    #[validate(length(max = 120, message = "Name is too long"))]
    pub name: Option<String>,
    #[validate(length(max = 64, message = "Wilaya is too long"))]
    pub wilaya: Option<String>,
    #[validate(length(max = 120, message = "City is too long"))]
    pub city: Option<String>,
    pub delivery_latitude: Option<f64>,
    pub delivery_longitude: Option<f64>,
}

fn valid_lines(cart: &[CartItemRequest]) -> std::result::Result<(), ValidationError> {
    match cart.iter().find(|l| l.validate().is_err()) {
        Some(_) => {
            let mut err = ValidationError::new("quantity");
            err.message = Some("Quantity must be between 1 and 10000".into());
            Err(err)
        }
        None => Ok(()),
    }
}

impl From<PlaceOrderRequest> for PlaceOrder {
    fn from(req: PlaceOrderRequest) -> Self {
        Self {
            user_id: req.user_id,
            cart: req.cart.iter().map(|l| RequestedLine { variant_id: l.variant_id, quantity: l.quantity }).collect(),
            delivery_type: req.delivery_method,
            payment_method: req.payment_method,
            shipping: ShippingDetails { name: req.name, phone: req.phone, address: req.address, city: req.city, wilaya: req.wilaya },
            delivery_latitude: req.delivery_latitude,
            delivery_longitude: req.delivery_longitude,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub total: crate::domain::value_objects::Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<TrackingNumber>,
}

pub async fn place_order(
    State(state): State<AppState>,
    identity: Identity,
    ApiJson(body): ApiJson<PlaceOrderRequest>,
) -> Result<Json<PlaceOrderResponse>> {
    body.validate()?;
    let placed = state.checkout.submit(&identity, body.into()).await?;
    Ok(Json(PlaceOrderResponse {
        success: true,
        order_id: placed.order.id,
        total: placed.order.total,
        tracking_number: placed.delivery.map(|d| d.tracking_number),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderQuery {
    pub user_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
}

pub async fn list_orders(State(state): State<AppState>, identity: Identity, Query(q): Query<OrderQuery>) -> Result<Json<Value>> {
    let orders: Vec<Order> = match (q.user_id, q.store_id) {
        (Some(user_id), None) => {
            if user_id != identity.user_id {
                return Err(MarketplaceError::Forbidden("You can only list your own orders".into()));
            }
            state.orders.orders_for_user(user_id).await?
        }
        (None, Some(store_id)) => {
            let owns = state.catalog.find_stores(&[store_id]).await?.iter().any(|s| s.owner_id == identity.user_id);
            if !owns {
                return Err(MarketplaceError::Forbidden("You can only list orders of your own store".into()));
            }
            state.orders.orders_for_store(store_id).await?
        }
        _ => return Err(MarketplaceError::validation("Provide exactly one of userId or storeId")),
    };
    Ok(Json(json!({ "success": true, "orders": orders })))
}

/// Readable by the buyer, the owner of any store in the order and the assigned agent.
async fn may_read(state: &AppState, identity: &Identity, order: &Order) -> Result<bool> {
    if order.user_id == identity.user_id {
        return Ok(true);
    }
    if state.catalog.find_stores(&order.store_ids()).await?.iter().any(|s| s.owner_id == identity.user_id) {
        return Ok(true);
    }
    let Some(delivery) = state.deliveries.find_delivery_for_order(order.id).await? else { return Ok(false) };
    Ok(state.deliveries.find_agent(delivery.agent_id).await?.is_some_and(|a| a.user_id == identity.user_id))
}

pub async fn payment_breakdown(State(state): State<AppState>, identity: Identity, Path(order_id): Path<Uuid>) -> Result<Json<Value>> {
    let order = state.orders.find_order(order_id).await?.ok_or(MarketplaceError::OrderNotFound)?;
    if !may_read(&state, &identity, &order).await? {
        return Err(MarketplaceError::OrderNotFound);
    }
    let breakdown = state.checkout.payment_breakdown(&order).await?;
    Ok(Json(json!({ "success": true, "breakdown": breakdown })))
}
