//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::value_objects::{Money, PhoneNumber, Wilaya};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total: Money,
    pub delivery_fee: Money,
    pub payment_method: PaymentMethod,
    pub delivery_type: DeliveryType,
    /// Store of the first cart line, kept for listings and reports. Which store
    /// sold what is carried by the items.
    pub store: Option<StoreSnapshot>,
    pub shipping: Option<ShippingInfo>,
    pub delivery_latitude: Option<f64>,
    pub delivery_longitude: Option<f64>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub variant_id: Uuid,
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub title: String,
    pub quantity: u32,
    /// Unit price at the time of the order.
    pub price: Money,
}

impl OrderItem {
    pub fn line_total(&self) -> Money { self.price.multiply(self.quantity) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot { pub id: Uuid, pub name: String, pub address: String, pub city: String }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingInfo { pub name: String, pub phone: PhoneNumber, pub address: String, pub city: String, pub wilaya: Wilaya }

impl Order {
    pub fn items_subtotal(&self) -> Money { self.items.iter().map(OrderItem::line_total).sum() }

    /// `total == Σ price × quantity + delivery fee`.
    pub fn is_balanced(&self) -> bool { self.total == self.items_subtotal() + self.delivery_fee }

    pub fn is_delivery(&self) -> bool { self.delivery_type == DeliveryType::Delivery }

    /// Stores touched by the order, in item order.
    pub fn store_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = Vec::new();
        for item in &self.items {
            if !ids.contains(&item.store_id) { ids.push(item.store_id); }
        }
        ids
    }

    /// Amount the delivery agent must collect at the door.
    pub fn cash_to_collect(&self) -> Money {
        if self.payment_method == PaymentMethod::Cod { self.total } else { Money::ZERO }
    }
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str { match self { $(Self::$variant => $text),+ } }
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
        }
        impl FromStr for $name {
            type Err = UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s { $($text => Ok(Self::$variant),)+ other => Err(UnknownVariant { kind: stringify!($name), value: other.to_string() }) }
            }
        }
    };
}
pub(crate) use string_enum;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Pending, Confirmed, Shipped, Delivered, Cancelled }
string_enum!(OrderStatus { Pending => "PENDING", Confirmed => "CONFIRMED", Shipped => "SHIPPED", Delivered => "DELIVERED", Cancelled => "CANCELLED" });

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod { Cod, Card }
string_enum!(PaymentMethod { Cod => "COD", Card => "CARD" });

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryType { Delivery, ClickCollect }
string_enum!(DeliveryType { Delivery => "DELIVERY", ClickCollect => "CLICK_COLLECT" });

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant { pub kind: &'static str, pub value: String }
