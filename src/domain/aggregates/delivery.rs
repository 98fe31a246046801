//! Delivery Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::aggregates::order::{string_enum, Order, UnknownVariant};
use crate::domain::value_objects::{Money, TrackingNumber};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAgent { pub id: Uuid, pub user_id: Uuid, pub is_active: bool }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub agent_id: Uuid,
    pub tracking_number: TrackingNumber,
    pub status: DeliveryStatus,
    pub assigned_at: DateTime<Utc>,
    pub cod_amount: Money,
    pub cod_collected: bool,
}

impl Delivery {
    /// Pending delivery for `order`, bound to `agent`.
    pub fn for_order(order: &Order, agent: &DeliveryAgent, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(), order_id: order.id, agent_id: agent.id,
            tracking_number: TrackingNumber::generate(at), status: DeliveryStatus::Pending,
            assigned_at: at, cod_amount: order.cash_to_collect(), cod_collected: false,
        }
    }

    pub fn regenerate_tracking_number(&mut self) { self.tracking_number = TrackingNumber::generate(self.assigned_at); }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus { #[default] Pending, PickedUp, InTransit, Delivered, Failed }
string_enum!(DeliveryStatus { Pending => "PENDING", PickedUp => "PICKED_UP", InTransit => "IN_TRANSIT", Delivered => "DELIVERED", Failed => "FAILED" });
