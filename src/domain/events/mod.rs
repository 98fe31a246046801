//! Domain events
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{DeliveryType, Order, PaymentMethod};
use crate::domain::value_objects::{Money, TrackingNumber};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Delivery(DeliveryEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, user_id: Uuid, total: Money, delivery_fee: Money, delivery_type: DeliveryType, payment_method: PaymentMethod, placed_at: DateTime<Utc> },
    StoreItemsOrdered { order_id: Uuid, store_id: Uuid, items: Vec<ItemLine>, store_total: Money },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Assigned { order_id: Uuid, delivery_id: Uuid, tracking_number: TrackingNumber, cod_amount: Money, destination: Option<String> },
}

#[derive(Clone, Debug, Serialize)]
pub struct ItemLine { pub title: String, pub quantity: u32, pub price: Money }

impl OrderEvent {
    pub fn placed(order: &Order) -> Self {
        Self::Placed {
            order_id: order.id, user_id: order.user_id, total: order.total, delivery_fee: order.delivery_fee,
            delivery_type: order.delivery_type, payment_method: order.payment_method, placed_at: order.created_at,
        }
    }

    /// The part of `order` a single seller has to prepare.
    pub fn store_items(order: &Order, store_id: Uuid) -> Self {
        let items: Vec<ItemLine> = order.items.iter()
            .filter(|i| i.store_id == store_id)
            .map(|i| ItemLine { title: i.title.clone(), quantity: i.quantity, price: i.price })
            .collect();
        let store_total = items.iter().map(|i| i.price.multiply(i.quantity)).sum();
        Self::StoreItemsOrdered { order_id: order.id, store_id, items, store_total }
    }
}
