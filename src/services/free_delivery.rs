//! Free-delivery progress per store
//!
//! Drives the "spend X more for free delivery" hints at checkout. Never used for
//! pricing: the waiver itself is applied by the delivery fee calculator.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{group_by_store, CartLine, StoreIndex};
use crate::domain::value_objects::Money;

pub const DEFAULT_NUDGE_WINDOW: i64 = 2000;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeDeliveryStatus {
    pub store_id: Uuid,
    pub store_name: String,
    pub total_amount: Money,
    pub offers_free_delivery: bool,
    pub free_delivery_threshold: Money,
    pub amount_to_free_delivery: Money,
    /// 0 to 100, two decimals.
    pub percentage_to_threshold: Decimal,
}

impl FreeDeliveryStatus {
    pub fn reached(&self) -> bool { self.amount_to_free_delivery.is_zero() }
}

#[derive(Clone, Copy, Debug)]
pub struct FreeDeliveryEngine { nudge_window: Money }

impl Default for FreeDeliveryEngine {
    fn default() -> Self { Self { nudge_window: Money::dzd(DEFAULT_NUDGE_WINDOW) } }
}

impl FreeDeliveryEngine {
    pub fn new(nudge_window: Money) -> Self { Self { nudge_window } }

    /// Progress for every store in the cart that offers free delivery, in cart order.
    pub fn compute_status(&self, cart: &[CartLine], stores: &StoreIndex) -> Vec<FreeDeliveryStatus> {
        group_by_store(cart)
            .into_iter()
            .filter_map(|(store_id, lines)| {
                let store = stores.get(&store_id)?;
                let threshold = store.free_delivery_threshold()?;
                let total: Money = lines.iter().map(|l| l.line_total()).sum();
                Some(FreeDeliveryStatus {
                    store_id,
                    store_name: store.name.clone(),
                    total_amount: total,
                    offers_free_delivery: true,
                    free_delivery_threshold: threshold,
                    amount_to_free_delivery: threshold.saturating_sub(total),
                    percentage_to_threshold: percentage(total, threshold),
                })
            })
            .collect()
    }

    /// Stores close enough to their threshold to be worth an upsell prompt.
    pub fn incentive_stores<'a>(&self, statuses: &'a [FreeDeliveryStatus]) -> Vec<&'a FreeDeliveryStatus> {
        statuses
            .iter()
            .filter(|s| !s.reached() && s.amount_to_free_delivery <= self.nudge_window)
            .collect()
    }
}

fn percentage(total: Money, threshold: Money) -> Decimal {
    let hundred = Decimal::ONE_HUNDRED;
    if threshold.is_zero() { return hundred; }
    (total.amount() / threshold.amount() * hundred).min(hundred).round_dp(2)
}
