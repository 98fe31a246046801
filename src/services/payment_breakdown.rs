//! Payment breakdown
//!
//! Splits what the delivery agent collects into per-store payouts and what the
//! agent keeps (delivery fee plus the platform's cut), then checks that the
//! pieces add back up to the order total.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;
use crate::domain::aggregates::{Order, StoreIndex};
use crate::domain::value_objects::Money;

/// Largest difference between recomputed and stored totals still treated as equal.
pub const BALANCE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreTotal {
    pub store_id: Uuid,
    pub store_name: String,
    /// Sum of this store's item lines.
    pub gross: Money,
    pub commission: Money,
    pub payout: Money,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBreakdown {
    pub order_id: Uuid,
    pub store_totals: Vec<StoreTotal>,
    pub delivery_fee: Money,
    pub service_fee: Money,
    /// What the agent keeps out of the collected cash: delivery fee plus commission.
    pub total_to_agent: Money,
    pub calculated_total: Money,
    pub order_total: Money,
    pub is_valid: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PaymentBreakdownCalculator { commission_rate: Decimal }

impl PaymentBreakdownCalculator {
    /// `commission_rate` is a fraction of each store's gross, e.g. `0.05`.
    pub fn new(commission_rate: Decimal) -> Self { Self { commission_rate } }

    pub fn breakdown(&self, order: &Order, stores: &StoreIndex) -> PaymentBreakdown {
        let store_totals: Vec<StoreTotal> = order
            .store_ids()
            .into_iter()
            .map(|store_id| {
                let gross: Money = order.items.iter().filter(|i| i.store_id == store_id).map(|i| i.line_total()).sum();
                let commission = Money::new(gross.amount() * self.commission_rate).round_cents();
                StoreTotal {
                    store_id,
                    store_name: stores.get(&store_id).map(|s| s.name.clone()).unwrap_or_else(|| "Unknown store".into()),
                    gross,
                    commission,
                    payout: gross - commission,
                }
            })
            .collect();

        let service_fee: Money = store_totals.iter().map(|s| s.commission).sum();
        let payouts: Money = store_totals.iter().map(|s| s.payout).sum();
        let total_to_agent = order.delivery_fee + service_fee;
        let calculated_total = payouts + total_to_agent;
        let is_valid = (calculated_total.amount() - order.total.amount()).abs() < BALANCE_EPSILON;
        if !is_valid {
            warn!(order_id = %order.id, order_total = %order.total, calculated_total = %calculated_total, "Payment breakdown does not match order total");
        }

        PaymentBreakdown {
            order_id: order.id,
            store_totals,
            delivery_fee: order.delivery_fee,
            service_fee,
            total_to_agent,
            calculated_total,
            order_total: order.total,
            is_valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::catalog::fixtures::store;
    use crate::domain::aggregates::{index_stores, DeliveryType, OrderItem, OrderStatus, PaymentMethod};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(items: Vec<(Uuid, i64, u32)>, fee: i64, payment_method: PaymentMethod) -> Order {
        let id = Uuid::new_v4();
        let items: Vec<OrderItem> = items.into_iter().map(|(store_id, price, quantity)| OrderItem {
            id: Uuid::new_v4(), order_id: id, variant_id: Uuid::new_v4(), product_id: Uuid::new_v4(),
            store_id, title: "Item".into(), quantity, price: Money::dzd(price),
        }).collect();
        let subtotal: Money = items.iter().map(OrderItem::line_total).sum();
        Order {
            id, user_id: Uuid::new_v4(), status: OrderStatus::Pending, total: subtotal + Money::dzd(fee),
            delivery_fee: Money::dzd(fee), payment_method, delivery_type: DeliveryType::Delivery, store: None,
            shipping: None, delivery_latitude: None, delivery_longitude: None, items, created_at: Utc::now(),
        }
    }

    #[test]
    fn test_breakdown_without_commission() {
        let (a, b) = (store("Atlas", "Alger"), store("Sahel", "Oran"));
        let o = order(vec![(a.id, 4200, 2), (b.id, 1000, 1), (a.id, 500, 1)], 800, PaymentMethod::Cod);
        let result = PaymentBreakdownCalculator::default().breakdown(&o, &index_stores([a.clone(), b]));

        assert_eq!(result.store_totals.len(), 2);
        assert_eq!(result.store_totals[0].store_id, a.id);
        assert_eq!(result.store_totals[0].gross, Money::dzd(8900));
        assert_eq!(result.store_totals[0].payout, Money::dzd(8900));
        assert_eq!(result.service_fee, Money::ZERO);
        assert_eq!(result.total_to_agent, Money::dzd(800));
        assert_eq!(result.calculated_total, o.total);
        assert!(result.is_valid);
    }

    #[test]
    fn test_commission_is_carved_out_of_payouts() {
        let a = store("Atlas", "Alger");
        let o = order(vec![(a.id, 3333, 1)], 500, PaymentMethod::Cod);
        let result = PaymentBreakdownCalculator::new(dec!(0.05)).breakdown(&o, &index_stores([a]));
        assert_eq!(result.service_fee.amount(), dec!(166.65));
        assert_eq!(result.store_totals[0].payout.amount(), dec!(3166.35));
        assert_eq!(result.total_to_agent.amount(), dec!(666.65));
        assert!(result.is_valid);
    }

    #[test]
    fn test_tampered_total_is_flagged() {
        let a = store("Atlas", "Alger");
        let mut o = order(vec![(a.id, 1000, 1)], 500, PaymentMethod::Cod);
        o.total = Money::dzd(1400);
        let result = PaymentBreakdownCalculator::default().breakdown(&o, &StoreIndex::new());
        assert!(!result.is_valid);
        assert_eq!(result.store_totals[0].store_name, "Unknown store");
    }
}
