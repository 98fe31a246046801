//! Delivery fee calculation
//!
//! One trip carries the whole order, so the fee is the most expensive tier any
//! store in the cart falls into, not a sum over stores. The quote shown during
//! checkout is advisory; the order transaction runs the same computation on the
//! prices it loads itself.

use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{group_by_store, CartLine, StoreIndex};
use crate::domain::value_objects::{Money, Wilaya};

pub const DEFAULT_INTRA_WILAYA_FEE: i64 = 500;
pub const DEFAULT_INTER_WILAYA_FEE: i64 = 800;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeTier {
    /// Store stock sits in the destination wilaya.
    IntraWilaya,
    /// Store stock has to travel from another wilaya (or its location is unknown).
    InterWilaya,
}

impl FeeTier {
    pub fn between(storage: Option<Wilaya>, destination: Wilaya) -> Self {
        match storage {
            Some(origin) if origin == destination => Self::IntraWilaya,
            _ => Self::InterWilaya,
        }
    }
}

/// Fee per tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeSchedule { pub intra_wilaya: Money, pub inter_wilaya: Money }

impl Default for FeeSchedule {
    fn default() -> Self { Self { intra_wilaya: Money::dzd(DEFAULT_INTRA_WILAYA_FEE), inter_wilaya: Money::dzd(DEFAULT_INTER_WILAYA_FEE) } }
}

impl FeeSchedule {
    pub fn fee(&self, tier: FeeTier) -> Money {
        match tier {
            FeeTier::IntraWilaya => self.intra_wilaya,
            FeeTier::InterWilaya => self.inter_wilaya,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDeliveryFee {
    pub store_id: Uuid,
    pub store_name: String,
    pub tier: FeeTier,
    /// Tier fee, or zero when the store's free-delivery threshold is reached.
    pub fee: Money,
    pub free_delivery: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryQuote {
    pub total_fee: Money,
    pub per_store: Vec<StoreDeliveryFee>,
    pub has_outside_destination_products: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeliveryFeeCalculator { schedule: FeeSchedule }

impl DeliveryFeeCalculator {
    pub fn new(schedule: FeeSchedule) -> Self { Self { schedule } }

    pub fn compute(&self, cart: &[CartLine], stores: &StoreIndex, destination: Wilaya) -> DeliveryQuote {
        let per_store: Vec<StoreDeliveryFee> = group_by_store(cart)
            .into_iter()
            .map(|(store_id, lines)| {
                let store = stores.get(&store_id);
                let spent: Money = lines.iter().map(|l| l.line_total()).sum();
                let tier = FeeTier::between(store.and_then(|s| s.storage_city), destination);
                let free_delivery = store.is_some_and(|s| s.qualifies_for_free_delivery(spent));
                StoreDeliveryFee {
                    store_id,
                    store_name: store.map(|s| s.name.clone()).unwrap_or_default(),
                    tier,
                    fee: if free_delivery { Money::ZERO } else { self.schedule.fee(tier) },
                    free_delivery,
                }
            })
            .collect();

        DeliveryQuote {
            total_fee: per_store.iter().map(|s| s.fee).max().unwrap_or(Money::ZERO),
            has_outside_destination_products: per_store.iter().any(|s| s.tier == FeeTier::InterWilaya),
            per_store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::catalog::fixtures::{store, with_free_delivery};
    use crate::domain::aggregates::cart::fixtures::line;
    use crate::domain::aggregates::index_stores;

    fn alger() -> Wilaya { "Alger".parse().unwrap() }

    #[test]
    fn test_single_store_same_wilaya() {
        let s = store("Atlas", "Alger");
        let cart = vec![line(s.id, 4200, 2)];
        let quote = DeliveryFeeCalculator::default().compute(&cart, &index_stores([s]), alger());
        assert_eq!(quote.total_fee, Money::dzd(500));
        assert!(!quote.has_outside_destination_products);
        assert_eq!(quote.per_store[0].tier, FeeTier::IntraWilaya);
    }

    #[test]
    fn test_outside_store_sets_whole_shipment_tier() {
        let (local, remote) = (store("Atlas", "Alger"), store("Sahel", "Oran"));
        let cart = vec![line(local.id, 1000, 1), line(remote.id, 1000, 1)];
        let quote = DeliveryFeeCalculator::default().compute(&cart, &index_stores([local, remote]), alger());
        assert_eq!(quote.total_fee, Money::dzd(800));
        assert!(quote.has_outside_destination_products);
        assert_eq!(quote.per_store.len(), 2);
    }

    #[test]
    fn test_fees_do_not_stack() {
        let stores: Vec<_> = ["Oran", "Blida", "Setif"].iter().map(|w| store(w, w)).collect();
        let cart: Vec<_> = stores.iter().map(|s| line(s.id, 1000, 1)).collect();
        let quote = DeliveryFeeCalculator::default().compute(&cart, &index_stores(stores), alger());
        assert_eq!(quote.total_fee, Money::dzd(800));
    }

    #[test]
    fn test_unknown_storage_is_inter_wilaya() {
        let mut s = store("Atlas", "Alger");
        s.storage_city = None;
        let cart = vec![line(s.id, 1000, 1)];
        let quote = DeliveryFeeCalculator::default().compute(&cart, &index_stores([s]), alger());
        assert_eq!(quote.per_store[0].tier, FeeTier::InterWilaya);
    }

    #[test]
    fn test_free_delivery_waives_store_portion() {
        let remote = with_free_delivery(store("Sahel", "Oran"), 5000);
        let local = store("Atlas", "Alger");
        let calc = DeliveryFeeCalculator::default();

        let cart = vec![line(remote.id, 5000, 1), line(local.id, 1000, 1)];
        let quote = calc.compute(&cart, &index_stores([remote.clone(), local]), alger());
        assert!(quote.per_store[0].free_delivery);
        assert_eq!(quote.total_fee, Money::dzd(500));
        assert!(quote.has_outside_destination_products);

        let only_remote = vec![line(remote.id, 2500, 2)];
        let quote = calc.compute(&only_remote, &index_stores([remote]), alger());
        assert_eq!(quote.total_fee, Money::ZERO);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let (local, remote) = (store("Atlas", "Alger"), store("Sahel", "Oran"));
        let cart = vec![line(local.id, 1000, 3), line(remote.id, 700, 1)];
        let stores = index_stores([local, remote]);
        let calc = DeliveryFeeCalculator::new(FeeSchedule { intra_wilaya: Money::dzd(400), inter_wilaya: Money::dzd(900) });
        assert_eq!(calc.compute(&cart, &stores, alger()), calc.compute(&cart, &stores, alger()));
    }

    #[test]
    fn test_empty_cart_is_free() {
        let quote = DeliveryFeeCalculator::default().compute(&[], &StoreIndex::new(), alger());
        assert_eq!(quote.total_fee, Money::ZERO);
        assert!(quote.per_store.is_empty());
    }
}
