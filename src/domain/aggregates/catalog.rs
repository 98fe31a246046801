//! Catalog Aggregate
//!
//! Stores, products and variants as the order pipeline sees them. The catalog is
//! owned by the admin and seller tooling; here it is read, and only `Variant::stock`
//! is ever written (by the order transaction).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use crate::domain::value_objects::{Money, Wilaya};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub address: String,
    pub city: String,
    /// Where the store keeps its stock. `None` when the seller never filled it in.
    pub storage_city: Option<Wilaya>,
    pub click_collect: bool,
    pub offers_free_delivery: bool,
    pub free_delivery_threshold: Option<Money>,
}

impl Store {
    /// Threshold that applies, if the store opted into free delivery at all.
    pub fn free_delivery_threshold(&self) -> Option<Money> {
        if self.offers_free_delivery { Some(self.free_delivery_threshold.unwrap_or(Money::ZERO)) } else { None }
    }

    pub fn qualifies_for_free_delivery(&self, spent: Money) -> bool {
        self.free_delivery_threshold().is_some_and(|threshold| spent >= threshold)
    }
}

/// Stores keyed by id, as loaded for a cart or an order.
pub type StoreIndex = HashMap<Uuid, Store>;

pub fn index_stores(stores: impl IntoIterator<Item = Store>) -> StoreIndex {
    stores.into_iter().map(|s| (s.id, s)).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product { pub id: Uuid, pub store_id: Uuid, pub title: String, pub price: Money }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant { pub id: Uuid, pub product_id: Uuid, pub size: Option<String>, pub color: Option<String>, pub stock: u32 }

impl Variant {
    pub fn can_fulfil(&self, qty: u32) -> bool { self.stock >= qty }
}

/// A variant together with its parent product and store, as read inside the order
/// transaction. Prices come from here, never from the client.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantListing { pub variant: Variant, pub product: Product, pub store: Store }

impl VariantListing {
    pub fn display_title(&self) -> String {
        let options: Vec<&str> = [self.variant.size.as_deref(), self.variant.color.as_deref()].into_iter().flatten().collect();
        if options.is_empty() { self.product.title.clone() } else { format!("{} ({})", self.product.title, options.join(", ")) }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn store(name: &str, storage: &str) -> Store {
        Store {
            id: Uuid::new_v4(), owner_id: Uuid::new_v4(), name: name.into(), address: format!("1 rue {}", name),
            city: storage.into(), storage_city: storage.parse().ok(), click_collect: true,
            offers_free_delivery: false, free_delivery_threshold: None,
        }
    }

    pub fn with_free_delivery(mut store: Store, threshold: i64) -> Store {
        store.offers_free_delivery = true;
        store.free_delivery_threshold = Some(Money::dzd(threshold));
        store
    }
}
