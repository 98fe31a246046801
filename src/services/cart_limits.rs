//! Cart limits
//!
//! Checked on every cart edit so the buyer is stopped before checkout. This is a
//! fast path for the UI only: the order transaction re-validates stock and prices
//! on its own.

use serde::{Deserialize, Serialize};
use crate::domain::aggregates::{group_by_store, CartLine};

pub const MAX_QUANTITY_PER_LINE: u32 = 10;
pub const MAX_STORES_PER_CART: usize = 3;
pub const MAX_ITEMS_PER_STORE: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartLimitKind { QuantityPerLine, StoresPerCart, ItemsPerStore }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLimitViolation {
    #[serde(rename = "type")]
    pub kind: CartLimitKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CartLimits { pub max_quantity_per_line: u32, pub max_stores: usize, pub max_items_per_store: u32 }

impl Default for CartLimits {
    fn default() -> Self {
        Self { max_quantity_per_line: MAX_QUANTITY_PER_LINE, max_stores: MAX_STORES_PER_CART, max_items_per_store: MAX_ITEMS_PER_STORE }
    }
}

impl CartLimits {
    /// First violated rule, or `None` when the cart may go to checkout.
    ///
    /// `store_name` resolves a store id to a display name; lines whose store is
    /// unknown are reported by id.
    pub fn validate<F>(&self, cart: &[CartLine], store_name: F) -> Option<CartLimitViolation>
    where
        F: Fn(&uuid::Uuid) -> Option<String>,
    {
        let name_of = |id: &uuid::Uuid| store_name(id).unwrap_or_else(|| id.to_string());

        if let Some(line) = cart.iter().find(|l| l.quantity > self.max_quantity_per_line) {
            return Some(CartLimitViolation {
                kind: CartLimitKind::QuantityPerLine,
                store_name: Some(name_of(&line.store_id)),
                message: format!("You can order at most {} of \"{}\"", self.max_quantity_per_line, line.title),
            });
        }

        let groups = group_by_store(cart);
        if groups.len() > self.max_stores {
            return Some(CartLimitViolation {
                kind: CartLimitKind::StoresPerCart,
                store_name: None,
                message: format!("A cart may contain products from at most {} stores", self.max_stores),
            });
        }

        groups.iter().find_map(|(store_id, lines)| {
            let items = lines.iter().fold(0u32, |acc, l| acc.saturating_add(l.quantity));
            (items > self.max_items_per_store).then(|| {
                let name = name_of(store_id);
                CartLimitViolation {
                    kind: CartLimitKind::ItemsPerStore,
                    message: format!("You can order at most {} items from {}", self.max_items_per_store, name),
                    store_name: Some(name),
                }
            })
        })
    }
}
