//! Cart Aggregate
//!
//! A cart only lives in the buyer's session; it is the input to checkout and is
//! never persisted as-is. Unit prices here are display values, the order
//! transaction re-reads them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub title: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub store_id: Uuid,
}

impl CartLine {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cart { lines: Vec<CartLine> }

impl Cart {
    pub fn new() -> Self { Self::default() }

    /// Builds a cart, merging lines that point at the same variant.
    pub fn from_lines(lines: impl IntoIterator<Item = CartLine>) -> Self {
        let mut cart = Self::new();
        lines.into_iter().for_each(|l| cart.add_item(l));
        cart
    }

    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn subtotal(&self) -> Money { self.lines.iter().map(CartLine::line_total).sum() }

    pub fn add_item(&mut self, line: CartLine) {
        if let Some(existing) = self.lines.iter_mut().find(|l| l.variant_id == line.variant_id) {
            existing.quantity = existing.quantity.saturating_add(line.quantity);
        } else {
            self.lines.push(line);
        }
    }
}

/// Groups lines by store, stores in order of first appearance.
pub fn group_by_store(lines: &[CartLine]) -> Vec<(Uuid, Vec<&CartLine>)> {
    let mut groups: Vec<(Uuid, Vec<&CartLine>)> = Vec::new();
    for line in lines {
        match groups.iter_mut().find(|(store_id, _)| *store_id == line.store_id) {
            Some((_, group)) => group.push(line),
            None => groups.push((line.store_id, vec![line])),
        }
    }
    groups
}
