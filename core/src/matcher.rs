use std::collections::HashMap;

use crate::models::PantryItem;

/// Markers that make an ingredient count as satisfied regardless of stock.
const OPTIONAL_MARKERS: &[&str] = &["optional", "(opt)"];

/// Key used for every name comparison: trimmed and lower-cased. No plural or
/// synonym folding happens here.
#[must_use]
pub fn fold_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[must_use]
pub fn is_optional(ingredient_name: &str) -> bool {
    let lower = ingredient_name.to_lowercase();
    OPTIONAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Immutable snapshot of pantry stock keyed by folded name.
///
/// Built once per recompute pass or plan generation and never mutated.
/// Entries sharing a folded name have their quantities summed; units are
/// not reconciled.
#[derive(Debug, Clone, Default)]
pub struct PantryIndex {
    stock: HashMap<String, f64>,
}

impl PantryIndex {
    #[must_use]
    pub fn from_items(items: &[PantryItem]) -> Self {
        let mut stock: HashMap<String, f64> = HashMap::new();
        for item in items {
            *stock.entry(fold_name(&item.name)).or_insert(0.0) += item.quantity;
        }
        Self { stock }
    }

    /// Quantity on hand for `name`; 0 when the pantry has no such entry.
    #[must_use]
    pub fn quantity_of(&self, name: &str) -> f64 {
        self.stock.get(&fold_name(name)).copied().unwrap_or(0.0)
    }
}
