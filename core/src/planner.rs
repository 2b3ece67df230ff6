use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::matcher::{PantryIndex, fold_name, is_optional};
use crate::models::{NewShoppingItem, PlanRange};
use crate::quantity::{self, normalize_unit};
use crate::shopping::{AddFailure, AddStatus, add_item};

/// Quantities closer than this are treated as equal.
const QUANTITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanGenerationSummary {
    /// New list rows created.
    pub added: usize,
    /// Existing unchecked rows whose quantity was raised.
    pub topped_up: usize,
    /// Needs already fully on the list.
    pub already_listed: usize,
    /// Needs the pantry fully covers.
    pub covered: usize,
    /// Note-only or cooked plan entries.
    pub skipped_entries: usize,
    pub missing_recipes: usize,
    /// Needs the store refused; the rest of the run still happened.
    pub failed: usize,
    pub failures: Vec<AddFailure>,
}

enum NeedOutcome {
    Covered,
    AlreadyListed,
    Added,
    ToppedUp,
}

struct Need {
    name: String,
    unit: String,
    quantity: f64,
    recipe_id: i64,
}

/// Ratio of planned to declared servings; 1 when either side is unknown.
#[must_use]
pub fn scale_factor(declared_servings: &str, servings_override: Option<f64>) -> f64 {
    let Some(wanted) = servings_override.filter(|s| s.is_finite() && *s > 0.0) else {
        return 1.0;
    };
    match quantity::parse(declared_servings).amount() {
        Some(base) if base.is_finite() && base > 0.0 => wanted / base,
        _ => 1.0,
    }
}

/// Put the shortfall of every planned recipe in `range` on the shopping list.
///
/// Needs are summed per (folded name, unit) over the whole range, reduced by
/// pantry stock, then netted against what the unchecked list already holds,
/// so running this twice in a row adds nothing the second time.
pub fn generate_from_plan(db: &Database, range: PlanRange) -> Result<PlanGenerationSummary> {
    let mut summary = PlanGenerationSummary::default();
    let pantry = PantryIndex::from_items(&db.list_pantry()?);

    let mut needs: Vec<Need> = Vec::new();
    let mut slots: HashMap<(String, String), usize> = HashMap::new();

    for entry in db.list_plan(range)? {
        let Some(recipe_id) = entry.recipe_id.filter(|_| !entry.is_cooked) else {
            summary.skipped_entries += 1;
            continue;
        };
        if !db.recipe_exists(recipe_id)? {
            debug!(entry_id = entry.id, recipe_id, "plan entry references a missing recipe");
            summary.missing_recipes += 1;
            continue;
        }
        let recipe = db.get_recipe(recipe_id)?;
        let factor = scale_factor(&recipe.servings, entry.servings_override);

        for ingredient in recipe.ingredients() {
            let name = ingredient.name.trim();
            if name.is_empty() || is_optional(name) {
                continue;
            }
            let required = quantity::parse(&ingredient.quantity)
                .amount()
                .map_or(1.0, |amount| quantity::scale(amount, factor));
            let unit = normalize_unit(&ingredient.unit);

            let key = (fold_name(name), unit.clone());
            if let Some(&slot) = slots.get(&key) {
                needs[slot].quantity += required;
            } else {
                slots.insert(key, needs.len());
                needs.push(Need {
                    name: name.to_string(),
                    unit,
                    quantity: required,
                    recipe_id,
                });
            }
        }
    }

    for need in needs {
        match fill_need(db, &pantry, &need) {
            Ok(NeedOutcome::Covered) => summary.covered += 1,
            Ok(NeedOutcome::AlreadyListed) => summary.already_listed += 1,
            Ok(NeedOutcome::Added) => summary.added += 1,
            Ok(NeedOutcome::ToppedUp) => summary.topped_up += 1,
            Err(e) => {
                warn!(name = %need.name, error = %format!("{e:#}"), "failed to list planned ingredient");
                summary.failed += 1;
                summary.failures.push(AddFailure {
                    name: need.name,
                    error: format!("{e:#}"),
                });
            }
        }
    }

    info!(
        added = summary.added,
        topped_up = summary.topped_up,
        covered = summary.covered,
        failed = summary.failed,
        "shopping list generated from meal plan"
    );
    Ok(summary)
}

fn fill_need(db: &Database, pantry: &PantryIndex, need: &Need) -> Result<NeedOutcome> {
    let deficit = (need.quantity - pantry.quantity_of(&need.name)).max(0.0);
    if deficit <= QUANTITY_EPSILON {
        return Ok(NeedOutcome::Covered);
    }
    let listed = db
        .find_unchecked_shopping_item(&need.name, &need.unit)?
        .map_or(0.0, |item| item.quantity);
    let top_up = deficit - listed;
    if top_up <= QUANTITY_EPSILON {
        return Ok(NeedOutcome::AlreadyListed);
    }

    let item = NewShoppingItem {
        recipe_id: Some(need.recipe_id),
        ..NewShoppingItem::new(&need.name, top_up, &need.unit)
    };
    Ok(match add_item(db, item)?.status {
        AddStatus::Added => NeedOutcome::Added,
        AddStatus::Updated => NeedOutcome::ToppedUp,
    })
}
