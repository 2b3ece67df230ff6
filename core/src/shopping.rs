use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::category::{classify, compare_categories};
use crate::db::{Database, PantryMove};
use crate::models::{NewShoppingItem, ShoppingListItem};
use crate::quantity::{normalize_unit, parse_freeform_item};

/// Step between appended items. Items are ordered inside a category by a
/// fractional `sort_order`; a drag-drop takes the midpoint of its new
/// neighbours.
pub const SORT_INCREMENT: f64 = 1024.0;

/// Smallest neighbour gap tolerated before a category is renumbered.
pub const MIN_SORT_GAP: f64 = SORT_INCREMENT * 1e-6;

#[derive(Debug, Clone)]
pub enum ShoppingInput {
    /// Free text such as "2 l milk" or "bananas 6".
    Line(String),
    Item(NewShoppingItem),
}

impl From<&str> for ShoppingInput {
    fn from(line: &str) -> Self {
        ShoppingInput::Line(line.to_string())
    }
}

impl From<NewShoppingItem> for ShoppingInput {
    fn from(item: NewShoppingItem) -> Self {
        ShoppingInput::Item(item)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddStatus {
    Added,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub status: AddStatus,
    pub item: ShoppingListItem,
}

/// An item the store refused while adding a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchAddSummary {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<AddFailure>,
}

impl BatchAddSummary {
    fn record_failure(&mut self, name: &str, error: &anyhow::Error) {
        warn!(name, error = %format!("{error:#}"), "failed to add shopping item");
        self.failed += 1;
        self.failures.push(AddFailure {
            name: name.to_string(),
            error: format!("{error:#}"),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReorderTarget {
    /// Drop immediately before this item, joining its category.
    BeforeItem(i64),
    /// Drop after the last unchecked item of this category.
    EndOfCategory(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveFailure {
    pub item_id: i64,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveSummary {
    pub merged: usize,
    pub created: usize,
    pub failed: usize,
    pub failures: Vec<MoveFailure>,
}

impl MoveSummary {
    #[must_use]
    pub fn moved(&self) -> usize {
        self.merged + self.created
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryGroup {
    pub category: String,
    pub items: Vec<ShoppingListItem>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShoppingListView {
    pub categories: Vec<CategoryGroup>,
    pub checked: Vec<ShoppingListItem>,
}

impl ShoppingListView {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.checked.is_empty()
    }
}

fn validate_item(item: &NewShoppingItem) -> Result<()> {
    if item.name.trim().is_empty() {
        bail!("Shopping item name must not be empty");
    }
    if !item.quantity.is_finite() || item.quantity <= 0.0 {
        bail!("Shopping quantity must be greater than 0");
    }
    Ok(())
}

fn next_sort_order(db: &Database, category: &str) -> Result<f64> {
    Ok(db
        .max_sort_order(category)?
        .map_or(SORT_INCREMENT, |max| max + SORT_INCREMENT))
}

/// Add an item, merging into the unchecked row with the same folded name and
/// unit when there is one. At most one unchecked row exists per pair.
pub fn add_item(db: &Database, input: impl Into<ShoppingInput>) -> Result<AddOutcome> {
    let mut item = match input.into() {
        ShoppingInput::Line(line) => NewShoppingItem::from(parse_freeform_item(&line)),
        ShoppingInput::Item(item) => item,
    };
    validate_item(&item)?;
    item.name = item.name.trim().to_string();
    item.unit = normalize_unit(&item.unit);

    if let Some(existing) = db.find_unchecked_shopping_item(&item.name, &item.unit)? {
        let item = db.add_shopping_quantity(existing.id, item.quantity)?;
        debug!(id = item.id, quantity = item.quantity, "shopping item merged");
        return Ok(AddOutcome {
            status: AddStatus::Updated,
            item,
        });
    }

    let category = item
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| classify(&item.name))
        .to_string();
    let sort_order = next_sort_order(db, &category)?;
    let item = db.insert_shopping_item(&item, &category, sort_order)?;
    debug!(id = item.id, category = %item.category, "shopping item added");
    Ok(AddOutcome {
        status: AddStatus::Added,
        item,
    })
}

/// Add many items with the single-item rule. Items that fail validation are
/// skipped; items the store rejects are recorded as failures. Neither stops
/// the rest of the batch, and items already added stay added.
pub fn add_items_batch(db: &Database, items: Vec<NewShoppingItem>) -> Result<BatchAddSummary> {
    let mut summary = BatchAddSummary::default();
    for item in items {
        if let Err(e) = validate_item(&item) {
            debug!(name = %item.name, error = %e, "skipping shopping item");
            summary.skipped += 1;
            continue;
        }
        let name = item.name.clone();
        match add_item(db, item) {
            Ok(outcome) => match outcome.status {
                AddStatus::Added => summary.added += 1,
                AddStatus::Updated => summary.updated += 1,
            },
            Err(e) => summary.record_failure(&name, &e),
        }
    }
    Ok(summary)
}

/// Renumber `ids` in order as `SORT_INCREMENT`, `2 * SORT_INCREMENT`, ...
fn renumber(db: &Database, category: &str, ids: &[i64]) -> Result<usize> {
    let mut order = 0.0;
    let positions: Vec<(i64, &str, f64)> = ids
        .iter()
        .map(|&id| {
            order += SORT_INCREMENT;
            (id, category, order)
        })
        .collect();
    db.set_shopping_positions(&positions)
}

/// Move an unchecked item to a new position. The item joins the category of
/// the drop target.
pub fn reorder(db: &Database, dragged_id: i64, target: ReorderTarget) -> Result<ShoppingListItem> {
    let dragged = db.get_shopping_item(dragged_id)?;
    if dragged.is_checked {
        bail!("Checked items cannot be reordered");
    }

    match target {
        ReorderTarget::BeforeItem(target_id) => {
            if target_id == dragged_id {
                return Ok(dragged);
            }
            let target = db.get_shopping_item(target_id)?;
            if target.is_checked {
                bail!("Cannot drop onto checked item {target_id}");
            }
            let category = target.category.clone();
            let siblings: Vec<ShoppingListItem> = db
                .unchecked_in_category(&category)?
                .into_iter()
                .filter(|i| i.id != dragged_id)
                .collect();
            let index = siblings
                .iter()
                .position(|i| i.id == target_id)
                .unwrap_or(0);

            let new_order = match index.checked_sub(1).map(|i| &siblings[i]) {
                Some(prev) => {
                    let mid = (prev.sort_order + target.sort_order) / 2.0;
                    let too_close = mid - prev.sort_order < MIN_SORT_GAP
                        || target.sort_order - mid < MIN_SORT_GAP;
                    if too_close {
                        let mut ids: Vec<i64> = siblings.iter().map(|i| i.id).collect();
                        ids.insert(index, dragged_id);
                        let renumbered = renumber(db, &category, &ids)?;
                        debug!(category = %category, renumbered, "category rebalanced");
                        return db.get_shopping_item(dragged_id);
                    }
                    mid
                }
                None => target.sort_order - SORT_INCREMENT,
            };
            db.set_shopping_positions(&[(dragged_id, &category, new_order)])?;
        }
        ReorderTarget::EndOfCategory(category) => {
            let category = category.trim();
            if category.is_empty() {
                bail!("Category name must not be empty");
            }
            let last = db
                .unchecked_in_category(category)?
                .into_iter()
                .filter(|i| i.id != dragged_id)
                .map(|i| i.sort_order)
                .last();
            let new_order = last.map_or(SORT_INCREMENT, |o| o + SORT_INCREMENT);
            db.set_shopping_positions(&[(dragged_id, category, new_order)])?;
        }
    }

    db.get_shopping_item(dragged_id)
}

/// Renumber the unchecked items of a category in their current order.
pub fn rebalance_category(db: &Database, category: &str) -> Result<usize> {
    let ids: Vec<i64> = db
        .unchecked_in_category(category)?
        .iter()
        .map(|i| i.id)
        .collect();
    renumber(db, category, &ids)
}

/// Move every item of `old` into `new`. When `new` is already populated the
/// incoming items are appended after its last item, keeping their order.
pub fn rename_category(db: &Database, old: &str, new: &str) -> Result<usize> {
    let new = new.trim();
    if new.is_empty() {
        bail!("Category name must not be empty");
    }
    if old == new {
        return Ok(0);
    }
    let moving = db.shopping_items_in_category(old)?;
    if moving.is_empty() {
        return Ok(0);
    }

    let existing_max = db
        .shopping_items_in_category(new)?
        .iter()
        .map(|i| i.sort_order)
        .reduce(f64::max);
    let positions: Vec<(i64, &str, f64)> = match existing_max {
        Some(max) => {
            let mut order = max;
            moving
                .iter()
                .map(|i| {
                    order += SORT_INCREMENT;
                    (i.id, new, order)
                })
                .collect()
        }
        None => moving.iter().map(|i| (i.id, new, i.sort_order)).collect(),
    };
    db.set_shopping_positions(&positions)
}

/// Flip an item's checked flag. An unchecked item goes back to the end of
/// its category, or merges into an unchecked duplicate if one appeared.
pub fn toggle_checked(db: &Database, id: i64) -> Result<ShoppingListItem> {
    let item = db.get_shopping_item(id)?;
    if !item.is_checked {
        return db.set_shopping_checked(id, true, item.sort_order);
    }

    if let Some(duplicate) = db.find_unchecked_shopping_item(&item.name, &item.unit)? {
        debug!(id, into = duplicate.id, "unchecked item merged into duplicate");
        return db.merge_shopping_items(duplicate.id, id);
    }
    let sort_order = next_sort_order(db, &item.category)?;
    db.set_shopping_checked(id, false, sort_order)
}

/// Transfer every checked item into the pantry, one transaction per item.
/// Failures are collected and do not stop the remaining items.
pub fn move_checked_to_pantry(db: &Database) -> Result<MoveSummary> {
    let mut summary = MoveSummary::default();
    for item in db.checked_shopping_items()? {
        match db.move_item_to_pantry(&item) {
            Ok(PantryMove::Merged(_)) => summary.merged += 1,
            Ok(PantryMove::Created(_)) => summary.created += 1,
            Err(e) => {
                warn!(item_id = item.id, error = %format!("{e:#}"), "failed to move item to pantry");
                summary.failed += 1;
                summary.failures.push(MoveFailure {
                    item_id: item.id,
                    name: item.name.clone(),
                    error: format!("{e:#}"),
                });
            }
        }
    }
    Ok(summary)
}

pub fn clear_list(db: &Database) -> Result<usize> {
    db.clear_shopping_list()
}

pub fn clear_checked(db: &Database) -> Result<usize> {
    db.clear_checked_shopping()
}

/// The list as shown: unchecked items grouped by category in aisle order,
/// checked items apart.
pub fn shopping_list(db: &Database) -> Result<ShoppingListView> {
    let mut view = ShoppingListView::default();
    for item in db.list_shopping_items()? {
        if item.is_checked {
            view.checked.push(item);
            continue;
        }
        match view
            .categories
            .iter_mut()
            .find(|g| g.category == item.category)
        {
            Some(group) => group.items.push(item),
            None => view.categories.push(CategoryGroup {
                category: item.category.clone(),
                items: vec![item],
            }),
        }
    }
    view.categories
        .sort_by(|a, b| compare_categories(&a.category, &b.category));
    Ok(view)
}
