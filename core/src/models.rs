use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Catch-all shopping/pantry category.
pub const DEFAULT_CATEGORY: &str = "Other";

/// Unit assigned when none can be recognized.
pub const DEFAULT_UNIT: &str = "piece";

pub const MEAL_SLOTS: &[&str] = &["breakfast", "lunch", "dinner"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PantryItem {
    pub id: i64,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_quantity: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl PantryItem {
    /// True when a reorder threshold is set and stock has fallen below it.
    #[must_use]
    pub fn is_low(&self) -> bool {
        self.min_quantity.is_some_and(|min| self.quantity < min)
    }
}

#[derive(Debug, Clone)]
pub struct NewPantryItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub expiry_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub min_quantity: Option<f64>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdatePantryItem {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub expiry_date: Option<Option<NaiveDate>>,
    pub category: Option<String>,
    pub min_quantity: Option<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub unit: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngredientGroup {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub servings: String,
    pub ingredient_groups: Vec<IngredientGroup>,
    // Derived by the match recompute engine, NULL until first computed
    pub pantry_match_percentage: Option<i64>,
    pub ingredient_count: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Recipe {
    /// All ingredients across every group, in declaration order.
    pub fn ingredients(&self) -> impl Iterator<Item = &Ingredient> {
        self.ingredient_groups
            .iter()
            .flat_map(|g| g.ingredients.iter())
    }
}

#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub name: String,
    pub servings: String,
    pub ingredient_groups: Vec<IngredientGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingListItem {
    pub id: i64,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: String,
    pub is_checked: bool,
    pub sort_order: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewShoppingItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: Option<String>,
    pub recipe_id: Option<i64>,
}

impl NewShoppingItem {
    #[must_use]
    pub fn new(name: &str, quantity: f64, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            quantity,
            unit: unit.to_string(),
            category: None,
            recipe_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MealPlanItem {
    pub id: i64,
    pub date: String,
    pub meal_slot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servings_override: Option<f64>,
    pub is_cooked: bool,
    pub created_at: String,
    pub updated_at: String,
    // Joined field for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMealPlanItem {
    pub date: NaiveDate,
    pub meal_slot: String,
    pub recipe_id: Option<i64>,
    pub note: Option<String>,
    pub servings_override: Option<f64>,
}

/// Inclusive date range for meal-plan queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PlanRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            bail!("Plan range end {end} is before start {start}");
        }
        Ok(Self { start, end })
    }
}

pub fn validate_meal_slot(slot: &str) -> Result<String> {
    let lower = slot.trim().to_lowercase();
    if MEAL_SLOTS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid meal slot '{slot}'. Must be one of: {}",
            MEAL_SLOTS.join(", ")
        )
    }
}

pub fn validate_new_pantry_item(item: &NewPantryItem) -> Result<()> {
    if item.name.trim().is_empty() {
        bail!("Pantry item name must not be empty");
    }
    if !item.quantity.is_finite() || item.quantity < 0.0 {
        bail!("Pantry quantity must be zero or greater");
    }
    if item.min_quantity.is_some_and(|m| !m.is_finite() || m < 0.0) {
        bail!("min_quantity must be zero or greater");
    }
    Ok(())
}

pub fn validate_pantry_update(update: &UpdatePantryItem) -> Result<()> {
    if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        bail!("Pantry item name must not be empty");
    }
    if update.quantity.is_some_and(|q| !q.is_finite() || q < 0.0) {
        bail!("Pantry quantity must be zero or greater");
    }
    if update
        .min_quantity
        .flatten()
        .is_some_and(|m| !m.is_finite() || m < 0.0)
    {
        bail!("min_quantity must be zero or greater");
    }
    Ok(())
}

pub fn validate_new_recipe(recipe: &NewRecipe) -> Result<()> {
    if recipe.name.trim().is_empty() {
        bail!("Recipe name must not be empty");
    }
    for group in &recipe.ingredient_groups {
        if group.ingredients.iter().any(|i| i.name.trim().is_empty()) {
            bail!("Ingredient names must not be empty");
        }
    }
    Ok(())
}

/// A plan entry references a recipe or carries a note, never both.
pub fn validate_new_plan_entry(entry: &NewMealPlanItem) -> Result<()> {
    validate_meal_slot(&entry.meal_slot)?;
    let has_note = entry.note.as_deref().is_some_and(|n| !n.trim().is_empty());
    match (entry.recipe_id, has_note) {
        (Some(_), true) => bail!("A meal plan entry takes either a recipe or a note, not both"),
        (None, false) => bail!("A meal plan entry needs a recipe or a note"),
        _ => {}
    }
    if entry
        .servings_override
        .is_some_and(|s| !s.is_finite() || s <= 0.0)
    {
        bail!("servings_override must be greater than 0");
    }
    Ok(())
}
