use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::category::classify;
use crate::db::Database;
use crate::models::{
    MealPlanItem, NewMealPlanItem, NewPantryItem, NewRecipe, NewShoppingItem, PantryItem,
    PlanRange, Recipe, ShoppingListItem, UpdatePantryItem, validate_meal_slot,
    validate_new_pantry_item, validate_new_plan_entry, validate_new_recipe,
    validate_pantry_update,
};
use crate::planner::{self, PlanGenerationSummary};
use crate::quantity::{normalize_unit, parse_pasted_list};
use crate::recompute::{
    self, MatchRecomputer, RecomputeReport, RecomputeScheduler, RecomputeState,
};
use crate::shopping::{
    self, AddOutcome, BatchAddSummary, MoveSummary, ReorderTarget, ShoppingInput,
    ShoppingListView,
};

/// External source of shopping suggestions (an AI assistant, a household
/// template, ...). Whatever it returns goes through the normal merge rules.
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    async fn suggest(&self, pantry: &[PantryItem]) -> Result<Vec<NewShoppingItem>>;
}

/// Entry point for every larder operation.
///
/// Owns the single database connection and the match recomputer. Pantry
/// writes publish a change once committed; recipe writes recompute their own
/// recipe before returning.
pub struct LarderService {
    db: Arc<Mutex<Database>>,
    recomputer: Arc<MatchRecomputer>,
}

#[allow(clippy::unused_async)]
impl LarderService {
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path, debounce: Duration) -> Result<Self> {
        Self::from_database(Database::open(path)?, debounce)
    }

    pub fn open_in_memory(debounce: Duration) -> Result<Self> {
        Self::from_database(Database::open_in_memory()?, debounce)
    }

    pub fn from_database(db: Database, debounce: Duration) -> Result<Self> {
        let db = Arc::new(Mutex::new(db));
        let recomputer = Arc::new(MatchRecomputer::new(Arc::clone(&db), debounce)?);
        Ok(Self { db, recomputer })
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pantry_committed(&self) {
        self.recomputer.pantry_changed();
    }

    // --- Pantry ---

    pub async fn add_pantry_item(&self, mut item: NewPantryItem) -> Result<PantryItem> {
        validate_new_pantry_item(&item)?;
        item.unit = normalize_unit(&item.unit);
        if item.category.as_deref().is_none_or(|c| c.trim().is_empty()) {
            item.category = Some(classify(&item.name).to_string());
        }
        let created = self.db().insert_pantry_item(&item)?;
        self.pantry_committed();
        Ok(created)
    }

    pub async fn update_pantry_item(
        &self,
        id: i64,
        mut update: UpdatePantryItem,
    ) -> Result<PantryItem> {
        validate_pantry_update(&update)?;
        if let Some(unit) = update.unit.as_mut() {
            *unit = normalize_unit(unit);
        }
        let updated = self.db().update_pantry_item(id, &update)?;
        self.pantry_committed();
        Ok(updated)
    }

    pub async fn delete_pantry_item(&self, id: i64) -> Result<bool> {
        let deleted = self.db().delete_pantry_item(id)?;
        if deleted {
            self.pantry_committed();
        }
        Ok(deleted)
    }

    pub async fn get_pantry_item(&self, id: i64) -> Result<PantryItem> {
        self.db().get_pantry_item(id)
    }

    pub async fn list_pantry(&self) -> Result<Vec<PantryItem>> {
        self.db().list_pantry()
    }

    pub async fn low_stock(&self) -> Result<Vec<PantryItem>> {
        self.db().low_stock()
    }

    pub async fn expiring_within(&self, today: NaiveDate, days: i64) -> Result<Vec<PantryItem>> {
        self.db().expiring_within(today, days)
    }

    /// Put the shortfall of every low-stock pantry item on the shopping list.
    pub async fn restock_low_items(&self) -> Result<BatchAddSummary> {
        let db = self.db();
        let items: Vec<NewShoppingItem> = db
            .low_stock()?
            .into_iter()
            .filter_map(|p| {
                let missing = p.min_quantity? - p.quantity;
                Some(NewShoppingItem {
                    category: Some(p.category.clone()),
                    ..NewShoppingItem::new(&p.name, missing, &p.unit)
                })
            })
            .collect();
        shopping::add_items_batch(&db, items)
    }

    // --- Recipes ---

    fn refresh_match(db: &Database, recipe_id: i64) -> Result<Recipe> {
        if let Err(e) = recompute::recompute_recipe(db, recipe_id) {
            warn!(recipe_id, error = %format!("{e:#}"), "failed to compute pantry match");
        }
        db.get_recipe(recipe_id)
    }

    pub async fn create_recipe(&self, recipe: NewRecipe) -> Result<Recipe> {
        validate_new_recipe(&recipe)?;
        let db = self.db();
        let created = db.insert_recipe(&recipe)?;
        info!(recipe_id = created.id, name = %created.name, "recipe created");
        Self::refresh_match(&db, created.id)
    }

    pub async fn update_recipe(&self, id: i64, recipe: NewRecipe) -> Result<Recipe> {
        validate_new_recipe(&recipe)?;
        let db = self.db();
        db.update_recipe(id, &recipe)?;
        Self::refresh_match(&db, id)
    }

    pub async fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.db().get_recipe(id)
    }

    pub async fn list_recipes(&self) -> Result<Vec<Recipe>> {
        self.db().list_recipes()
    }

    pub async fn delete_recipe(&self, id: i64) -> Result<bool> {
        self.db().delete_recipe(id)
    }

    /// Full recompute right now, bypassing the debounce window.
    pub async fn recompute_all(&self) -> Result<RecomputeReport> {
        recompute::recompute_all(&self.db())
    }

    #[must_use]
    pub fn recompute_state(&self) -> RecomputeState {
        self.recomputer.state()
    }

    #[must_use]
    pub fn recomputer(&self) -> &MatchRecomputer {
        &self.recomputer
    }

    // --- Shopping list ---

    pub async fn add_shopping_item(&self, input: ShoppingInput) -> Result<AddOutcome> {
        shopping::add_item(&self.db(), input)
    }

    pub async fn add_shopping_items(&self, items: Vec<NewShoppingItem>) -> Result<BatchAddSummary> {
        shopping::add_items_batch(&self.db(), items)
    }

    /// Bulk paste: one item per line.
    pub async fn paste_shopping_list(&self, text: &str) -> Result<BatchAddSummary> {
        let items = parse_pasted_list(text)
            .into_iter()
            .map(NewShoppingItem::from)
            .collect();
        shopping::add_items_batch(&self.db(), items)
    }

    pub async fn import_suggestions(
        &self,
        provider: &dyn SuggestionProvider,
    ) -> Result<BatchAddSummary> {
        let pantry = self.db().list_pantry()?;
        // Provider may be slow; the connection is not held while it runs
        let suggestions = provider.suggest(&pantry).await?;
        info!(count = suggestions.len(), "importing shopping suggestions");
        shopping::add_items_batch(&self.db(), suggestions)
    }

    pub async fn shopping_list(&self) -> Result<ShoppingListView> {
        shopping::shopping_list(&self.db())
    }

    pub async fn get_shopping_item(&self, id: i64) -> Result<ShoppingListItem> {
        self.db().get_shopping_item(id)
    }

    pub async fn toggle_checked(&self, id: i64) -> Result<ShoppingListItem> {
        shopping::toggle_checked(&self.db(), id)
    }

    pub async fn reorder(&self, dragged_id: i64, target: ReorderTarget) -> Result<ShoppingListItem> {
        shopping::reorder(&self.db(), dragged_id, target)
    }

    pub async fn rebalance_category(&self, category: &str) -> Result<usize> {
        shopping::rebalance_category(&self.db(), category)
    }

    pub async fn rename_category(&self, old: &str, new: &str) -> Result<usize> {
        shopping::rename_category(&self.db(), old, new)
    }

    pub async fn delete_shopping_item(&self, id: i64) -> Result<bool> {
        self.db().delete_shopping_item(id)
    }

    pub async fn move_checked_to_pantry(&self) -> Result<MoveSummary> {
        let summary = shopping::move_checked_to_pantry(&self.db())?;
        if summary.moved() > 0 {
            self.pantry_committed();
        }
        Ok(summary)
    }

    pub async fn clear_list(&self) -> Result<usize> {
        shopping::clear_list(&self.db())
    }

    pub async fn clear_checked(&self) -> Result<usize> {
        shopping::clear_checked(&self.db())
    }

    // --- Meal plan ---

    pub async fn add_plan_entry(&self, mut entry: NewMealPlanItem) -> Result<MealPlanItem> {
        validate_new_plan_entry(&entry)?;
        entry.meal_slot = validate_meal_slot(&entry.meal_slot)?;
        let db = self.db();
        if let Some(recipe_id) = entry.recipe_id {
            if !db.recipe_exists(recipe_id)? {
                bail!("Recipe {recipe_id} not found");
            }
        }
        db.insert_plan_entry(&entry)
    }

    pub async fn list_plan(&self, range: PlanRange) -> Result<Vec<MealPlanItem>> {
        self.db().list_plan(range)
    }

    pub async fn set_plan_cooked(&self, id: i64, cooked: bool) -> Result<MealPlanItem> {
        self.db().set_plan_cooked(id, cooked)
    }

    pub async fn delete_plan_entry(&self, id: i64) -> Result<bool> {
        self.db().delete_plan_entry(id)
    }

    pub async fn generate_shopping_list(&self, range: PlanRange) -> Result<PlanGenerationSummary> {
        planner::generate_from_plan(&self.db(), range)
    }

    // --- Lifecycle ---

    /// Settle the pending recompute: run it now when `flush` is set, drop it
    /// otherwise.
    pub async fn shutdown(&self, flush: bool) -> Option<RecomputeReport> {
        if flush {
            self.recomputer.flush().await
        } else {
            self.recomputer.cancel_pending();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ingredient, IngredientGroup};

    struct MockProvider {
        items: Vec<NewShoppingItem>,
    }

    #[async_trait]
    impl SuggestionProvider for MockProvider {
        async fn suggest(&self, _pantry: &[PantryItem]) -> Result<Vec<NewShoppingItem>> {
            Ok(self.items.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl SuggestionProvider for FailingProvider {
        async fn suggest(&self, _pantry: &[PantryItem]) -> Result<Vec<NewShoppingItem>> {
            bail!("suggestion service unavailable")
        }
    }

    const DEBOUNCE: Duration = Duration::from_millis(500);

    fn service() -> LarderService {
        LarderService::open_in_memory(DEBOUNCE).unwrap()
    }

    fn pantry(name: &str, quantity: f64) -> NewPantryItem {
        NewPantryItem {
            name: name.to_string(),
            quantity,
            unit: "piece".to_string(),
            expiry_date: None,
            category: None,
            min_quantity: None,
        }
    }

    fn eggs_and_milk() -> NewRecipe {
        NewRecipe {
            name: "Custard".to_string(),
            servings: "4".to_string(),
            ingredient_groups: vec![IngredientGroup {
                title: String::new(),
                ingredients: vec![
                    Ingredient {
                        quantity: "4".to_string(),
                        unit: String::new(),
                        name: "Eggs".to_string(),
                    },
                    Ingredient {
                        quantity: "1".to_string(),
                        unit: "l".to_string(),
                        name: "Milk".to_string(),
                    },
                ],
            }],
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_recipe_computes_match_immediately() {
        let svc = service();
        svc.add_pantry_item(pantry("Eggs", 2.0)).await.unwrap();
        svc.shutdown(false).await;

        let recipe = svc.create_recipe(eggs_and_milk()).await.unwrap();
        assert_eq!(recipe.pantry_match_percentage, Some(0));
        assert_eq!(recipe.ingredient_count, Some(2));

        // Planning more servings does not change the match
        svc.add_plan_entry(NewMealPlanItem {
            date: date(10),
            meal_slot: "Dinner".to_string(),
            recipe_id: Some(recipe.id),
            note: None,
            servings_override: Some(8.0),
        })
        .await
        .unwrap();
        svc.recompute_all().await.unwrap();
        let recipe = svc.get_recipe(recipe.id).await.unwrap();
        assert_eq!(recipe.pantry_match_percentage, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_match_write_does_not_fail_the_mutation() {
        let svc = service();
        let custard = svc.create_recipe(eggs_and_milk()).await.unwrap();
        svc.db()
            .execute_batch(
                "CREATE TRIGGER freeze_matches BEFORE UPDATE OF pantry_match_percentage ON recipes
                 BEGIN SELECT RAISE(ABORT, 'matches frozen'); END;",
            )
            .unwrap();

        // Recipe write succeeds even though its own match cannot be stored
        let flan = svc
            .create_recipe(NewRecipe {
                name: "Flan".to_string(),
                ..eggs_and_milk()
            })
            .await
            .unwrap();
        assert_eq!(flan.pantry_match_percentage, None);

        // Pantry write succeeds; the debounced pass counts the failures
        svc.add_pantry_item(pantry("Eggs", 12.0)).await.unwrap();
        svc.add_pantry_item(pantry("Milk", 2.0)).await.unwrap();
        let report = svc.recomputer().flush().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.updated, 0);
        assert_eq!(report.failed, 2);

        let custard = svc.get_recipe(custard.id).await.unwrap();
        assert_eq!(custard.pantry_match_percentage, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pantry_write_schedules_recompute() {
        let svc = service();
        let recipe = svc.create_recipe(eggs_and_milk()).await.unwrap();
        assert_eq!(recipe.pantry_match_percentage, Some(0));
        assert_eq!(svc.recompute_state(), RecomputeState::Idle);

        svc.add_pantry_item(pantry("eggs", 12.0)).await.unwrap();
        let milk = svc.add_pantry_item(pantry("Milk", 0.5)).await.unwrap();
        assert_eq!(svc.recompute_state(), RecomputeState::Scheduled);
        svc.update_pantry_item(
            milk.id,
            UpdatePantryItem {
                quantity: Some(2.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(DEBOUNCE * 2).await;
        svc.shutdown(true).await;
        assert_eq!(svc.recomputer().completed_passes(), 1);
        let recipe = svc.get_recipe(recipe.id).await.unwrap();
        assert_eq!(recipe.pantry_match_percentage, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending_recompute() {
        let svc = service();
        let recipe = svc.create_recipe(eggs_and_milk()).await.unwrap();
        svc.add_pantry_item(pantry("Eggs", 4.0)).await.unwrap();

        let report = svc.shutdown(true).await.unwrap();
        assert_eq!(report.updated, 1);
        let recipe = svc.get_recipe(recipe.id).await.unwrap();
        assert_eq!(recipe.pantry_match_percentage, Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_without_flush_drops_pending() {
        let svc = service();
        let recipe = svc.create_recipe(eggs_and_milk()).await.unwrap();
        svc.add_pantry_item(pantry("Eggs", 4.0)).await.unwrap();

        assert!(svc.shutdown(false).await.is_none());
        tokio::time::sleep(DEBOUNCE * 4).await;
        let recipe = svc.get_recipe(recipe.id).await.unwrap();
        assert_eq!(recipe.pantry_match_percentage, Some(0));
    }

    #[tokio::test]
    async fn test_add_pantry_item_classifies_and_normalizes() {
        let svc = service();
        let mut item = pantry("Cheddar", 200.0);
        item.unit = "Grams".to_string();
        let created = svc.add_pantry_item(item).await.unwrap();
        assert_eq!(created.category, "Dairy & Eggs");
        assert_eq!(created.unit, "g");

        assert!(svc.add_pantry_item(pantry(" ", 1.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_restock_low_items() {
        let svc = service();
        let mut rice = pantry("Rice", 0.5);
        rice.unit = "kg".to_string();
        rice.min_quantity = Some(2.0);
        svc.add_pantry_item(rice).await.unwrap();
        let mut oats = pantry("Oats", 3.0);
        oats.min_quantity = Some(1.0);
        svc.add_pantry_item(oats).await.unwrap();

        let summary = svc.restock_low_items().await.unwrap();
        assert_eq!(summary.added, 1);
        let view = svc.shopping_list().await.unwrap();
        let rice = &view.categories[0].items[0];
        assert_eq!(rice.name, "Rice");
        assert!((rice.quantity - 1.5).abs() < f64::EPSILON);
        assert_eq!(rice.category, "Pantry Staples");

        // Running again merges rather than duplicating
        let again = svc.restock_low_items().await.unwrap();
        assert_eq!(again.updated, 1);
        assert_eq!(svc.shopping_list().await.unwrap().categories.len(), 1);
    }

    #[tokio::test]
    async fn test_import_suggestions_merges() {
        let svc = service();
        svc.add_shopping_item(ShoppingInput::Line("2 l milk".to_string()))
            .await
            .unwrap();
        let provider = MockProvider {
            items: vec![
                NewShoppingItem::new("Milk", 1.0, "litres"),
                NewShoppingItem::new("Coffee", 1.0, "bag"),
                NewShoppingItem::new("", 1.0, "piece"),
            ],
        };

        let summary = svc.import_suggestions(&provider).await.unwrap();
        assert_eq!(
            summary,
            BatchAddSummary {
                added: 1,
                updated: 1,
                skipped: 1,
                ..BatchAddSummary::default()
            }
        );
        assert!(svc.import_suggestions(&FailingProvider).await.is_err());
    }

    #[tokio::test]
    async fn test_paste_shopping_list() {
        let svc = service();
        let summary = svc
            .paste_shopping_list("- 2 kg flour\n\n* eggs 6\n1. butter\n- Flour 1 kg")
            .await
            .unwrap();
        assert_eq!(summary.added, 3);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_checked_to_pantry_publishes() {
        let svc = service();
        let item = svc
            .add_shopping_item(ShoppingInput::Line("6 eggs".to_string()))
            .await
            .unwrap()
            .item;
        svc.toggle_checked(item.id).await.unwrap();

        let summary = svc.move_checked_to_pantry().await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(svc.recompute_state(), RecomputeState::Scheduled);

        let eggs = svc.list_pantry().await.unwrap();
        assert_eq!(eggs.len(), 1);
        assert!((eggs[0].quantity - 6.0).abs() < f64::EPSILON);
        svc.shutdown(false).await;
    }

    #[tokio::test]
    async fn test_plan_entry_requires_existing_recipe() {
        let svc = service();
        let result = svc
            .add_plan_entry(NewMealPlanItem {
                date: date(10),
                meal_slot: "lunch".to_string(),
                recipe_id: Some(42),
                note: None,
                servings_override: None,
            })
            .await;
        assert!(result.is_err());

        let note = svc
            .add_plan_entry(NewMealPlanItem {
                date: date(10),
                meal_slot: "LUNCH".to_string(),
                recipe_id: None,
                note: Some("leftovers".to_string()),
                servings_override: None,
            })
            .await
            .unwrap();
        assert_eq!(note.meal_slot, "lunch");
    }

    #[tokio::test]
    async fn test_generate_shopping_list_from_plan() {
        let svc = service();
        let recipe = svc.create_recipe(eggs_and_milk()).await.unwrap();
        svc.add_plan_entry(NewMealPlanItem {
            date: date(11),
            meal_slot: "breakfast".to_string(),
            recipe_id: Some(recipe.id),
            note: None,
            servings_override: None,
        })
        .await
        .unwrap();
        let range = PlanRange::new(date(10), date(16)).unwrap();

        let first = svc.generate_shopping_list(range).await.unwrap();
        assert_eq!(first.added, 2);
        let second = svc.generate_shopping_list(range).await.unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.topped_up, 0);
    }
}
