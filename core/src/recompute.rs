use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::matcher::{PantryIndex, is_optional};
use crate::models::Recipe;
use crate::quantity;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub percentage: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeReport {
    pub scanned: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Match a recipe's declared quantities against a pantry snapshot.
///
/// Optional ingredients always count as satisfied. A numeric requirement is
/// met when the pantry holds at least that much under the same folded name;
/// a non-numeric one ("to taste") is met by any positive stock. Units are
/// not compared. A recipe without ingredients matches 100%.
#[must_use]
pub fn compute_match(recipe: &Recipe, pantry: &PantryIndex) -> MatchResult {
    let mut total: i64 = 0;
    let mut satisfied: i64 = 0;
    for ingredient in recipe.ingredients() {
        total += 1;
        if is_optional(&ingredient.name) {
            satisfied += 1;
            continue;
        }
        let have = pantry.quantity_of(&ingredient.name);
        let met = match quantity::parse(&ingredient.quantity).amount() {
            Some(required) => have >= required,
            None => have > 0.0,
        };
        if met {
            satisfied += 1;
        }
    }

    if total == 0 {
        return MatchResult {
            percentage: 100,
            count: 0,
        };
    }
    // Integer round-half-up of satisfied / total * 100
    let percentage = (200 * satisfied + total) / (2 * total);
    MatchResult {
        percentage,
        count: total,
    }
}

fn needs_write(recipe: &Recipe, result: MatchResult) -> bool {
    recipe.pantry_match_percentage != Some(result.percentage)
        || recipe.ingredient_count != Some(result.count)
}

/// Recompute every recipe against a single pantry snapshot.
///
/// Rows whose derived values are unchanged are not written. Per-recipe write
/// failures are logged and counted, never propagated.
pub fn recompute_all(db: &Database) -> Result<RecomputeReport> {
    let pantry = PantryIndex::from_items(&db.list_pantry().context("Failed to read pantry")?);
    let recipes = db.list_recipes().context("Failed to read recipes")?;

    let mut report = RecomputeReport {
        scanned: recipes.len(),
        ..Default::default()
    };
    for recipe in &recipes {
        let result = compute_match(recipe, &pantry);
        if !needs_write(recipe, result) {
            continue;
        }
        match db.set_recipe_match(recipe.id, result.percentage, result.count) {
            Ok(()) => report.updated += 1,
            Err(e) => {
                warn!(recipe_id = recipe.id, error = %format!("{e:#}"), "failed to store pantry match");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Recompute one recipe. Returns whether its stored values changed.
pub fn recompute_recipe(db: &Database, recipe_id: i64) -> Result<bool> {
    let recipe = db.get_recipe(recipe_id)?;
    let pantry = PantryIndex::from_items(&db.list_pantry()?);
    let result = compute_match(&recipe, &pantry);
    if !needs_write(&recipe, result) {
        return Ok(false);
    }
    db.set_recipe_match(recipe_id, result.percentage, result.count)?;
    Ok(true)
}

/// Receives the "pantry committed a change" signal.
pub trait RecomputeScheduler: Send + Sync {
    fn pantry_changed(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeState {
    Idle,
    Scheduled,
    Recomputing,
}

struct Shared {
    db: Arc<Mutex<Database>>,
    // Serializes passes; flush waits on it for an in-flight pass
    pass_lock: tokio::sync::Mutex<()>,
    running: AtomicUsize,
    completed: AtomicU64,
}

#[derive(Default)]
struct Pending {
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

/// Debounced full-pass recomputer for the derived recipe fields
/// `pantry_match_percentage` and `ingredient_count`.
///
/// Pantry writes publish through [`RecomputeScheduler`]; recipe writes
/// recompute their own recipe inline instead. At most one timer is pending. Every `pantry_changed` aborts it and arms a
/// fresh one, so a burst of changes yields exactly one pass once the window
/// has been quiet. A pass that has started is never cancelled.
pub struct MatchRecomputer {
    shared: Arc<Shared>,
    pending: Arc<Mutex<Pending>>,
    debounce: Duration,
    runtime: Handle,
}

impl MatchRecomputer {
    /// Must be called from within a tokio runtime; timers are spawned on it.
    pub fn new(db: Arc<Mutex<Database>>, debounce: Duration) -> Result<Self> {
        let runtime = Handle::try_current().context("Match recomputer needs a tokio runtime")?;
        Ok(Self {
            shared: Arc::new(Shared {
                db,
                pass_lock: tokio::sync::Mutex::new(()),
                running: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
            }),
            pending: Arc::new(Mutex::new(Pending::default())),
            debounce,
            runtime,
        })
    }

    #[must_use]
    pub fn state(&self) -> RecomputeState {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.timer.is_some() {
            RecomputeState::Scheduled
        } else if self.shared.running.load(Ordering::SeqCst) > 0 {
            RecomputeState::Recomputing
        } else {
            RecomputeState::Idle
        }
    }

    /// Number of full passes that finished successfully.
    #[must_use]
    pub fn completed_passes(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Run the pending pass now instead of waiting out the window. When
    /// nothing is pending, waits for an in-flight pass and returns `None`.
    pub async fn flush(&self) -> Option<RecomputeReport> {
        let had_pending = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.generation += 1;
            match pending.timer.take() {
                Some(timer) => {
                    timer.abort();
                    self.shared.running.fetch_add(1, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        };

        if had_pending {
            run_pass(Arc::clone(&self.shared)).await
        } else {
            let _idle = self.shared.pass_lock.lock().await;
            None
        }
    }

    /// Drop the pending pass, if any. Returns whether one was pending.
    pub fn cancel_pending(&self) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.generation += 1;
        match pending.timer.take() {
            Some(timer) => {
                timer.abort();
                debug!("pending pantry match recompute cancelled");
                true
            }
            None => false,
        }
    }
}

impl RecomputeScheduler for MatchRecomputer {
    fn pantry_changed(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        pending.generation += 1;
        let generation = pending.generation;

        let shared = Arc::clone(&self.shared);
        let slot = Arc::clone(&self.pending);
        let delay = self.debounce;
        pending.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = slot.lock().unwrap_or_else(PoisonError::into_inner);
                // A newer change or a flush/cancel superseded this timer
                if pending.generation != generation {
                    return;
                }
                pending.timer = None;
                shared.running.fetch_add(1, Ordering::SeqCst);
            }
            run_pass(shared).await;
        }));
        debug!(debounce_ms = delay.as_millis(), "pantry match recompute scheduled");
    }
}

impl Drop for MatchRecomputer {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

/// Caller must have incremented `running`.
async fn run_pass(shared: Arc<Shared>) -> Option<RecomputeReport> {
    let _pass = shared.pass_lock.lock().await;
    let db = Arc::clone(&shared.db);
    let result = tokio::task::spawn_blocking(move || {
        let db = db.lock().unwrap_or_else(PoisonError::into_inner);
        recompute_all(&db)
    })
    .await;
    shared.running.fetch_sub(1, Ordering::SeqCst);

    match result {
        Ok(Ok(report)) => {
            shared.completed.fetch_add(1, Ordering::SeqCst);
            info!(
                scanned = report.scanned,
                updated = report.updated,
                failed = report.failed,
                "pantry match recompute finished"
            );
            Some(report)
        }
        Ok(Err(e)) => {
            warn!(error = %format!("{e:#}"), "pantry match recompute failed");
            None
        }
        Err(e) => {
            warn!(error = %e, "pantry match recompute task died");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ingredient, IngredientGroup, NewPantryItem, NewRecipe};

    fn ingredient(quantity: &str, name: &str) -> Ingredient {
        Ingredient {
            quantity: quantity.to_string(),
            unit: String::new(),
            name: name.to_string(),
        }
    }

    fn new_recipe(name: &str, ingredients: Vec<Ingredient>) -> NewRecipe {
        NewRecipe {
            name: name.to_string(),
            servings: "2".to_string(),
            ingredient_groups: vec![IngredientGroup {
                title: String::new(),
                ingredients,
            }],
        }
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

    fn recipe_with(ingredients: Vec<Ingredient>) -> Recipe {
        Recipe {
            id: 1,
            name: "Test".to_string(),
            servings: "4".to_string(),
            ingredient_groups: vec![IngredientGroup {
                title: String::new(),
                ingredients,
            }],
            pantry_match_percentage: None,
            ingredient_count: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn index(db: &Database) -> PantryIndex {
        PantryIndex::from_items(&db.list_pantry().unwrap())
    }

    #[test]
    fn test_match_all_satisfied() {
        let db = Database::open_in_memory().unwrap();
        db.insert_pantry_item(&pantry("Eggs", 6.0)).unwrap();
        db.insert_pantry_item(&pantry("Milk", 1.0)).unwrap();
        let recipe = recipe_with(vec![ingredient("4", "eggs"), ingredient("1/2", "Milk")]);
        assert_eq!(
            compute_match(&recipe, &index(&db)),
            MatchResult {
                percentage: 100,
                count: 2
            }
        );
    }

    #[test]
    fn test_match_none_satisfied() {
        let db = Database::open_in_memory().unwrap();
        db.insert_pantry_item(&pantry("Eggs", 2.0)).unwrap();
        let recipe = recipe_with(vec![ingredient("4", "Eggs"), ingredient("1", "Milk")]);
        assert_eq!(compute_match(&recipe, &index(&db)).percentage, 0);
    }

    #[test]
    fn test_match_zero_ingredients() {
        let recipe = recipe_with(Vec::new());
        assert_eq!(
            compute_match(&recipe, &PantryIndex::default()),
            MatchResult {
                percentage: 100,
                count: 0
            }
        );
    }

    #[test]
    fn test_match_rounds_percentage() {
        let db = Database::open_in_memory().unwrap();
        db.insert_pantry_item(&pantry("Flour", 1.0)).unwrap();
        let recipe = recipe_with(vec![
            ingredient("1", "Flour"),
            ingredient("1", "Sugar"),
            ingredient("1", "Butter"),
        ]);
        assert_eq!(compute_match(&recipe, &index(&db)).percentage, 33);

        db.insert_pantry_item(&pantry("Sugar", 1.0)).unwrap();
        assert_eq!(compute_match(&recipe, &index(&db)).percentage, 67);
    }

    #[test]
    fn test_match_optional_and_text_quantities() {
        let db = Database::open_in_memory().unwrap();
        db.insert_pantry_item(&pantry("Salt", 1.0)).unwrap();
        db.insert_pantry_item(&pantry("Pepper", 0.0)).unwrap();
        let recipe = recipe_with(vec![
            ingredient("to taste", "Salt"),
            ingredient("to taste", "Pepper"),
            ingredient("1", "Parsley (optional)"),
        ]);
        let result = compute_match(&recipe, &index(&db));
        assert_eq!(result.count, 3);
        assert_eq!(result.percentage, 67);
    }

    #[test]
    fn test_match_range_uses_lower_bound() {
        let db = Database::open_in_memory().unwrap();
        db.insert_pantry_item(&pantry("Potatoes", 2.0)).unwrap();
        let recipe = recipe_with(vec![ingredient("2-3", "Potatoes")]);
        assert_eq!(compute_match(&recipe, &index(&db)).percentage, 100);
    }

    #[test]
    fn test_recompute_all_skips_unchanged_rows() {
        let db = Database::open_in_memory().unwrap();
        db.insert_recipe(&new_recipe("A", vec![ingredient("1", "Eggs")]))
            .unwrap();
        db.insert_recipe(&new_recipe("B", Vec::new())).unwrap();

        let first = recompute_all(&db).unwrap();
        assert_eq!(
            first,
            RecomputeReport {
                scanned: 2,
                updated: 2,
                failed: 0
            }
        );

        let second = recompute_all(&db).unwrap();
        assert_eq!(second.updated, 0);

        db.insert_pantry_item(&pantry("eggs", 1.0)).unwrap();
        let third = recompute_all(&db).unwrap();
        assert_eq!(third.updated, 1);
        let recipes = db.list_recipes().unwrap();
        assert!(recipes.iter().all(|r| r.pantry_match_percentage == Some(100)));
    }

    #[test]
    fn test_recompute_recipe() {
        let db = Database::open_in_memory().unwrap();
        let recipe = db
            .insert_recipe(&new_recipe("A", vec![ingredient("4", "Eggs"), ingredient("1", "Milk")]))
            .unwrap();
        db.insert_pantry_item(&pantry("Eggs", 2.0)).unwrap();

        assert!(recompute_recipe(&db, recipe.id).unwrap());
        assert!(!recompute_recipe(&db, recipe.id).unwrap());
        let stored = db.get_recipe(recipe.id).unwrap();
        assert_eq!(stored.pantry_match_percentage, Some(0));
        assert_eq!(stored.ingredient_count, Some(2));
        assert!(recompute_recipe(&db, 999).is_err());
    }

    fn shared_db() -> Arc<Mutex<Database>> {
        Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_bursts() {
        let db = shared_db();
        let recipe_id = {
            let db = db.lock().unwrap();
            db.insert_recipe(&new_recipe("A", vec![ingredient("3", "Eggs")]))
                .unwrap()
                .id
        };
        let recomputer = MatchRecomputer::new(Arc::clone(&db), Duration::from_millis(500)).unwrap();

        for quantity in [1.0, 2.0, 3.0] {
            db.lock().unwrap().insert_pantry_item(&pantry("Eggs", quantity)).unwrap();
            recomputer.pantry_changed();
            assert_eq!(recomputer.state(), RecomputeState::Scheduled);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(recomputer.completed_passes(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        recomputer.flush().await;
        assert_eq!(recomputer.completed_passes(), 1);
        assert_eq!(recomputer.state(), RecomputeState::Idle);

        let stored = db.lock().unwrap().get_recipe(recipe_id).unwrap();
        assert_eq!(stored.pantry_match_percentage, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_runs_pending_pass_now() {
        let db = shared_db();
        db.lock()
            .unwrap()
            .insert_recipe(&new_recipe("A", Vec::new()))
            .unwrap();
        let recomputer = MatchRecomputer::new(Arc::clone(&db), Duration::from_secs(60)).unwrap();

        recomputer.pantry_changed();
        let report = recomputer.flush().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(recomputer.completed_passes(), 1);
        assert_eq!(recomputer.state(), RecomputeState::Idle);

        // Nothing pending now
        assert!(recomputer.flush().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_drops_pass() {
        let db = shared_db();
        let recomputer = MatchRecomputer::new(Arc::clone(&db), Duration::from_millis(500)).unwrap();

        recomputer.pantry_changed();
        assert!(recomputer.cancel_pending());
        assert!(!recomputer.cancel_pending());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recomputer.completed_passes(), 0);
        assert_eq!(recomputer.state(), RecomputeState::Idle);
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(MatchRecomputer::new(shared_db(), DEFAULT_DEBOUNCE).is_err());
    }

    #[test]
    fn test_recompute_all_counts_failed_writes_and_continues() {
        let db = Database::open_in_memory().unwrap();
        db.insert_recipe(&new_recipe("Broken", vec![ingredient("1", "Eggs")]))
            .unwrap();
        let fine = db
            .insert_recipe(&new_recipe("Fine", vec![ingredient("1", "Eggs")]))
            .unwrap();
        db.execute_batch(
            "CREATE TRIGGER reject_broken BEFORE UPDATE ON recipes
             WHEN NEW.name = 'Broken'
             BEGIN SELECT RAISE(ABORT, 'recipe locked'); END;",
        )
        .unwrap();

        let report = recompute_all(&db).unwrap();
        assert_eq!(
            report,
            RecomputeReport {
                scanned: 2,
                updated: 1,
                failed: 1
            }
        );
        assert_eq!(db.get_recipe(fine.id).unwrap().pantry_match_percentage, Some(0));
    }

    #[tokio::test]
    async fn test_failed_pass_is_swallowed_and_next_pass_recovers() {
        let db = shared_db();
        let recipe_id = {
            let db = db.lock().unwrap();
            let id = db
                .insert_recipe(&new_recipe("A", vec![ingredient("1", "Eggs")]))
                .unwrap()
                .id;
            db.execute_batch("UPDATE recipes SET ingredient_groups = 'not json';")
                .unwrap();
            id
        };
        let recomputer = MatchRecomputer::new(Arc::clone(&db), Duration::from_secs(60)).unwrap();

        recomputer.pantry_changed();
        assert!(recomputer.flush().await.is_none());
        assert_eq!(recomputer.completed_passes(), 0);
        assert_eq!(recomputer.state(), RecomputeState::Idle);

        {
            let db = db.lock().unwrap();
            db.execute_batch(
                r#"UPDATE recipes SET ingredient_groups =
                   '[{"title":"","ingredients":[{"quantity":"1","unit":"","name":"Eggs"}]}]';"#,
            )
            .unwrap();
            db.insert_pantry_item(&pantry("Eggs", 2.0)).unwrap();
        }
        recomputer.pantry_changed();
        let report = recomputer.flush().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(recomputer.completed_passes(), 1);
        let stored = db.lock().unwrap().get_recipe(recipe_id).unwrap();
        assert_eq!(stored.pantry_match_percentage, Some(100));
    }

    #[tokio::test]
    async fn test_change_during_pass_schedules_one_more_pass() {
        let db = shared_db();
        db.lock()
            .unwrap()
            .insert_recipe(&new_recipe("A", vec![ingredient("1", "Eggs")]))
            .unwrap();
        let recomputer =
            Arc::new(MatchRecomputer::new(Arc::clone(&db), Duration::from_secs(60)).unwrap());

        // Hold the store so the first pass stays in flight
        let guard = db.lock().unwrap();
        recomputer.pantry_changed();
        let first = tokio::spawn({
            let recomputer = Arc::clone(&recomputer);
            async move { recomputer.flush().await }
        });
        for _ in 0..100 {
            if recomputer.state() == RecomputeState::Recomputing {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(recomputer.state(), RecomputeState::Recomputing);

        recomputer.pantry_changed();
        recomputer.pantry_changed();
        assert_eq!(recomputer.state(), RecomputeState::Scheduled);
        drop(guard);

        assert!(first.await.unwrap().is_some());
        assert_eq!(recomputer.completed_passes(), 1);
        assert_eq!(recomputer.state(), RecomputeState::Scheduled);

        assert!(recomputer.flush().await.is_some());
        assert_eq!(recomputer.completed_passes(), 2);
        assert!(recomputer.flush().await.is_none());
        assert_eq!(recomputer.completed_passes(), 2);
        assert_eq!(recomputer.state(), RecomputeState::Idle);
    }
}
