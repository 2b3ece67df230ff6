use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};

use crate::matcher::fold_name;
use crate::models::{
    DEFAULT_CATEGORY, IngredientGroup, MealPlanItem, NewMealPlanItem, NewPantryItem, NewRecipe,
    NewShoppingItem, PantryItem, PlanRange, Recipe, ShoppingListItem, UpdatePantryItem,
};

const PANTRY_COLUMNS: &str = "id, name, quantity, unit, expiry_date, category, min_quantity, \
                              created_at, updated_at";

const RECIPE_COLUMNS: &str = "id, name, servings, ingredient_groups, pantry_match_percentage, \
                              ingredient_count, created_at, updated_at";

const SHOPPING_COLUMNS: &str = "id, name, quantity, unit, category, is_checked, sort_order, \
                                recipe_id, created_at, updated_at";

/// What happened to the pantry when a checked shopping item was moved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PantryMove {
    /// Quantity was added to the existing pantry entry with this id.
    Merged(i64),
    /// A new pantry entry with this id was created.
    Created(i64),
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS pantry_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    name_key TEXT NOT NULL,
                    quantity REAL NOT NULL CHECK (quantity >= 0),
                    unit TEXT NOT NULL,
                    expiry_date TEXT,
                    category TEXT NOT NULL,
                    min_quantity REAL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    servings TEXT NOT NULL DEFAULT '',
                    ingredient_groups TEXT NOT NULL DEFAULT '[]',
                    pantry_match_percentage INTEGER,
                    ingredient_count INTEGER,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS shopping_list_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    name_key TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL,
                    category TEXT NOT NULL,
                    is_checked INTEGER NOT NULL DEFAULT 0,
                    sort_order REAL NOT NULL,
                    recipe_id INTEGER,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_plan_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    date TEXT NOT NULL,
                    meal_slot TEXT NOT NULL
                        CHECK (meal_slot IN ('breakfast', 'lunch', 'dinner')),
                    recipe_id INTEGER,
                    note TEXT,
                    servings_override REAL,
                    is_cooked INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    CHECK ((recipe_id IS NULL) != (note IS NULL))
                );

                CREATE INDEX IF NOT EXISTS idx_pantry_name_key ON pantry_items(name_key);
                CREATE INDEX IF NOT EXISTS idx_shopping_name_key ON shopping_list_items(name_key, unit);
                CREATE INDEX IF NOT EXISTS idx_shopping_category ON shopping_list_items(category, sort_order);
                CREATE INDEX IF NOT EXISTS idx_meal_plan_date ON meal_plan_items(date);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // --- Row mapping helpers ---

    fn pantry_from_row(row: &rusqlite::Row) -> rusqlite::Result<PantryItem> {
        Ok(PantryItem {
            id: row.get(0)?,
            name: row.get(1)?,
            quantity: row.get(2)?,
            unit: row.get(3)?,
            expiry_date: row.get(4)?,
            category: row.get(5)?,
            min_quantity: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        let groups_json: String = row.get(3)?;
        let ingredient_groups: Vec<IngredientGroup> = serde_json::from_str(&groups_json)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?;
        Ok(Recipe {
            id: row.get(0)?,
            name: row.get(1)?,
            servings: row.get(2)?,
            ingredient_groups,
            pantry_match_percentage: row.get(4)?,
            ingredient_count: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn shopping_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingListItem> {
        Ok(ShoppingListItem {
            id: row.get(0)?,
            name: row.get(1)?,
            quantity: row.get(2)?,
            unit: row.get(3)?,
            category: row.get(4)?,
            is_checked: row.get(5)?,
            sort_order: row.get(6)?,
            recipe_id: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    // Expects columns:
    // 0: p.id, 1: p.date, 2: p.meal_slot, 3: p.recipe_id, 4: p.note,
    // 5: p.servings_override, 6: p.is_cooked, 7: p.created_at, 8: p.updated_at,
    // 9: r.name
    fn plan_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealPlanItem> {
        Ok(MealPlanItem {
            id: row.get(0)?,
            date: row.get(1)?,
            meal_slot: row.get(2)?,
            recipe_id: row.get(3)?,
            note: row.get(4)?,
            servings_override: row.get(5)?,
            is_cooked: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            recipe_name: row.get(9)?,
        })
    }

    // --- Pantry ---

    pub fn insert_pantry_item(&self, item: &NewPantryItem) -> Result<PantryItem> {
        let now = Local::now().to_rfc3339();
        let name = item.name.trim();
        let expiry = item.expiry_date.map(|d| d.format("%Y-%m-%d").to_string());
        let category = item.category.as_deref().unwrap_or(DEFAULT_CATEGORY);
        self.conn.execute(
            "INSERT INTO pantry_items (name, name_key, quantity, unit, expiry_date, category,
                                       min_quantity, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                name,
                fold_name(name),
                item.quantity,
                item.unit,
                expiry,
                category,
                item.min_quantity,
                now,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_pantry_item(id)
    }

    pub fn get_pantry_item(&self, id: i64) -> Result<PantryItem> {
        self.conn
            .query_row(
                &format!("SELECT {PANTRY_COLUMNS} FROM pantry_items WHERE id = ?1"),
                params![id],
                Self::pantry_from_row,
            )
            .with_context(|| format!("Pantry item {id} not found"))
    }

    pub fn list_pantry(&self) -> Result<Vec<PantryItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PANTRY_COLUMNS} FROM pantry_items ORDER BY name_key, id"
        ))?;
        let items = stmt
            .query_map([], Self::pantry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// First pantry entry (lowest id) whose folded name equals `name`'s.
    pub fn find_pantry_by_name(&self, name: &str) -> Result<Option<PantryItem>> {
        let item = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PANTRY_COLUMNS} FROM pantry_items WHERE name_key = ?1
                     ORDER BY id LIMIT 1"
                ),
                params![fold_name(name)],
                Self::pantry_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn update_pantry_item(&self, id: i64, update: &UpdatePantryItem) -> Result<PantryItem> {
        // Verify existence
        self.get_pantry_item(id)?;

        let now = Local::now().to_rfc3339();
        if let Some(ref name) = update.name {
            let name = name.trim();
            self.conn.execute(
                "UPDATE pantry_items SET name = ?1, name_key = ?2, updated_at = ?3 WHERE id = ?4",
                params![name, fold_name(name), now, id],
            )?;
        }
        if let Some(quantity) = update.quantity {
            self.conn.execute(
                "UPDATE pantry_items SET quantity = ?1, updated_at = ?2 WHERE id = ?3",
                params![quantity, now, id],
            )?;
        }
        if let Some(ref unit) = update.unit {
            self.conn.execute(
                "UPDATE pantry_items SET unit = ?1, updated_at = ?2 WHERE id = ?3",
                params![unit, now, id],
            )?;
        }
        if let Some(expiry) = update.expiry_date {
            let expiry = expiry.map(|d| d.format("%Y-%m-%d").to_string());
            self.conn.execute(
                "UPDATE pantry_items SET expiry_date = ?1, updated_at = ?2 WHERE id = ?3",
                params![expiry, now, id],
            )?;
        }
        if let Some(ref category) = update.category {
            self.conn.execute(
                "UPDATE pantry_items SET category = ?1, updated_at = ?2 WHERE id = ?3",
                params![category, now, id],
            )?;
        }
        if let Some(min_quantity) = update.min_quantity {
            self.conn.execute(
                "UPDATE pantry_items SET min_quantity = ?1, updated_at = ?2 WHERE id = ?3",
                params![min_quantity, now, id],
            )?;
        }

        self.get_pantry_item(id)
    }

    pub fn delete_pantry_item(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM pantry_items WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn low_stock(&self) -> Result<Vec<PantryItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PANTRY_COLUMNS} FROM pantry_items
             WHERE min_quantity IS NOT NULL AND quantity < min_quantity
             ORDER BY name_key, id"
        ))?;
        let items = stmt
            .query_map([], Self::pantry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Items expiring on or before `today + days`, soonest first. Already
    /// expired items are included.
    pub fn expiring_within(&self, today: NaiveDate, days: i64) -> Result<Vec<PantryItem>> {
        if days < 0 {
            bail!("days must be zero or greater");
        }
        let cutoff = (today + Duration::days(days)).format("%Y-%m-%d").to_string();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PANTRY_COLUMNS} FROM pantry_items
             WHERE expiry_date IS NOT NULL AND expiry_date <= ?1
             ORDER BY expiry_date, id"
        ))?;
        let items = stmt
            .query_map(params![cutoff], Self::pantry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    // --- Recipes ---

    pub fn insert_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        let now = Local::now().to_rfc3339();
        let groups = serde_json::to_string(&recipe.ingredient_groups)?;
        self.conn.execute(
            "INSERT INTO recipes (name, servings, ingredient_groups, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![recipe.name.trim(), recipe.servings.trim(), groups, now, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_recipe(id)
    }

    /// Replace a recipe's editable fields. Derived match fields are left for
    /// the recompute engine.
    pub fn update_recipe(&self, id: i64, recipe: &NewRecipe) -> Result<Recipe> {
        let now = Local::now().to_rfc3339();
        let groups = serde_json::to_string(&recipe.ingredient_groups)?;
        let rows = self.conn.execute(
            "UPDATE recipes SET name = ?1, servings = ?2, ingredient_groups = ?3, updated_at = ?4
             WHERE id = ?5",
            params![recipe.name.trim(), recipe.servings.trim(), groups, now, id],
        )?;
        if rows == 0 {
            bail!("Recipe {id} not found");
        }
        self.get_recipe(id)
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .with_context(|| format!("Recipe {id} not found"))
    }

    pub fn recipe_exists(&self, id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM recipes WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes ORDER BY name COLLATE NOCASE, id"
        ))?;
        let recipes = stmt
            .query_map([], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    /// Deletes the recipe and the plan entries that reference it; shopping
    /// items keep their rows but lose the back-reference.
    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM meal_plan_items WHERE recipe_id = ?1",
            params![id],
        )?;
        tx.execute(
            "UPDATE shopping_list_items SET recipe_id = NULL WHERE recipe_id = ?1",
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    /// Persist derived match fields. Does not touch `updated_at`.
    pub fn set_recipe_match(&self, id: i64, percentage: i64, count: i64) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE recipes SET pantry_match_percentage = ?1, ingredient_count = ?2 WHERE id = ?3",
            params![percentage, count, id],
        )?;
        if rows == 0 {
            bail!("Recipe {id} not found");
        }
        Ok(())
    }

    // --- Shopping list ---

    /// Insert a row as given. Merge and ordering rules live in `shopping`.
    pub fn insert_shopping_item(
        &self,
        item: &NewShoppingItem,
        category: &str,
        sort_order: f64,
    ) -> Result<ShoppingListItem> {
        let now = Local::now().to_rfc3339();
        let name = item.name.trim();
        self.conn.execute(
            "INSERT INTO shopping_list_items (name, name_key, quantity, unit, category, is_checked,
                                              sort_order, recipe_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9)",
            params![
                name,
                fold_name(name),
                item.quantity,
                item.unit,
                category,
                sort_order,
                item.recipe_id,
                now,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_shopping_item(id)
    }

    pub fn get_shopping_item(&self, id: i64) -> Result<ShoppingListItem> {
        self.conn
            .query_row(
                &format!("SELECT {SHOPPING_COLUMNS} FROM shopping_list_items WHERE id = ?1"),
                params![id],
                Self::shopping_from_row,
            )
            .with_context(|| format!("Shopping item {id} not found"))
    }

    pub fn list_shopping_items(&self) -> Result<Vec<ShoppingListItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SHOPPING_COLUMNS} FROM shopping_list_items
             ORDER BY is_checked, category, sort_order, id"
        ))?;
        let items = stmt
            .query_map([], Self::shopping_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn checked_shopping_items(&self) -> Result<Vec<ShoppingListItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SHOPPING_COLUMNS} FROM shopping_list_items
             WHERE is_checked = 1 ORDER BY category, sort_order, id"
        ))?;
        let items = stmt
            .query_map([], Self::shopping_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// The unchecked item holding (folded name, unit), if any. `unit` must
    /// already be normalized.
    pub fn find_unchecked_shopping_item(
        &self,
        name: &str,
        unit: &str,
    ) -> Result<Option<ShoppingListItem>> {
        let item = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SHOPPING_COLUMNS} FROM shopping_list_items
                     WHERE name_key = ?1 AND unit = ?2 AND is_checked = 0
                     ORDER BY id LIMIT 1"
                ),
                params![fold_name(name), unit],
                Self::shopping_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Unchecked items of a category in visual order.
    pub fn unchecked_in_category(&self, category: &str) -> Result<Vec<ShoppingListItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SHOPPING_COLUMNS} FROM shopping_list_items
             WHERE category = ?1 AND is_checked = 0
             ORDER BY sort_order, id"
        ))?;
        let items = stmt
            .query_map(params![category], Self::shopping_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Every item of a category, checked ones included, in visual order.
    pub fn shopping_items_in_category(&self, category: &str) -> Result<Vec<ShoppingListItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SHOPPING_COLUMNS} FROM shopping_list_items
             WHERE category = ?1
             ORDER BY sort_order, id"
        ))?;
        let items = stmt
            .query_map(params![category], Self::shopping_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Highest sort order among the unchecked items of a category.
    pub fn max_sort_order(&self, category: &str) -> Result<Option<f64>> {
        let max: Option<f64> = self.conn.query_row(
            "SELECT MAX(sort_order) FROM shopping_list_items
             WHERE category = ?1 AND is_checked = 0",
            params![category],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    pub fn add_shopping_quantity(&self, id: i64, delta: f64) -> Result<ShoppingListItem> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE shopping_list_items SET quantity = quantity + ?1, updated_at = ?2 WHERE id = ?3",
            params![delta, now, id],
        )?;
        if rows == 0 {
            bail!("Shopping item {id} not found");
        }
        self.get_shopping_item(id)
    }

    pub fn set_shopping_checked(
        &self,
        id: i64,
        checked: bool,
        sort_order: f64,
    ) -> Result<ShoppingListItem> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE shopping_list_items SET is_checked = ?1, sort_order = ?2, updated_at = ?3
             WHERE id = ?4",
            params![checked, sort_order, now, id],
        )?;
        if rows == 0 {
            bail!("Shopping item {id} not found");
        }
        self.get_shopping_item(id)
    }

    /// Apply (id, category, `sort_order`) triples atomically.
    pub fn set_shopping_positions(&self, positions: &[(i64, &str, f64)]) -> Result<usize> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let mut updated = 0;
        for (id, category, sort_order) in positions {
            updated += tx.execute(
                "UPDATE shopping_list_items SET category = ?1, sort_order = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![category, sort_order, now, id],
            )?;
        }
        tx.commit()?;
        Ok(updated)
    }

    pub fn delete_shopping_item(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM shopping_list_items WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Fold `source` into `target` and drop `source`, in one transaction.
    pub fn merge_shopping_items(&self, target: i64, source: i64) -> Result<ShoppingListItem> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let quantity: f64 = tx
            .query_row(
                "SELECT quantity FROM shopping_list_items WHERE id = ?1",
                params![source],
                |row| row.get(0),
            )
            .with_context(|| format!("Shopping item {source} not found"))?;
        let rows = tx.execute(
            "UPDATE shopping_list_items SET quantity = quantity + ?1, updated_at = ?2 WHERE id = ?3",
            params![quantity, now, target],
        )?;
        if rows == 0 {
            bail!("Shopping item {target} not found");
        }
        tx.execute(
            "DELETE FROM shopping_list_items WHERE id = ?1",
            params![source],
        )?;
        tx.commit()?;
        self.get_shopping_item(target)
    }

    pub fn clear_shopping_list(&self) -> Result<usize> {
        let rows = self.conn.execute("DELETE FROM shopping_list_items", [])?;
        Ok(rows)
    }

    pub fn clear_checked_shopping(&self) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM shopping_list_items WHERE is_checked = 1", [])?;
        Ok(rows)
    }

    /// Move one checked item into the pantry in its own transaction: add to
    /// the pantry entry sharing its folded name, or create one, then delete
    /// the shopping row. Nothing is kept if any step fails.
    pub fn move_item_to_pantry(&self, item: &ShoppingListItem) -> Result<PantryMove> {
        let now = Local::now().to_rfc3339();
        let key = fold_name(&item.name);
        let tx = self.conn.unchecked_transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM pantry_items WHERE name_key = ?1 ORDER BY id LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = if let Some(pantry_id) = existing {
            tx.execute(
                "UPDATE pantry_items SET quantity = quantity + ?1, updated_at = ?2 WHERE id = ?3",
                params![item.quantity, now, pantry_id],
            )?;
            PantryMove::Merged(pantry_id)
        } else {
            tx.execute(
                "INSERT INTO pantry_items (name, name_key, quantity, unit, category,
                                           created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![item.name, key, item.quantity, item.unit, item.category, now, now],
            )?;
            PantryMove::Created(tx.last_insert_rowid())
        };

        let rows = tx.execute(
            "DELETE FROM shopping_list_items WHERE id = ?1 AND is_checked = 1",
            params![item.id],
        )?;
        if rows == 0 {
            // Dropping the transaction rolls back the pantry write
            bail!("Checked shopping item {} no longer exists", item.id);
        }
        tx.commit()?;
        Ok(outcome)
    }

    // --- Meal plan ---

    pub fn insert_plan_entry(&self, entry: &NewMealPlanItem) -> Result<MealPlanItem> {
        let now = Local::now().to_rfc3339();
        let date = entry.date.format("%Y-%m-%d").to_string();
        let note = entry
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        self.conn.execute(
            "INSERT INTO meal_plan_items (date, meal_slot, recipe_id, note, servings_override,
                                          is_cooked, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            params![
                date,
                entry.meal_slot,
                entry.recipe_id,
                note,
                entry.servings_override,
                now,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_plan_entry(id)
    }

    pub fn get_plan_entry(&self, id: i64) -> Result<MealPlanItem> {
        self.conn
            .query_row(
                "SELECT p.id, p.date, p.meal_slot, p.recipe_id, p.note, p.servings_override,
                        p.is_cooked, p.created_at, p.updated_at, r.name
                 FROM meal_plan_items p
                 LEFT JOIN recipes r ON r.id = p.recipe_id
                 WHERE p.id = ?1",
                params![id],
                Self::plan_from_row,
            )
            .with_context(|| format!("Meal plan entry {id} not found"))
    }

    pub fn list_plan(&self, range: PlanRange) -> Result<Vec<MealPlanItem>> {
        let start = range.start.format("%Y-%m-%d").to_string();
        let end = range.end.format("%Y-%m-%d").to_string();
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.date, p.meal_slot, p.recipe_id, p.note, p.servings_override,
                    p.is_cooked, p.created_at, p.updated_at, r.name
             FROM meal_plan_items p
             LEFT JOIN recipes r ON r.id = p.recipe_id
             WHERE p.date BETWEEN ?1 AND ?2
             ORDER BY p.date,
                      CASE p.meal_slot WHEN 'breakfast' THEN 0 WHEN 'lunch' THEN 1 ELSE 2 END,
                      p.id",
        )?;
        let entries = stmt
            .query_map(params![start, end], Self::plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn set_plan_cooked(&self, id: i64, cooked: bool) -> Result<MealPlanItem> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE meal_plan_items SET is_cooked = ?1, updated_at = ?2 WHERE id = ?3",
            params![cooked, now, id],
        )?;
        if rows == 0 {
            bail!("Meal plan entry {id} not found");
        }
        self.get_plan_entry(id)
    }

    pub fn delete_plan_entry(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM meal_plan_items WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ingredient;

    fn sample_pantry(name: &str, quantity: f64, unit: &str) -> NewPantryItem {
        NewPantryItem {
            name: name.to_string(),
            quantity,
            unit: unit.to_string(),
            expiry_date: None,
            category: None,
            min_quantity: None,
        }
    }

    fn sample_recipe() -> NewRecipe {
        NewRecipe {
            name: "Omelette".to_string(),
            servings: "2".to_string(),
            ingredient_groups: vec![IngredientGroup {
                title: String::new(),
                ingredients: vec![
                    Ingredient {
                        quantity: "3".to_string(),
                        unit: String::new(),
                        name: "Eggs".to_string(),
                    },
                    Ingredient {
                        quantity: "50".to_string(),
                        unit: "ml".to_string(),
                        name: "Milk".to_string(),
                    },
                ],
            }],
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("larder.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert_pantry_item(&sample_pantry("Rice", 1.0, "kg"))
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_pantry().unwrap().len(), 1);
    }

    #[test]
    fn test_insert_and_get_pantry_item() {
        let db = Database::open_in_memory().unwrap();
        let mut new = sample_pantry("  Olive Oil ", 0.5, "l");
        new.expiry_date = Some(date(2025, 1, 31));
        let item = db.insert_pantry_item(&new).unwrap();

        assert_eq!(item.name, "Olive Oil");
        assert_eq!(item.category, "Other");
        assert_eq!(item.expiry_date.as_deref(), Some("2025-01-31"));

        let fetched = db.get_pantry_item(item.id).unwrap();
        assert_eq!(fetched.name, "Olive Oil");
        assert!(db.get_pantry_item(999).is_err());
    }

    #[test]
    fn test_find_pantry_by_name_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let item = db.insert_pantry_item(&sample_pantry("Eggs", 6.0, "piece")).unwrap();
        let found = db.find_pantry_by_name(" eGGs").unwrap().unwrap();
        assert_eq!(found.id, item.id);
        assert!(db.find_pantry_by_name("egg").unwrap().is_none());
    }

    #[test]
    fn test_update_pantry_item() {
        let db = Database::open_in_memory().unwrap();
        let mut new = sample_pantry("Milk", 1.0, "l");
        new.min_quantity = Some(2.0);
        let item = db.insert_pantry_item(&new).unwrap();

        let updated = db
            .update_pantry_item(
                item.id,
                &UpdatePantryItem {
                    name: Some("Whole Milk".to_string()),
                    quantity: Some(3.0),
                    min_quantity: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Whole Milk");
        assert!((updated.quantity - 3.0).abs() < f64::EPSILON);
        assert!(updated.min_quantity.is_none());
        assert_eq!(updated.unit, "l");
        assert!(db.find_pantry_by_name("whole milk").unwrap().is_some());

        assert!(
            db.update_pantry_item(999, &UpdatePantryItem::default())
                .is_err()
        );
    }

    #[test]
    fn test_delete_pantry_item() {
        let db = Database::open_in_memory().unwrap();
        let item = db.insert_pantry_item(&sample_pantry("Salt", 1.0, "kg")).unwrap();
        assert!(db.delete_pantry_item(item.id).unwrap());
        assert!(!db.delete_pantry_item(item.id).unwrap());
    }

    #[test]
    fn test_low_stock() {
        let db = Database::open_in_memory().unwrap();
        let mut low = sample_pantry("Flour", 0.2, "kg");
        low.min_quantity = Some(1.0);
        let mut fine = sample_pantry("Sugar", 2.0, "kg");
        fine.min_quantity = Some(1.0);
        db.insert_pantry_item(&low).unwrap();
        db.insert_pantry_item(&fine).unwrap();
        db.insert_pantry_item(&sample_pantry("Oats", 0.0, "kg"))
            .unwrap();

        let items = db.low_stock().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Flour");
    }

    #[test]
    fn test_expiring_within() {
        let db = Database::open_in_memory().unwrap();
        let today = date(2024, 6, 10);
        for (name, expiry) in [
            ("Yogurt", Some(date(2024, 6, 12))),
            ("Cheese", Some(date(2024, 6, 30))),
            ("Milk", Some(date(2024, 6, 9))),
            ("Rice", None),
        ] {
            let mut item = sample_pantry(name, 1.0, "piece");
            item.expiry_date = expiry;
            db.insert_pantry_item(&item).unwrap();
        }

        let items = db.expiring_within(today, 3).unwrap();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Milk", "Yogurt"]);
        assert!(db.expiring_within(today, -1).is_err());
    }

    #[test]
    fn test_recipe_roundtrip_keeps_groups() {
        let db = Database::open_in_memory().unwrap();
        let recipe = db.insert_recipe(&sample_recipe()).unwrap();

        assert_eq!(recipe.name, "Omelette");
        assert_eq!(recipe.ingredient_groups, sample_recipe().ingredient_groups);
        assert!(recipe.pantry_match_percentage.is_none());
        assert!(recipe.ingredient_count.is_none());
        assert!(db.recipe_exists(recipe.id).unwrap());
    }

    #[test]
    fn test_set_recipe_match_and_update_keeps_it() {
        let db = Database::open_in_memory().unwrap();
        let recipe = db.insert_recipe(&sample_recipe()).unwrap();
        db.set_recipe_match(recipe.id, 50, 2).unwrap();

        let mut edited = sample_recipe();
        edited.name = "Big Omelette".to_string();
        let updated = db.update_recipe(recipe.id, &edited).unwrap();
        assert_eq!(updated.name, "Big Omelette");
        assert_eq!(updated.pantry_match_percentage, Some(50));
        assert_eq!(updated.ingredient_count, Some(2));

        assert!(db.set_recipe_match(999, 0, 0).is_err());
        assert!(db.update_recipe(999, &edited).is_err());
    }

    #[test]
    fn test_delete_recipe_cascades_to_plan() {
        let db = Database::open_in_memory().unwrap();
        let recipe = db.insert_recipe(&sample_recipe()).unwrap();
        db.insert_plan_entry(&NewMealPlanItem {
            date: date(2024, 6, 10),
            meal_slot: "dinner".to_string(),
            recipe_id: Some(recipe.id),
            note: None,
            servings_override: None,
        })
        .unwrap();
        let mut from_recipe = NewShoppingItem::new("Eggs", 3.0, "piece");
        from_recipe.recipe_id = Some(recipe.id);
        let shop = db
            .insert_shopping_item(&from_recipe, "Dairy & Eggs", 1024.0)
            .unwrap();

        assert!(db.delete_recipe(recipe.id).unwrap());
        let range = PlanRange::new(date(2024, 6, 1), date(2024, 6, 30)).unwrap();
        assert!(db.list_plan(range).unwrap().is_empty());
        assert!(db.get_shopping_item(shop.id).unwrap().recipe_id.is_none());
        assert!(!db.delete_recipe(recipe.id).unwrap());
    }

    #[test]
    fn test_find_unchecked_shopping_item() {
        let db = Database::open_in_memory().unwrap();
        let item = db
            .insert_shopping_item(&NewShoppingItem::new("Milk", 1.0, "l"), "Dairy & Eggs", 1024.0)
            .unwrap();

        let found = db.find_unchecked_shopping_item("MILK", "l").unwrap();
        assert_eq!(found.map(|i| i.id), Some(item.id));
        assert!(db.find_unchecked_shopping_item("milk", "ml").unwrap().is_none());

        db.set_shopping_checked(item.id, true, item.sort_order)
            .unwrap();
        assert!(db.find_unchecked_shopping_item("milk", "l").unwrap().is_none());
    }

    #[test]
    fn test_max_sort_order_ignores_checked() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.max_sort_order("Produce").unwrap().is_none());
        db.insert_shopping_item(&NewShoppingItem::new("Apples", 1.0, "kg"), "Produce", 1024.0)
            .unwrap();
        let pears = db
            .insert_shopping_item(&NewShoppingItem::new("Pears", 1.0, "kg"), "Produce", 2048.0)
            .unwrap();
        db.set_shopping_checked(pears.id, true, 2048.0).unwrap();
        assert_eq!(db.max_sort_order("Produce").unwrap(), Some(1024.0));
    }

    #[test]
    fn test_merge_shopping_items() {
        let db = Database::open_in_memory().unwrap();
        let a = db
            .insert_shopping_item(&NewShoppingItem::new("Milk", 1.0, "l"), "Dairy & Eggs", 1024.0)
            .unwrap();
        let b = db
            .insert_shopping_item(&NewShoppingItem::new("Milk", 2.0, "l"), "Dairy & Eggs", 2048.0)
            .unwrap();
        let merged = db.merge_shopping_items(a.id, b.id).unwrap();
        assert!((merged.quantity - 3.0).abs() < f64::EPSILON);
        assert!(db.get_shopping_item(b.id).is_err());
    }

    #[test]
    fn test_set_shopping_positions() {
        let db = Database::open_in_memory().unwrap();
        let a = db
            .insert_shopping_item(&NewShoppingItem::new("Tea", 1.0, "piece"), "Beverages", 1024.0)
            .unwrap();
        let updated = db
            .set_shopping_positions(&[(a.id, "Drinks", 4096.0)])
            .unwrap();
        assert_eq!(updated, 1);
        let moved = db.get_shopping_item(a.id).unwrap();
        assert_eq!(moved.category, "Drinks");
        assert!((moved.sort_order - 4096.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_checked_and_list() {
        let db = Database::open_in_memory().unwrap();
        let a = db
            .insert_shopping_item(&NewShoppingItem::new("Tea", 1.0, "piece"), "Beverages", 1024.0)
            .unwrap();
        db.insert_shopping_item(&NewShoppingItem::new("Soap", 1.0, "piece"), "Household", 1024.0)
            .unwrap();
        db.set_shopping_checked(a.id, true, a.sort_order).unwrap();

        assert_eq!(db.clear_checked_shopping().unwrap(), 1);
        assert_eq!(db.list_shopping_items().unwrap().len(), 1);
        assert_eq!(db.clear_shopping_list().unwrap(), 1);
        assert!(db.list_shopping_items().unwrap().is_empty());
    }

    #[test]
    fn test_move_item_to_pantry_merges_and_creates() {
        let db = Database::open_in_memory().unwrap();
        let eggs = db.insert_pantry_item(&sample_pantry("Eggs", 2.0, "piece")).unwrap();

        let shop_eggs = db
            .insert_shopping_item(&NewShoppingItem::new("eggs", 6.0, "piece"), "Dairy & Eggs", 1024.0)
            .unwrap();
        let shop_eggs = db.set_shopping_checked(shop_eggs.id, true, 1024.0).unwrap();
        assert_eq!(
            db.move_item_to_pantry(&shop_eggs).unwrap(),
            PantryMove::Merged(eggs.id)
        );
        let eggs = db.get_pantry_item(eggs.id).unwrap();
        assert!((eggs.quantity - 8.0).abs() < f64::EPSILON);

        let shop_bread = db
            .insert_shopping_item(&NewShoppingItem::new("Bread", 1.0, "loaf"), "Bakery", 1024.0)
            .unwrap();
        let shop_bread = db.set_shopping_checked(shop_bread.id, true, 1024.0).unwrap();
        let PantryMove::Created(bread_id) = db.move_item_to_pantry(&shop_bread).unwrap() else {
            panic!("expected a new pantry entry");
        };
        let bread = db.get_pantry_item(bread_id).unwrap();
        assert_eq!(bread.unit, "loaf");
        assert_eq!(bread.category, "Bakery");
        assert!(db.list_shopping_items().unwrap().is_empty());
    }

    #[test]
    fn test_move_item_to_pantry_rolls_back_on_failure() {
        let db = Database::open_in_memory().unwrap();
        let flour = db.insert_pantry_item(&sample_pantry("Flour", 1.0, "kg")).unwrap();
        let shop = db
            .insert_shopping_item(&NewShoppingItem::new("Flour", 2.0, "kg"), "Pantry Staples", 1024.0)
            .unwrap();
        let shop = db.set_shopping_checked(shop.id, true, 1024.0).unwrap();
        db.delete_shopping_item(shop.id).unwrap();

        assert!(db.move_item_to_pantry(&shop).is_err());
        let flour = db.get_pantry_item(flour.id).unwrap();
        assert!((flour.quantity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_plan_entries() {
        let db = Database::open_in_memory().unwrap();
        let recipe = db.insert_recipe(&sample_recipe()).unwrap();
        let dinner = db
            .insert_plan_entry(&NewMealPlanItem {
                date: date(2024, 6, 10),
                meal_slot: "dinner".to_string(),
                recipe_id: Some(recipe.id),
                note: None,
                servings_override: Some(4.0),
            })
            .unwrap();
        db.insert_plan_entry(&NewMealPlanItem {
            date: date(2024, 6, 10),
            meal_slot: "breakfast".to_string(),
            recipe_id: None,
            note: Some(" cereal ".to_string()),
            servings_override: None,
        })
        .unwrap();
        db.insert_plan_entry(&NewMealPlanItem {
            date: date(2024, 6, 20),
            meal_slot: "lunch".to_string(),
            recipe_id: None,
            note: Some("out".to_string()),
            servings_override: None,
        })
        .unwrap();

        assert_eq!(dinner.recipe_name.as_deref(), Some("Omelette"));
        let range = PlanRange::new(date(2024, 6, 10), date(2024, 6, 16)).unwrap();
        let entries = db.list_plan(range).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].meal_slot, "breakfast");
        assert_eq!(entries[0].note.as_deref(), Some("cereal"));
        assert_eq!(entries[1].id, dinner.id);

        let cooked = db.set_plan_cooked(dinner.id, true).unwrap();
        assert!(cooked.is_cooked);
        assert!(db.delete_plan_entry(dinner.id).unwrap());
        assert!(db.set_plan_cooked(dinner.id, true).is_err());
    }

    #[test]
    fn test_plan_check_rejects_recipe_and_note() {
        let db = Database::open_in_memory().unwrap();
        let recipe = db.insert_recipe(&sample_recipe()).unwrap();
        let result = db.insert_plan_entry(&NewMealPlanItem {
            date: date(2024, 6, 10),
            meal_slot: "dinner".to_string(),
            recipe_id: Some(recipe.id),
            note: Some("also a note".to_string()),
            servings_override: None,
        });
        assert!(result.is_err());
    }
}
