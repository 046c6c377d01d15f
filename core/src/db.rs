use std::collections::{HashMap, VecDeque};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{
    Ingredient, Macros, MealPlanEntry, NewRecipe, Notification, PlannedMeal, Recipe,
    RecipeDetail, RecipeIngredient, ShoppingListItem, User,
};

/// Desired state of one recipe line, after its ingredient has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeLink {
    pub ingredient_id: String,
    pub quantity: f64,
    pub unit: String,
}

/// What [`Database::apply_recipe_links`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkChanges {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

pub struct Database {
    conn: Connection,
}

const RECIPE_COLUMNS: &str = "r.id, r.user_id, r.title, r.instructions, r.prep_time, r.image_url,
     r.calories, r.protein, r.carbs, r.fat, r.created_at, r.updated_at";

const SHOPPING_COLUMNS: &str = "id, user_id, ingredient_id, ingredient_name, quantity, unit,
     is_purchased, created_at, updated_at";

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
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT,
                    token_hash TEXT UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    default_unit TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, name)
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    instructions TEXT,
                    prep_time INTEGER,
                    image_url TEXT,
                    calories REAL,
                    protein REAL,
                    carbs REAL,
                    fat REAL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id TEXT PRIMARY KEY,
                    recipe_id TEXT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id TEXT NOT NULL REFERENCES ingredients(id),
                    quantity REAL NOT NULL CHECK (quantity > 0),
                    unit TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_plan (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    recipe_id TEXT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    planned_date TEXT NOT NULL,
                    meal_type TEXT NOT NULL
                        CHECK (meal_type IN ('breakfast', 'lunch', 'dinner', 'snack')),
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS shopping_list (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    ingredient_id TEXT REFERENCES ingredients(id) ON DELETE SET NULL,
                    ingredient_name TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL,
                    is_purchased INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_recipes_user ON recipes(user_id);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_meal_plan_user_date ON meal_plan(user_id, planned_date);
                CREATE INDEX IF NOT EXISTS idx_shopping_list_user ON shopping_list(user_id);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    body TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    is_read INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id);

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    /// Run `f` inside a transaction, committing only if it returns `Ok`.
    ///
    /// Nested calls join the outer transaction.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        if !self.conn.is_autocommit() {
            return f(self);
        }
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            default_unit: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    // Expects RECIPE_COLUMNS starting at `base`.
    fn recipe_at(row: &rusqlite::Row, base: usize) -> rusqlite::Result<Recipe> {
        let macros = Macros {
            calories: row.get(base + 6)?,
            protein: row.get(base + 7)?,
            carbs: row.get(base + 8)?,
            fat: row.get(base + 9)?,
        };
        Ok(Recipe {
            id: row.get(base)?,
            user_id: row.get(base + 1)?,
            title: row.get(base + 2)?,
            instructions: row.get(base + 3)?,
            prep_time: row.get(base + 4)?,
            image_url: row.get(base + 5)?,
            macros: (!macros.is_empty()).then_some(macros),
            created_at: row.get(base + 10)?,
            updated_at: row.get(base + 11)?,
        })
    }

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Self::recipe_at(row, 0)
    }

    // Expects columns:
    // 0: mp.id, 1: mp.user_id, 2: mp.recipe_id, 3: mp.planned_date,
    // 4: mp.meal_type, 5: mp.created_at, 6..: RECIPE_COLUMNS
    fn planned_meal_from_row(row: &rusqlite::Row) -> rusqlite::Result<PlannedMeal> {
        Ok(PlannedMeal {
            entry: MealPlanEntry {
                id: row.get(0)?,
                user_id: row.get(1)?,
                recipe_id: row.get(2)?,
                planned_date: row.get(3)?,
                meal_type: row.get(4)?,
                created_at: row.get(5)?,
            },
            recipe: Self::recipe_at(row, 6)?,
        })
    }

    fn shopping_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingListItem> {
        Ok(ShoppingListItem {
            id: row.get(0)?,
            user_id: row.get(1)?,
            ingredient_id: row.get(2)?,
            ingredient_name: row.get(3)?,
            quantity: row.get(4)?,
            unit: row.get(5)?,
            is_purchased: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn notification_from_row(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
        Ok(Notification {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            kind: row.get(4)?,
            read: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    // --- Users ---

    pub fn create_user(&self, email: &str, name: Option<&str>) -> Result<User> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            bail!("Email must not be empty");
        }
        if self.get_user_by_email(&email)?.is_some() {
            bail!("User '{email}' already exists");
        }
        let id = Uuid::new_v4().to_string();
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (id, email, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, email, name, now],
        )?;
        self.get_user(&id)
    }

    pub fn get_or_create_user(&self, email: &str) -> Result<User> {
        match self.get_user_by_email(email)? {
            Some(user) => Ok(user),
            None => self.create_user(email, None),
        }
    }

    pub fn get_user(&self, id: &str) -> Result<User> {
        self.conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE id = ?1",
                params![id],
                Self::user_from_row,
            )
            .context("User not found")
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE email = ?1",
                params![email.trim().to_lowercase()],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, name, created_at FROM users ORDER BY email")?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn set_user_token_hash(&self, user_id: &str, token_hash: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE users SET token_hash = ?1 WHERE id = ?2",
            params![token_hash, user_id],
        )?;
        if rows == 0 {
            bail!("User not found");
        }
        Ok(())
    }

    pub fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE token_hash = ?1",
                params![token_hash],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    // --- Ingredient catalog ---

    /// Look up a catalog ingredient by its normalized name.
    pub fn find_ingredient(&self, user_id: &str, name: &str) -> Result<Option<Ingredient>> {
        let ingredient = self
            .conn
            .query_row(
                "SELECT id, name, default_unit, created_at FROM ingredients
                 WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                Self::ingredient_from_row,
            )
            .optional()?;
        Ok(ingredient)
    }

    pub fn get_ingredient(&self, user_id: &str, id: &str) -> Result<Option<Ingredient>> {
        let ingredient = self
            .conn
            .query_row(
                "SELECT id, name, default_unit, created_at FROM ingredients
                 WHERE user_id = ?1 AND id = ?2",
                params![user_id, id],
                Self::ingredient_from_row,
            )
            .optional()?;
        Ok(ingredient)
    }

    pub fn insert_ingredient(
        &self,
        user_id: &str,
        name: &str,
        default_unit: &str,
    ) -> Result<Ingredient> {
        let id = Uuid::new_v4().to_string();
        let now = Local::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO ingredients (id, user_id, name, default_unit, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, user_id, name, default_unit, now],
            )
            .with_context(|| format!("Failed to create ingredient '{name}'"))?;
        Ok(Ingredient {
            id,
            name: name.to_string(),
            default_unit: default_unit.to_string(),
            created_at: now,
        })
    }

    pub fn list_ingredients(&self, user_id: &str) -> Result<Vec<Ingredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, default_unit, created_at FROM ingredients
             WHERE user_id = ?1 ORDER BY name",
        )?;
        let ingredients = stmt
            .query_map(params![user_id], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    // --- Recipes ---

    /// Insert the recipe row only; ingredient lines go through
    /// [`Database::apply_recipe_links`].
    pub fn insert_recipe(&self, user_id: &str, recipe: &NewRecipe) -> Result<Recipe> {
        let id = Uuid::new_v4().to_string();
        let now = Local::now().to_rfc3339();
        let macros = recipe.macros.clone().unwrap_or_default();
        self.conn.execute(
            "INSERT INTO recipes (id, user_id, title, instructions, prep_time, image_url,
                                  calories, protein, carbs, fat, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                user_id,
                recipe.title,
                recipe.instructions,
                recipe.prep_time,
                recipe.image_url,
                macros.calories,
                macros.protein,
                macros.carbs,
                macros.fat,
                now,
                now,
            ],
        )?;
        self.get_recipe(user_id, &id)
    }

    pub fn update_recipe_row(&self, user_id: &str, id: &str, recipe: &NewRecipe) -> Result<Recipe> {
        let now = Local::now().to_rfc3339();
        let macros = recipe.macros.clone().unwrap_or_default();
        let rows = self.conn.execute(
            "UPDATE recipes SET title = ?1, instructions = ?2, prep_time = ?3, image_url = ?4,
                    calories = ?5, protein = ?6, carbs = ?7, fat = ?8, updated_at = ?9
             WHERE id = ?10 AND user_id = ?11",
            params![
                recipe.title,
                recipe.instructions,
                recipe.prep_time,
                recipe.image_url,
                macros.calories,
                macros.protein,
                macros.carbs,
                macros.fat,
                now,
                id,
                user_id,
            ],
        )?;
        if rows == 0 {
            bail!("Recipe not found");
        }
        self.get_recipe(user_id, id)
    }

    pub fn get_recipe(&self, user_id: &str, id: &str) -> Result<Recipe> {
        self.conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.id = ?1 AND r.user_id = ?2"),
                params![id, user_id],
                Self::recipe_from_row,
            )
            .context("Recipe not found")
    }

    pub fn get_recipe_ingredients(&self, recipe_id: &str) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.id, ri.quantity, ri.unit, i.id, i.name, i.default_unit, i.created_at
             FROM recipe_ingredients ri
             JOIN ingredients i ON ri.ingredient_id = i.id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.created_at, ri.rowid",
        )?;
        let lines = stmt
            .query_map(params![recipe_id], |row| {
                Ok(RecipeIngredient {
                    id: row.get(0)?,
                    quantity: row.get(1)?,
                    unit: row.get(2)?,
                    ingredient: Ingredient {
                        id: row.get(3)?,
                        name: row.get(4)?,
                        default_unit: row.get(5)?,
                        created_at: row.get(6)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    pub fn get_recipe_detail(&self, user_id: &str, id: &str) -> Result<RecipeDetail> {
        let recipe = self.get_recipe(user_id, id)?;
        let ingredients = self.get_recipe_ingredients(&recipe.id)?;
        Ok(RecipeDetail {
            recipe,
            ingredients,
        })
    }

    /// Newest first. `search` is a case-insensitive title substring.
    pub fn list_recipes(&self, user_id: &str, search: Option<&str>) -> Result<Vec<Recipe>> {
        let pattern = search.map(|q| {
            let escaped = q
                .trim()
                .to_lowercase()
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{escaped}%")
        });
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r
             WHERE r.user_id = ?1 AND (?2 IS NULL OR LOWER(r.title) LIKE ?2 ESCAPE '\\')
             ORDER BY r.created_at DESC, r.rowid DESC"
        ))?;
        let recipes = stmt
            .query_map(params![user_id, pattern], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn list_recipe_details(&self, user_id: &str) -> Result<Vec<RecipeDetail>> {
        self.list_recipes(user_id, None)?
            .into_iter()
            .map(|recipe| {
                let ingredients = self.get_recipe_ingredients(&recipe.id)?;
                Ok(RecipeDetail {
                    recipe,
                    ingredients,
                })
            })
            .collect()
    }

    /// Exact title match; the most recently created recipe wins on duplicates.
    pub fn find_recipe_by_title(&self, user_id: &str, title: &str) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECIPE_COLUMNS} FROM recipes r
                     WHERE r.user_id = ?1 AND r.title = ?2
                     ORDER BY r.created_at DESC, r.rowid DESC LIMIT 1"
                ),
                params![user_id, title],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    pub fn delete_recipe(&self, user_id: &str, id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM recipes WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    /// Bring a recipe's lines to exactly `desired`, reusing existing rows for
    /// the same ingredient in order. Call inside a transaction.
    pub fn apply_recipe_links(&self, recipe_id: &str, desired: &[RecipeLink]) -> Result<LinkChanges> {
        let mut existing: HashMap<String, VecDeque<(String, f64, String)>> = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT id, ingredient_id, quantity, unit FROM recipe_ingredients
                 WHERE recipe_id = ?1 ORDER BY created_at, rowid",
            )?;
            let rows = stmt.query_map(params![recipe_id], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    (
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                    ),
                ))
            })?;
            for row in rows {
                let (ingredient_id, line) = row?;
                existing.entry(ingredient_id).or_default().push_back(line);
            }
        }

        let now = Local::now().to_rfc3339();
        let mut changes = LinkChanges::default();
        for link in desired {
            let reused = existing
                .get_mut(&link.ingredient_id)
                .and_then(VecDeque::pop_front);
            match reused {
                Some((id, quantity, unit)) => {
                    if (quantity - link.quantity).abs() > f64::EPSILON || unit != link.unit {
                        self.conn.execute(
                            "UPDATE recipe_ingredients SET quantity = ?1, unit = ?2 WHERE id = ?3",
                            params![link.quantity, link.unit, id],
                        )?;
                        changes.updated += 1;
                    } else {
                        changes.unchanged += 1;
                    }
                }
                None => {
                    self.conn.execute(
                        "INSERT INTO recipe_ingredients (id, recipe_id, ingredient_id, quantity, unit, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            Uuid::new_v4().to_string(),
                            recipe_id,
                            link.ingredient_id,
                            link.quantity,
                            link.unit,
                            now,
                        ],
                    )?;
                    changes.inserted += 1;
                }
            }
        }

        for (id, _, _) in existing.into_values().flatten() {
            self.conn
                .execute("DELETE FROM recipe_ingredients WHERE id = ?1", params![id])?;
            changes.deleted += 1;
        }

        Ok(changes)
    }

    // --- Meal plan ---

    pub fn insert_meal_plan_entry(
        &self,
        user_id: &str,
        recipe_id: &str,
        planned_date: NaiveDate,
        meal_type: &str,
    ) -> Result<MealPlanEntry> {
        let id = Uuid::new_v4().to_string();
        let now = Local::now().to_rfc3339();
        let date_str = planned_date.format("%Y-%m-%d").to_string();
        self.conn.execute(
            "INSERT INTO meal_plan (id, user_id, recipe_id, planned_date, meal_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, user_id, recipe_id, date_str, meal_type, now],
        )?;
        Ok(MealPlanEntry {
            id,
            user_id: user_id.to_string(),
            recipe_id: recipe_id.to_string(),
            planned_date: date_str,
            meal_type: meal_type.to_string(),
            created_at: now,
        })
    }

    fn query_meal_plan(
        &self,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PlannedMeal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT mp.id, mp.user_id, mp.recipe_id, mp.planned_date, mp.meal_type, mp.created_at,
                    {RECIPE_COLUMNS}
             FROM meal_plan mp
             JOIN recipes r ON mp.recipe_id = r.id
             WHERE {filter}
             ORDER BY mp.planned_date,
                      CASE mp.meal_type WHEN 'breakfast' THEN 0 WHEN 'lunch' THEN 1
                                        WHEN 'dinner' THEN 2 ELSE 3 END,
                      mp.created_at, mp.rowid"
        ))?;
        let meals = stmt
            .query_map(params, Self::planned_meal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meals)
    }

    /// Inclusive date range, ordered by day then breakfast to snack.
    pub fn list_meal_plan(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PlannedMeal>> {
        let start = start.format("%Y-%m-%d").to_string();
        let end = end.format("%Y-%m-%d").to_string();
        self.query_meal_plan(
            "mp.user_id = ?1 AND mp.planned_date >= ?2 AND mp.planned_date <= ?3",
            params![user_id, start, end],
        )
    }

    pub fn list_all_meal_plan(&self, user_id: &str) -> Result<Vec<PlannedMeal>> {
        self.query_meal_plan("mp.user_id = ?1", params![user_id])
    }

    pub fn delete_meal_plan_entry(&self, user_id: &str, id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM meal_plan WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    // --- Shopping list ---

    pub fn insert_shopping_item(
        &self,
        user_id: &str,
        ingredient_name: &str,
        quantity: f64,
        unit: &str,
        ingredient_id: Option<&str>,
    ) -> Result<ShoppingListItem> {
        let id = Uuid::new_v4().to_string();
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO shopping_list (id, user_id, ingredient_id, ingredient_name, quantity, unit,
                                        is_purchased, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
            params![id, user_id, ingredient_id, ingredient_name, quantity, unit, now, now],
        )?;
        self.get_shopping_item(user_id, &id)
    }

    pub fn get_shopping_item(&self, user_id: &str, id: &str) -> Result<ShoppingListItem> {
        self.conn
            .query_row(
                &format!("SELECT {SHOPPING_COLUMNS} FROM shopping_list WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                Self::shopping_item_from_row,
            )
            .context("Shopping list item not found")
    }

    /// Pending first, newest first within each half.
    pub fn list_shopping_items(&self, user_id: &str) -> Result<Vec<ShoppingListItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SHOPPING_COLUMNS} FROM shopping_list
             WHERE user_id = ?1
             ORDER BY is_purchased ASC, created_at DESC, rowid DESC"
        ))?;
        let items = stmt
            .query_map(params![user_id], Self::shopping_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn toggle_shopping_item(&self, user_id: &str, id: &str) -> Result<ShoppingListItem> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE shopping_list SET is_purchased = NOT is_purchased, updated_at = ?1
             WHERE id = ?2 AND user_id = ?3",
            params![now, id, user_id],
        )?;
        if rows == 0 {
            bail!("Shopping list item not found");
        }
        self.get_shopping_item(user_id, id)
    }

    /// Returns how many of `ids` were found and updated.
    pub fn set_items_purchased(&self, user_id: &str, ids: &[String], purchased: bool) -> Result<usize> {
        self.with_transaction(|db| {
            let now = Local::now().to_rfc3339();
            let mut updated = 0;
            for id in ids {
                updated += db.conn.execute(
                    "UPDATE shopping_list SET is_purchased = ?1, updated_at = ?2
                     WHERE id = ?3 AND user_id = ?4",
                    params![purchased, now, id, user_id],
                )?;
            }
            Ok(updated)
        })
    }

    pub fn delete_shopping_item(&self, user_id: &str, id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM shopping_list WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_shopping_items(&self, user_id: &str, ids: &[String]) -> Result<usize> {
        self.with_transaction(|db| {
            let mut deleted = 0;
            for id in ids {
                deleted += db.conn.execute(
                    "DELETE FROM shopping_list WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                )?;
            }
            Ok(deleted)
        })
    }

    pub fn clear_purchased(&self, user_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM shopping_list WHERE user_id = ?1 AND is_purchased = 1",
            params![user_id],
        )?;
        Ok(rows)
    }

    // --- Notifications ---

    pub fn insert_notification(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        kind: &str,
    ) -> Result<Notification> {
        let id = Uuid::new_v4().to_string();
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO notifications (id, user_id, title, body, kind, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![id, user_id, title, body, kind, now],
        )?;
        Ok(Notification {
            id,
            user_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            kind: kind.to_string(),
            read: false,
            created_at: now,
        })
    }

    pub fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, body, kind, is_read, created_at FROM notifications
             WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let notifications = stmt
            .query_map(params![user_id], Self::notification_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    pub fn unread_notification_count(&self, user_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn mark_notification_read(&self, user_id: &str, id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
        )?;
        Ok(rows)
    }

    pub fn clear_notifications(&self, user_id: &str) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM notifications WHERE user_id = ?1", params![user_id])?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, User) {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("cook@example.com", Some("Cook")).unwrap();
        (db, user)
    }

    fn sample_recipe(title: &str) -> NewRecipe {
        NewRecipe {
            title: title.to_string(),
            instructions: Some("Chop and mix.".to_string()),
            prep_time: Some(15),
            ..NewRecipe::default()
        }
    }

    fn link(ingredient: &Ingredient, quantity: f64, unit: &str) -> RecipeLink {
        RecipeLink {
            ingredient_id: ingredient.id.clone(),
            quantity,
            unit: unit.to_string(),
        }
    }

    #[test]
    fn test_migrate_sets_user_version() {
        let db = Database::open_in_memory().unwrap();
        let version: i64 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn test_create_and_lookup_user() {
        let (db, user) = setup();
        assert_eq!(user.email, "cook@example.com");
        assert_eq!(user.name.as_deref(), Some("Cook"));

        let by_email = db.get_user_by_email("COOK@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(db.create_user("cook@example.com", None).is_err());

        let same = db.get_or_create_user("cook@example.com").unwrap();
        assert_eq!(same.id, user.id);
        let other = db.get_or_create_user("other@example.com").unwrap();
        assert_ne!(other.id, user.id);
        assert_eq!(db.list_users().unwrap().len(), 2);
    }

    #[test]
    fn test_token_hash_lookup() {
        let (db, user) = setup();
        assert!(db.find_user_by_token_hash("abc").unwrap().is_none());
        db.set_user_token_hash(&user.id, "abc").unwrap();
        let found = db.find_user_by_token_hash("abc").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(db.set_user_token_hash("missing", "def").is_err());
    }

    #[test]
    fn test_ingredient_catalog_is_per_user() {
        let (db, user) = setup();
        let other = db.create_user("other@example.com", None).unwrap();

        db.insert_ingredient(&user.id, "tomato", "g").unwrap();
        assert!(db.insert_ingredient(&user.id, "tomato", "kg").is_err());
        assert!(db.find_ingredient(&other.id, "tomato").unwrap().is_none());

        db.insert_ingredient(&other.id, "tomato", "unit").unwrap();
        let mine = db.find_ingredient(&user.id, "tomato").unwrap().unwrap();
        let theirs = db.find_ingredient(&other.id, "tomato").unwrap().unwrap();
        assert_ne!(mine.id, theirs.id);
        assert_eq!(mine.default_unit, "g");
        assert_eq!(db.list_ingredients(&user.id).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_and_get_recipe() {
        let (db, user) = setup();
        let mut input = sample_recipe("Gazpacho");
        input.macros = Some(Macros {
            calories: Some(220.0),
            ..Macros::default()
        });
        let recipe = db.insert_recipe(&user.id, &input).unwrap();
        assert_eq!(recipe.title, "Gazpacho");
        assert_eq!(recipe.prep_time, Some(15));
        assert_eq!(recipe.macros.as_ref().unwrap().calories, Some(220.0));

        let plain = db.insert_recipe(&user.id, &sample_recipe("Toast")).unwrap();
        assert!(plain.macros.is_none());
    }

    #[test]
    fn test_recipes_scoped_to_owner() {
        let (db, user) = setup();
        let other = db.create_user("other@example.com", None).unwrap();
        let recipe = db.insert_recipe(&user.id, &sample_recipe("Paella")).unwrap();

        assert!(db.get_recipe(&other.id, &recipe.id).is_err());
        assert!(db.list_recipes(&other.id, None).unwrap().is_empty());
        assert!(!db.delete_recipe(&other.id, &recipe.id).unwrap());
        assert!(
            db.update_recipe_row(&other.id, &recipe.id, &sample_recipe("Stolen"))
                .is_err()
        );
        assert!(db.get_recipe(&user.id, &recipe.id).is_ok());
    }

    #[test]
    fn test_list_recipes_newest_first_and_search() {
        let (db, user) = setup();
        db.insert_recipe(&user.id, &sample_recipe("Tomato Soup")).unwrap();
        db.insert_recipe(&user.id, &sample_recipe("Green Salad")).unwrap();
        db.insert_recipe(&user.id, &sample_recipe("Tomato Salad")).unwrap();

        let all = db.list_recipes(&user.id, None).unwrap();
        let titles: Vec<&str> = all.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Tomato Salad", "Green Salad", "Tomato Soup"]);

        let found = db.list_recipes(&user.id, Some("TOMATO")).unwrap();
        assert_eq!(found.len(), 2);
        let found = db.list_recipes(&user.id, Some("salad")).unwrap();
        assert_eq!(found.len(), 2);
        assert!(db.list_recipes(&user.id, Some("100%")).unwrap().is_empty());
    }

    #[test]
    fn test_find_recipe_by_title_exact() {
        let (db, user) = setup();
        db.insert_recipe(&user.id, &sample_recipe("Omelette")).unwrap();
        let newer = db.insert_recipe(&user.id, &sample_recipe("Omelette")).unwrap();

        let found = db.find_recipe_by_title(&user.id, "Omelette").unwrap().unwrap();
        assert_eq!(found.id, newer.id);
        assert!(db.find_recipe_by_title(&user.id, "omelette").unwrap().is_none());
    }

    #[test]
    fn test_apply_recipe_links_diff() {
        let (db, user) = setup();
        let recipe = db.insert_recipe(&user.id, &sample_recipe("Salsa")).unwrap();
        let tomato = db.insert_ingredient(&user.id, "tomato", "g").unwrap();
        let onion = db.insert_ingredient(&user.id, "onion", "unit").unwrap();
        let lime = db.insert_ingredient(&user.id, "lime", "unit").unwrap();

        let changes = db
            .apply_recipe_links(
                &recipe.id,
                &[link(&tomato, 400.0, "g"), link(&onion, 1.0, "unit")],
            )
            .unwrap();
        assert_eq!(changes.inserted, 2);
        let before = db.get_recipe_ingredients(&recipe.id).unwrap();
        let tomato_line_id = before[0].id.clone();

        let changes = db
            .apply_recipe_links(
                &recipe.id,
                &[link(&tomato, 500.0, "g"), link(&lime, 2.0, "unit")],
            )
            .unwrap();
        assert_eq!(
            changes,
            LinkChanges {
                inserted: 1,
                updated: 1,
                unchanged: 0,
                deleted: 1,
            }
        );

        let after = db.get_recipe_ingredients(&recipe.id).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].id, tomato_line_id);
        assert_eq!(after[0].quantity, 500.0);
        assert_eq!(after[1].ingredient.name, "lime");
    }

    #[test]
    fn test_apply_recipe_links_duplicate_ingredient() {
        let (db, user) = setup();
        let recipe = db.insert_recipe(&user.id, &sample_recipe("Brine")).unwrap();
        let salt = db.insert_ingredient(&user.id, "salt", "g").unwrap();

        db.apply_recipe_links(&recipe.id, &[link(&salt, 10.0, "g"), link(&salt, 1.0, "tbsp")])
            .unwrap();
        let changes = db
            .apply_recipe_links(&recipe.id, &[link(&salt, 10.0, "g")])
            .unwrap();
        assert_eq!(changes.unchanged, 1);
        assert_eq!(changes.deleted, 1);
        assert_eq!(db.get_recipe_ingredients(&recipe.id).unwrap().len(), 1);
    }

    #[test]
    fn test_with_transaction_rolls_back() {
        let (db, user) = setup();
        let result: Result<()> = db.with_transaction(|db| {
            db.insert_recipe(&user.id, &sample_recipe("Doomed"))?;
            bail!("boom")
        });
        assert!(result.is_err());
        assert!(db.list_recipes(&user.id, None).unwrap().is_empty());

        db.with_transaction(|db| {
            db.with_transaction(|db| db.insert_recipe(&user.id, &sample_recipe("Kept")))
        })
        .unwrap();
        assert_eq!(db.list_recipes(&user.id, None).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_recipe_cascades() {
        let (db, user) = setup();
        let recipe = db.insert_recipe(&user.id, &sample_recipe("Stew")).unwrap();
        let beef = db.insert_ingredient(&user.id, "beef", "g").unwrap();
        db.apply_recipe_links(&recipe.id, &[link(&beef, 500.0, "g")])
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        db.insert_meal_plan_entry(&user.id, &recipe.id, date, "dinner")
            .unwrap();

        assert!(db.delete_recipe(&user.id, &recipe.id).unwrap());
        assert!(db.get_recipe_ingredients(&recipe.id).unwrap().is_empty());
        assert!(db.list_all_meal_plan(&user.id).unwrap().is_empty());
        // The catalog entry outlives the recipe.
        assert!(db.find_ingredient(&user.id, "beef").unwrap().is_some());
    }

    #[test]
    fn test_meal_plan_range_and_order() {
        let (db, user) = setup();
        let recipe = db.insert_recipe(&user.id, &sample_recipe("Oats")).unwrap();
        let d = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();

        db.insert_meal_plan_entry(&user.id, &recipe.id, d(11), "dinner")
            .unwrap();
        db.insert_meal_plan_entry(&user.id, &recipe.id, d(11), "breakfast")
            .unwrap();
        db.insert_meal_plan_entry(&user.id, &recipe.id, d(10), "snack")
            .unwrap();
        db.insert_meal_plan_entry(&user.id, &recipe.id, d(17), "lunch")
            .unwrap();

        let week = db.list_meal_plan(&user.id, d(10), d(16)).unwrap();
        let keys: Vec<(&str, &str)> = week
            .iter()
            .map(|m| (m.entry.planned_date.as_str(), m.entry.meal_type.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2024-06-10", "snack"),
                ("2024-06-11", "breakfast"),
                ("2024-06-11", "dinner"),
            ]
        );
        assert_eq!(week[0].recipe.title, "Oats");
        assert_eq!(db.list_all_meal_plan(&user.id).unwrap().len(), 4);
    }

    #[test]
    fn test_delete_meal_plan_entry_scoped() {
        let (db, user) = setup();
        let other = db.create_user("other@example.com", None).unwrap();
        let recipe = db.insert_recipe(&user.id, &sample_recipe("Oats")).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let entry = db
            .insert_meal_plan_entry(&user.id, &recipe.id, date, "breakfast")
            .unwrap();

        assert!(!db.delete_meal_plan_entry(&other.id, &entry.id).unwrap());
        assert!(db.delete_meal_plan_entry(&user.id, &entry.id).unwrap());
        assert!(!db.delete_meal_plan_entry(&user.id, &entry.id).unwrap());
    }

    #[test]
    fn test_shopping_list_order_and_toggle() {
        let (db, user) = setup();
        let first = db
            .insert_shopping_item(&user.id, "milk", 1.0, "l", None)
            .unwrap();
        let second = db
            .insert_shopping_item(&user.id, "eggs", 12.0, "unit", None)
            .unwrap();
        let third = db
            .insert_shopping_item(&user.id, "flour", 500.0, "g", None)
            .unwrap();
        assert!(!first.is_purchased);

        let toggled = db.toggle_shopping_item(&user.id, &third.id).unwrap();
        assert!(toggled.is_purchased);

        let items = db.list_shopping_items(&user.id).unwrap();
        let names: Vec<&str> = items.iter().map(|i| i.ingredient_name.as_str()).collect();
        assert_eq!(names, vec!["eggs", "milk", "flour"]);

        let back = db.toggle_shopping_item(&user.id, &third.id).unwrap();
        assert!(!back.is_purchased);
        assert!(db.toggle_shopping_item(&user.id, "missing").is_err());
        assert_eq!(second.unit, "unit");
    }

    #[test]
    fn test_shopping_bulk_operations() {
        let (db, user) = setup();
        let other = db.create_user("other@example.com", None).unwrap();
        let a = db.insert_shopping_item(&user.id, "rice", 1.0, "kg", None).unwrap();
        let b = db.insert_shopping_item(&user.id, "rice", 2.0, "kg", None).unwrap();
        let c = db.insert_shopping_item(&user.id, "salt", 1.0, "unit", None).unwrap();
        let foreign = db
            .insert_shopping_item(&other.id, "rice", 1.0, "kg", None)
            .unwrap();

        let ids = vec![a.id.clone(), b.id.clone(), foreign.id.clone()];
        assert_eq!(db.set_items_purchased(&user.id, &ids, true).unwrap(), 2);
        assert!(!db.get_shopping_item(&other.id, &foreign.id).unwrap().is_purchased);

        assert_eq!(db.clear_purchased(&user.id).unwrap(), 2);
        let remaining = db.list_shopping_items(&user.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, c.id);

        assert_eq!(db.delete_shopping_items(&user.id, &[c.id.clone()]).unwrap(), 1);
        assert!(!db.delete_shopping_item(&user.id, &c.id).unwrap());
        assert_eq!(db.list_shopping_items(&other.id).unwrap().len(), 1);
    }

    #[test]
    fn test_notifications() {
        let (db, user) = setup();
        let first = db
            .insert_notification(&user.id, "Breakfast", "Time to plan breakfast", "meal")
            .unwrap();
        db.insert_notification(&user.id, "Lunch", "Time to plan lunch", "meal")
            .unwrap();
        assert_eq!(db.unread_notification_count(&user.id).unwrap(), 2);

        let listed = db.list_notifications(&user.id).unwrap();
        assert_eq!(listed[0].title, "Lunch");

        assert!(db.mark_notification_read(&user.id, &first.id).unwrap());
        assert_eq!(db.unread_notification_count(&user.id).unwrap(), 1);
        assert_eq!(db.mark_all_notifications_read(&user.id).unwrap(), 1);
        assert_eq!(db.unread_notification_count(&user.id).unwrap(), 0);

        assert_eq!(db.clear_notifications(&user.id).unwrap(), 2);
        assert!(db.list_notifications(&user.id).unwrap().is_empty());
    }
}
