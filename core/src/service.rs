use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};

use crate::backup::{self, BackupData};
use crate::db::Database;
use crate::generator::{self, GenerateRequest, GeneratedRecipe, GeneratorError, RecipeGenerator};
use crate::models::{
    ImportSummary, NewMealPlanEntry, NewRecipe, NewShoppingItem, Notification, Recipe,
    RecipeDetail, ShoppingListItem, User,
};
use crate::planner::{self, PlannedWithShopping, WeekPlan};
use crate::print;
use crate::reconcile::{self, BatchReport};
use crate::shopping::{self, ShoppingCounts, ShoppingGroup};

/// Single-user facade over the store for embedding hosts.
///
/// Every call acts as the user the service was opened for. Hosts that talk
/// to a remote model implement [`RecipeGenerator`] and pass it per call.
pub struct PantryService {
    db: Database,
    user: User,
}

impl PantryService {
    pub fn new(db_path: &str, user_email: &str) -> Result<Self> {
        let db = Database::open(Path::new(db_path))?;
        let user = db.get_or_create_user(user_email)?;
        Ok(Self { db, user })
    }

    pub fn new_in_memory(user_email: &str) -> Result<Self> {
        let db = Database::open_in_memory()?;
        let user = db.get_or_create_user(user_email)?;
        Ok(Self { db, user })
    }

    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    // --- Recipes ---

    pub fn create_recipe(&self, recipe: &NewRecipe) -> Result<RecipeDetail> {
        reconcile::save_recipe(&self.db, &self.user.id, None, recipe)
    }

    pub fn update_recipe(&self, id: &str, recipe: &NewRecipe) -> Result<RecipeDetail> {
        reconcile::save_recipe(&self.db, &self.user.id, Some(id), recipe)
    }

    pub fn create_recipes(&self, recipes: &[NewRecipe]) -> BatchReport {
        reconcile::save_recipes(&self.db, &self.user.id, recipes)
    }

    pub fn get_recipe(&self, id: &str) -> Result<RecipeDetail> {
        self.db.get_recipe_detail(&self.user.id, id)
    }

    pub fn list_recipes(&self, search: Option<&str>) -> Result<Vec<Recipe>> {
        self.db.list_recipes(&self.user.id, search)
    }

    pub fn delete_recipe(&self, id: &str) -> Result<bool> {
        self.db.delete_recipe(&self.user.id, id)
    }

    // --- Generation ---

    pub fn generate_recipe(
        &self,
        provider: &dyn RecipeGenerator,
        request: &GenerateRequest,
    ) -> Result<GeneratedRecipe, GeneratorError> {
        generator::generate_recipe(provider, request)
    }

    /// Generate and store in one call.
    pub fn generate_and_save(
        &self,
        provider: &dyn RecipeGenerator,
        request: &GenerateRequest,
    ) -> Result<RecipeDetail> {
        let generated = self.generate_recipe(provider, request)?;
        self.create_recipe(&generated.into_new_recipe())
            .context("Failed to save generated recipe")
    }

    // --- Meal plan ---

    pub fn plan_meal(
        &self,
        request: &NewMealPlanEntry,
        add_to_shopping_list: bool,
    ) -> Result<PlannedWithShopping> {
        planner::plan_meal(&self.db, &self.user.id, request, add_to_shopping_list)
    }

    pub fn week_plan(&self, date: &str) -> Result<WeekPlan> {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")?;
        planner::week_plan(&self.db, &self.user.id, date)
    }

    pub fn remove_meal(&self, id: &str) -> Result<bool> {
        self.db.delete_meal_plan_entry(&self.user.id, id)
    }

    // --- Shopping list ---

    pub fn shopping_items(&self) -> Result<Vec<ShoppingListItem>> {
        self.db.list_shopping_items(&self.user.id)
    }

    pub fn shopping_groups(&self) -> Result<(Vec<ShoppingGroup>, ShoppingCounts)> {
        let items = self.shopping_items()?;
        Ok((shopping::aggregate(&items), shopping::counts(&items)))
    }

    pub fn add_shopping_item(&self, item: &NewShoppingItem) -> Result<ShoppingListItem> {
        shopping::add_item(&self.db, &self.user.id, item)
    }

    /// Mark every item of a group at once.
    pub fn set_group_purchased(&self, group: &ShoppingGroup, purchased: bool) -> Result<usize> {
        self.db
            .set_items_purchased(&self.user.id, &group.item_ids, purchased)
    }

    pub fn delete_group(&self, group: &ShoppingGroup) -> Result<usize> {
        self.db.delete_shopping_items(&self.user.id, &group.item_ids)
    }

    pub fn clear_purchased(&self) -> Result<usize> {
        self.db.clear_purchased(&self.user.id)
    }

    pub fn printable_list(&self) -> Result<String> {
        let (groups, _) = self.shopping_groups()?;
        Ok(print::render_text(
            &print::printable_rows(&groups),
            Local::now().date_naive(),
        ))
    }

    pub fn printable_pdf(&self) -> Result<Vec<u8>> {
        let (groups, _) = self.shopping_groups()?;
        print::render_pdf(&print::printable_rows(&groups), Local::now().date_naive())
    }

    // --- Notifications ---

    pub fn notifications(&self) -> Result<Vec<Notification>> {
        self.db.list_notifications(&self.user.id)
    }

    pub fn unread_notifications(&self) -> Result<i64> {
        self.db.unread_notification_count(&self.user.id)
    }

    pub fn mark_notification_read(&self, id: &str) -> Result<bool> {
        self.db.mark_notification_read(&self.user.id, id)
    }

    // --- Backup ---

    pub fn export_all(&self) -> Result<BackupData> {
        backup::export_backup(&self.db, &self.user.id)
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_all()?)?)
    }

    pub fn import_json(&self, json: &str) -> Result<ImportSummary> {
        let data = backup::parse_backup(json)?;
        Ok(backup::import_backup(&self.db, &self.user.id, &data))
    }

    pub fn export_csv(&self) -> Result<String> {
        backup::recipes_csv(&self.db, &self.user.id)
    }
}
