use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::models::{
    ImportSummary, IngredientInput, Macros, NewMealPlanEntry, NewRecipe, RecipeDetail,
    format_quantity,
};
use crate::planner::plan_meal;
use crate::reconcile::save_recipes;

pub const BACKUP_VERSION: &str = "1.0";

/// Full export of one user's recipes and meal plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupData {
    pub recipes: Vec<BackupRecipe>,
    #[serde(rename = "mealPlans")]
    pub meal_plans: Vec<BackupMealPlan>,
    #[serde(rename = "exportDate", default, skip_serializing_if = "Option::is_none")]
    pub export_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecipe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub prep_time: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub macros: Option<Macros>,
    #[serde(default)]
    pub ingredients: Vec<BackupRecipeLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecipeLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
    pub ingredient: BackupIngredient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupIngredient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMealPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub planned_date: String,
    pub meal_type: String,
    pub recipe: BackupRecipeRef,
}

/// Meal plans point at recipes by title; ids do not survive an import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecipeRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
}

impl From<RecipeDetail> for BackupRecipe {
    fn from(detail: RecipeDetail) -> Self {
        let recipe = detail.recipe;
        BackupRecipe {
            id: Some(recipe.id),
            title: recipe.title,
            instructions: recipe.instructions,
            prep_time: recipe.prep_time,
            image_url: recipe.image_url,
            macros: recipe.macros,
            ingredients: detail
                .ingredients
                .into_iter()
                .map(|line| BackupRecipeLine {
                    id: Some(line.id),
                    quantity: line.quantity,
                    unit: line.unit,
                    ingredient: BackupIngredient {
                        id: Some(line.ingredient.id),
                        name: line.ingredient.name,
                        default_unit: Some(line.ingredient.default_unit),
                    },
                })
                .collect(),
            created_at: Some(recipe.created_at),
            updated_at: Some(recipe.updated_at),
        }
    }
}

impl BackupRecipe {
    fn to_new_recipe(&self) -> NewRecipe {
        NewRecipe {
            title: self.title.clone(),
            instructions: self.instructions.clone(),
            prep_time: self.prep_time,
            image_url: self.image_url.clone(),
            macros: self.macros.clone(),
            ingredients: self
                .ingredients
                .iter()
                .map(|line| IngredientInput {
                    name: line.ingredient.name.clone(),
                    quantity: line.quantity,
                    unit: if line.unit.trim().is_empty() {
                        line.ingredient.default_unit.clone().unwrap_or_default()
                    } else {
                        line.unit.clone()
                    },
                })
                .collect(),
        }
    }
}

pub fn export_backup(db: &Database, user_id: &str) -> Result<BackupData> {
    let recipes = db
        .list_recipe_details(user_id)?
        .into_iter()
        .map(BackupRecipe::from)
        .collect();
    let meal_plans = db
        .list_all_meal_plan(user_id)?
        .into_iter()
        .map(|planned| BackupMealPlan {
            id: Some(planned.entry.id),
            planned_date: planned.entry.planned_date,
            meal_type: planned.entry.meal_type,
            recipe: BackupRecipeRef {
                id: Some(planned.recipe.id),
                title: planned.recipe.title,
            },
        })
        .collect();

    Ok(BackupData {
        recipes,
        meal_plans,
        export_date: Some(Local::now().to_rfc3339()),
        version: Some(BACKUP_VERSION.to_string()),
    })
}

/// Parse a backup file. Both `recipes` and `mealPlans` must be present.
pub fn parse_backup(json: &str) -> Result<BackupData> {
    serde_json::from_str(json).context("Invalid backup file")
}

/// Recipes are always created new; meal plans are relinked by exact title.
pub fn import_backup(db: &Database, user_id: &str, data: &BackupData) -> ImportSummary {
    let mut summary = ImportSummary::default();

    let inputs: Vec<NewRecipe> = data.recipes.iter().map(BackupRecipe::to_new_recipe).collect();
    let report = save_recipes(db, user_id, &inputs);
    summary.recipes_imported = report.succeeded();
    summary.recipes_failed = report.failed();

    for plan in &data.meal_plans {
        let recipe = match db.find_recipe_by_title(user_id, &plan.recipe.title) {
            Ok(Some(recipe)) => recipe,
            Ok(None) => {
                tracing::debug!(title = %plan.recipe.title, "no recipe for meal plan, skipping");
                summary.meal_plans_skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!("Meal plan '{}': {e:#}", plan.recipe.title);
                summary.meal_plans_failed += 1;
                continue;
            }
        };

        let request = NewMealPlanEntry {
            recipe_id: recipe.id,
            planned_date: plan.planned_date.clone(),
            meal_type: plan.meal_type.clone(),
        };
        match plan_meal(db, user_id, &request, false) {
            Ok(_) => summary.meal_plans_imported += 1,
            Err(e) => {
                tracing::warn!("Meal plan '{}' on {}: {e:#}", plan.recipe.title, plan.planned_date);
                summary.meal_plans_failed += 1;
            }
        }
    }

    tracing::info!(
        recipes = summary.recipes_imported,
        recipes_failed = summary.recipes_failed,
        meal_plans = summary.meal_plans_imported,
        skipped = summary.meal_plans_skipped,
        failed = summary.meal_plans_failed,
        "backup imported"
    );
    summary
}

/// Recipes as CSV with every cell quoted.
pub fn recipes_csv(db: &Database, user_id: &str) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    wtr.write_record(["Title", "Prep time", "Ingredients", "Instructions"])?;

    for detail in db.list_recipe_details(user_id)? {
        let ingredients = detail
            .ingredients
            .iter()
            .map(|line| {
                format!(
                    "{} {} {}",
                    format_quantity(line.quantity),
                    line.unit,
                    line.ingredient.name
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        let prep = detail
            .recipe
            .prep_time
            .map(|p| p.to_string())
            .unwrap_or_default();
        wtr.write_record([
            detail.recipe.title.as_str(),
            prep.as_str(),
            ingredients.as_str(),
            detail.recipe.instructions.as_deref().unwrap_or_default(),
        ])?;
    }

    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes).context("CSV output was not valid UTF-8")
}
