use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

/// Unit used when a recipe line or shopping item arrives without one.
pub const DEFAULT_UNIT: &str = "unit";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub default_unit: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,
}

impl Macros {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calories.is_none() && self.protein.is_none() && self.carbs.is_none() && self.fat.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub instructions: Option<String>,
    pub prep_time: Option<i64>,
    pub image_url: Option<String>,
    pub macros: Option<Macros>,
    pub created_at: String,
    pub updated_at: String,
}

/// A recipe line joined with its catalog ingredient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub id: String,
    pub quantity: f64,
    pub unit: String,
    pub ingredient: Ingredient,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub ingredients: Vec<RecipeIngredient>,
}

/// One ingredient line as entered by a user, an import file, or the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientInput {
    pub name: String,
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRecipe {
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
    pub ingredients: Vec<IngredientInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPlanEntry {
    pub id: String,
    pub user_id: String,
    pub recipe_id: String,
    pub planned_date: String,
    pub meal_type: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedMeal {
    #[serde(flatten)]
    pub entry: MealPlanEntry,
    pub recipe: Recipe,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMealPlanEntry {
    pub recipe_id: String,
    pub planned_date: String,
    pub meal_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingListItem {
    pub id: String,
    pub user_id: String,
    pub ingredient_id: Option<String>,
    pub ingredient_name: String,
    pub quantity: f64,
    pub unit: String,
    pub is_purchased: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewShoppingItem {
    pub ingredient_name: String,
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub ingredient_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub kind: String,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub recipes_imported: usize,
    pub recipes_failed: usize,
    pub meal_plans_imported: usize,
    pub meal_plans_skipped: usize,
    pub meal_plans_failed: usize,
}

/// Trim and lowercase an ingredient name into its catalog key.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Trimmed unit, or [`DEFAULT_UNIT`] when blank.
#[must_use]
pub fn normalize_unit(unit: &str) -> String {
    let unit = unit.trim();
    if unit.is_empty() {
        DEFAULT_UNIT.to_string()
    } else {
        unit.to_string()
    }
}

pub fn validate_meal_type(meal: &str) -> Result<String> {
    let lower = meal.to_lowercase();
    if MEAL_TYPES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid meal type '{meal}'. Must be one of: {}",
            MEAL_TYPES.join(", ")
        )
    }
}

pub fn validate_quantity(quantity: f64) -> Result<()> {
    if !quantity.is_finite() || quantity <= 0.0 {
        bail!("Quantity must be a positive number, got {quantity}");
    }
    Ok(())
}

/// Check a recipe and return it with blank ingredient lines dropped and
/// names and units normalized.
pub fn validate_new_recipe(recipe: &NewRecipe) -> Result<NewRecipe> {
    let title = recipe.title.trim();
    if title.is_empty() {
        bail!("Recipe title must not be empty");
    }
    if let Some(prep) = recipe.prep_time {
        if prep < 0 {
            bail!("Prep time must not be negative");
        }
    }

    let mut ingredients = Vec::with_capacity(recipe.ingredients.len());
    for line in &recipe.ingredients {
        let name = normalize_name(&line.name);
        if name.is_empty() {
            continue;
        }
        if validate_quantity(line.quantity).is_err() {
            bail!(
                "Ingredient '{name}' needs a positive quantity, got {}",
                line.quantity
            );
        }
        ingredients.push(IngredientInput {
            name,
            quantity: line.quantity,
            unit: normalize_unit(&line.unit),
        });
    }

    Ok(NewRecipe {
        title: title.to_string(),
        instructions: recipe.instructions.clone(),
        prep_time: recipe.prep_time,
        image_url: recipe.image_url.clone().filter(|u| !u.trim().is_empty()),
        macros: recipe.macros.clone(),
        ingredients,
    })
}

/// Render a quantity the way it reads on a list: `500`, `0.5`, `1.25`.
#[must_use]
pub fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 && quantity.abs() < 1e15 {
        format!("{quantity:.0}")
    } else {
        let s = format!("{quantity:.3}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
