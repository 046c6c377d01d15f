use anyhow::{Context, Result};
use serde::Serialize;

use crate::db::{Database, RecipeLink};
use crate::models::{Ingredient, NewRecipe, RecipeDetail, normalize_name, validate_new_recipe};

/// Outcome of one item in a batch operation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-item results of a batch; failed items never stop the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn record(&mut self, label: impl Into<String>, outcome: Result<String>) {
        let label = label.into();
        match outcome {
            Ok(id) => self.items.push(BatchItem {
                label,
                id: Some(id),
                error: None,
            }),
            Err(e) => {
                tracing::warn!("{label}: {e:#}");
                self.items.push(BatchItem {
                    label,
                    id: None,
                    error: Some(format!("{e:#}")),
                });
            }
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_none()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}

/// Resolve a name to the user's catalog ingredient, creating it with
/// `unit` as its default when absent. Returns whether it was created.
pub fn resolve_ingredient(
    db: &Database,
    user_id: &str,
    name: &str,
    unit: &str,
) -> Result<(Ingredient, bool)> {
    let key = normalize_name(name);
    if let Some(existing) = db.find_ingredient(user_id, &key)? {
        return Ok((existing, false));
    }
    let created = db.insert_ingredient(user_id, &key, unit)?;
    Ok((created, true))
}

/// Create a recipe, or replace an existing one when `recipe_id` is given.
///
/// Runs in one transaction: any failure leaves the store untouched.
pub fn save_recipe(
    db: &Database,
    user_id: &str,
    recipe_id: Option<&str>,
    input: &NewRecipe,
) -> Result<RecipeDetail> {
    let recipe = validate_new_recipe(input)?;

    db.with_transaction(|db| {
        let row = match recipe_id {
            Some(id) => db.update_recipe_row(user_id, id, &recipe)?,
            None => db.insert_recipe(user_id, &recipe)?,
        };

        let mut links = Vec::with_capacity(recipe.ingredients.len());
        for line in &recipe.ingredients {
            let (ingredient, _) = resolve_ingredient(db, user_id, &line.name, &line.unit)
                .with_context(|| format!("Failed to resolve ingredient '{}'", line.name))?;
            links.push(RecipeLink {
                ingredient_id: ingredient.id,
                quantity: line.quantity,
                unit: line.unit.clone(),
            });
        }

        let changes = db.apply_recipe_links(&row.id, &links)?;
        tracing::debug!(recipe = %row.id, ?changes, "recipe lines applied");

        db.get_recipe_detail(user_id, &row.id)
    })
}

/// Save each recipe independently, recording per-recipe outcomes.
pub fn save_recipes(db: &Database, user_id: &str, inputs: &[NewRecipe]) -> BatchReport {
    let mut report = BatchReport::default();
    for input in inputs {
        let outcome = save_recipe(db, user_id, None, input).map(|d| d.recipe.id);
        report.record(input.title.clone(), outcome);
    }
    report
}
