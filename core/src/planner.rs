use anyhow::{Context, Result};
use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;

use crate::db::Database;
use crate::models::{MealPlanEntry, NewMealPlanEntry, PlannedMeal, ShoppingListItem, validate_meal_type};

/// Monday and Sunday of the week containing `date`.
///
/// Fails when that week runs past the range chrono can represent.
pub fn week_bounds(date: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let offset = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(offset))
        .and_then(|start| Some((start, start.checked_add_days(Days::new(6))?)))
        .with_context(|| format!("Date {date} is out of range"))
}

/// The seven days of the week containing `date`, Monday first.
pub fn week_days(date: NaiveDate) -> Result<Vec<NaiveDate>> {
    let (start, _) = week_bounds(date)?;
    Ok(start.iter_days().take(7).collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanDay {
    pub date: String,
    pub weekday: String,
    pub meals: Vec<PlannedMeal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekPlan {
    pub start: String,
    pub end: String,
    pub days: Vec<PlanDay>,
}

pub fn week_plan(db: &Database, user_id: &str, date: NaiveDate) -> Result<WeekPlan> {
    let (start, end) = week_bounds(date)?;
    let mut meals = db.list_meal_plan(user_id, start, end)?;

    let days = week_days(date)?
        .into_iter()
        .map(|day| {
            let key = day.format("%Y-%m-%d").to_string();
            let (today, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut meals)
                .into_iter()
                .partition(|m| m.entry.planned_date == key);
            meals = rest;
            PlanDay {
                date: key,
                weekday: day.format("%A").to_string(),
                meals: today,
            }
        })
        .collect();

    Ok(WeekPlan {
        start: start.format("%Y-%m-%d").to_string(),
        end: end.format("%Y-%m-%d").to_string(),
        days,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedWithShopping {
    pub entry: MealPlanEntry,
    pub shopping_items: Vec<ShoppingListItem>,
}

/// Put a recipe on the calendar, optionally copying its ingredient lines
/// onto the shopping list. Both happen in one transaction.
pub fn plan_meal(
    db: &Database,
    user_id: &str,
    request: &NewMealPlanEntry,
    add_to_shopping_list: bool,
) -> Result<PlannedWithShopping> {
    let meal_type = validate_meal_type(&request.meal_type)?;
    let date = NaiveDate::parse_from_str(request.planned_date.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD", request.planned_date))?;

    db.with_transaction(|db| {
        let recipe = db.get_recipe(user_id, &request.recipe_id)?;
        let entry = db.insert_meal_plan_entry(user_id, &recipe.id, date, &meal_type)?;

        let mut shopping_items = Vec::new();
        if add_to_shopping_list {
            shopping_items = add_recipe_to_shopping_list(db, user_id, &recipe.id)?;
        }
        Ok(PlannedWithShopping {
            entry,
            shopping_items,
        })
    })
}

/// One unpurchased item per recipe line.
pub fn add_recipe_to_shopping_list(
    db: &Database,
    user_id: &str,
    recipe_id: &str,
) -> Result<Vec<ShoppingListItem>> {
    let detail = db.get_recipe_detail(user_id, recipe_id)?;
    db.with_transaction(|db| {
        detail
            .ingredients
            .iter()
            .map(|line| {
                db.insert_shopping_item(
                    user_id,
                    &line.ingredient.name,
                    line.quantity,
                    &line.unit,
                    Some(line.ingredient.id.as_str()),
                )
            })
            .collect()
    })
}
