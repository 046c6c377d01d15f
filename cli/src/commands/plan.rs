use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Rows},
};

use pantry_core::db::Database;
use pantry_core::models::NewMealPlanEntry;
use pantry_core::planner::{self, WeekPlan};

use super::helpers::{exit_not_found, parse_date, resolve_recipe, short_id, truncate};

pub(crate) fn cmd_plan_add(
    db: &Database,
    user_id: &str,
    recipe: &str,
    date: Option<String>,
    meal: &str,
    shop: bool,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let Ok(recipe) = resolve_recipe(db, user_id, recipe) else {
        exit_not_found(&format!("Recipe '{recipe}' not found"), json);
    };

    let request = NewMealPlanEntry {
        recipe_id: recipe.id.clone(),
        planned_date: date.format("%Y-%m-%d").to_string(),
        meal_type: meal.to_string(),
    };
    let planned = planner::plan_meal(db, user_id, &request, shop)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&planned)?);
    } else {
        println!(
            "Planned {} for {} on {} (id: {})",
            recipe.title,
            planned.entry.meal_type,
            planned.entry.planned_date,
            planned.entry.id
        );
        if !planned.shopping_items.is_empty() {
            println!(
                "Added {} items to the shopping list",
                planned.shopping_items.len()
            );
        }
    }
    Ok(())
}

pub(crate) fn cmd_plan_remove(db: &Database, user_id: &str, id: &str, json: bool) -> Result<()> {
    if !db.delete_meal_plan_entry(user_id, id)? {
        exit_not_found(&format!("Meal plan entry '{id}' not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Removed meal plan entry {id}");
    }
    Ok(())
}

pub(crate) fn cmd_plan_week(
    db: &Database,
    user_id: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let week = planner::week_plan(db, user_id, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&week)?);
        return Ok(());
    }
    println!("Week of {} to {}", week.start, week.end);
    println!("{}", week_table(&week));
    Ok(())
}

fn week_table(week: &WeekPlan) -> String {
    #[derive(Tabled)]
    struct WeekRow {
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Recipe")]
        recipe: String,
        #[tabled(rename = "ID")]
        id: String,
    }

    let mut rows = Vec::new();
    for day in &week.days {
        let label = format!(
            "{} {}",
            day.weekday.get(..3).unwrap_or(&day.weekday),
            day.date.get(5..).unwrap_or(&day.date)
        );
        if day.meals.is_empty() {
            rows.push(WeekRow {
                day: label,
                meal: "-".to_string(),
                recipe: String::new(),
                id: String::new(),
            });
            continue;
        }
        for (i, planned) in day.meals.iter().enumerate() {
            rows.push(WeekRow {
                day: if i == 0 { label.clone() } else { String::new() },
                meal: planned.entry.meal_type.clone(),
                recipe: truncate(&planned.recipe.title, 30),
                id: short_id(&planned.entry.id).to_string(),
            });
        }
    }

    Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string()
}
