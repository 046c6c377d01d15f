use std::path::Path;

use anyhow::{Context, Result};

use pantry_core::backup::{export_backup, import_backup, parse_backup, recipes_csv};
use pantry_core::db::Database;

/// Write `contents` to `output`, or stdout when no path is given.
fn write_out(output: Option<&Path>, contents: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, contents)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => print!("{contents}"),
    }
    Ok(())
}

pub(crate) fn cmd_backup_export(db: &Database, user_id: &str, output: Option<&Path>) -> Result<()> {
    let backup = export_backup(db, user_id)?;
    let mut json = serde_json::to_string_pretty(&backup)?;
    json.push('\n');
    write_out(output, &json)
}

pub(crate) fn cmd_backup_import(db: &Database, user_id: &str, file: &Path, json: bool) -> Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let backup = parse_backup(&input)?;
    let summary = import_backup(db, user_id, &backup);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Recipes: {} imported, {} failed",
            summary.recipes_imported, summary.recipes_failed
        );
        println!(
            "Meal plans: {} imported, {} skipped, {} failed",
            summary.meal_plans_imported, summary.meal_plans_skipped, summary.meal_plans_failed
        );
    }
    Ok(())
}

pub(crate) fn cmd_backup_csv(db: &Database, user_id: &str, output: Option<&Path>) -> Result<()> {
    write_out(output, &recipes_csv(db, user_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantry_core::models::{IngredientInput, NewMealPlanEntry, NewRecipe};
    use pantry_core::planner::plan_meal;
    use pantry_core::reconcile::save_recipe;

    #[test]
    fn test_export_then_import_into_another_user() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.get_or_create_user("alice@example.com").unwrap();
        let bob = db.get_or_create_user("bob@example.com").unwrap();

        let detail = save_recipe(
            &db,
            &alice.id,
            None,
            &NewRecipe {
                title: "Pesto Pasta".to_string(),
                ingredients: vec![IngredientInput {
                    name: "basil".to_string(),
                    quantity: 30.0,
                    unit: "g".to_string(),
                }],
                ..NewRecipe::default()
            },
        )
        .unwrap();
        plan_meal(
            &db,
            &alice.id,
            &NewMealPlanEntry {
                recipe_id: detail.recipe.id,
                planned_date: "2024-06-14".to_string(),
                meal_type: "dinner".to_string(),
            },
            false,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        cmd_backup_export(&db, &alice.id, Some(&path)).unwrap();
        cmd_backup_import(&db, &bob.id, &path, true).unwrap();

        let recipes = db.list_recipes(&bob.id, None).unwrap();
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].title, "Pesto Pasta");
        let plans = db.list_all_meal_plan(&bob.id).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].entry.planned_date, "2024-06-14");
    }

    #[test]
    fn test_import_rejects_garbage() {
        let db = Database::open_in_memory().unwrap();
        let user = db.get_or_create_user("local").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = cmd_backup_import(&db, &user.id, &path, true).unwrap_err();
        assert!(err.to_string().contains("Invalid backup file"));
    }

    #[test]
    fn test_csv_to_file() {
        let db = Database::open_in_memory().unwrap();
        let user = db.get_or_create_user("local").unwrap();
        save_recipe(
            &db,
            &user.id,
            None,
            &NewRecipe {
                title: "Oats".to_string(),
                prep_time: Some(5),
                ..NewRecipe::default()
            },
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipes.csv");
        cmd_backup_csv(&db, &user.id, Some(&path)).unwrap();
        let csv = std::fs::read_to_string(&path).unwrap();
        assert!(csv.lines().nth(1).unwrap().contains("\"Oats\""));
    }
}
