use anyhow::Result;

use pantry_core::db::Database;
use pantry_core::generator::{GenerateRequest, GeneratedRecipe};
use pantry_core::models::format_quantity;
use pantry_core::reconcile::save_recipe;

use crate::config::GeminiSettings;
use crate::gemini::GeminiClient;

/// Ask the generator for a recipe; with `save` it is stored right away.
pub(crate) async fn cmd_generate(
    db: &Database,
    user_id: &str,
    settings: &GeminiSettings,
    ingredients: Vec<String>,
    preferences: Option<String>,
    save: bool,
    json: bool,
) -> Result<()> {
    let request = GenerateRequest {
        ingredients,
        preferences,
    };
    let client = GeminiClient::new(settings)?;
    eprintln!("Asking Gemini for a recipe...");
    let generated = client.generate_async(&request).await?;

    let saved = if save {
        Some(save_recipe(db, user_id, None, &generated.clone().into_new_recipe())?)
    } else {
        None
    };

    if json {
        let out = match &saved {
            Some(detail) => serde_json::to_string_pretty(detail)?,
            None => serde_json::to_string_pretty(&generated)?,
        };
        println!("{out}");
        return Ok(());
    }

    print!("{}", render_generated(&generated));
    match saved {
        Some(detail) => println!("\nSaved as recipe {}", detail.recipe.id),
        None => println!("\nRun again with --save to keep it"),
    }
    Ok(())
}

fn render_generated(recipe: &GeneratedRecipe) -> String {
    use std::fmt::Write;

    let mut out = format!("=== {} ===\n", recipe.title);
    if let Some(prep) = recipe.prep_time {
        let _ = writeln!(out, "  Prep: {prep} min");
    }
    if let Some(cal) = recipe.macros.as_ref().and_then(|m| m.calories) {
        let _ = writeln!(out, "  About {cal:.0} kcal");
    }
    out.push('\n');
    for line in &recipe.ingredients {
        let _ = writeln!(
            out,
            "  - {} {} {}",
            format_quantity(line.quantity),
            line.unit,
            line.name
        );
    }
    out.push('\n');
    for l in recipe.instructions.lines() {
        let _ = writeln!(out, "  {l}");
    }
    out
}
