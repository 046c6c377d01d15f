use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use pantry_core::db::Database;
use pantry_core::models::{IngredientInput, Macros, NewRecipe, RecipeDetail, format_quantity};
use pantry_core::reconcile::{BatchReport, save_recipe};

use super::helpers::{parse_ingredient_spec, resolve_recipe, short_id, truncate};

/// Optional recipe fields shared by `create` and `edit`.
#[derive(Debug, Default, clap::Args)]
pub(crate) struct RecipeFields {
    /// Ingredient as "name:amount", e.g. "tomato:200g" (repeatable)
    #[arg(short, long = "ingredient")]
    pub ingredients: Vec<String>,
    #[arg(long)]
    pub instructions: Option<String>,
    /// Preparation time in minutes
    #[arg(long)]
    pub prep: Option<i64>,
    #[arg(long)]
    pub image: Option<String>,
    #[arg(long)]
    pub calories: Option<f64>,
    #[arg(long)]
    pub protein: Option<f64>,
    #[arg(long)]
    pub carbs: Option<f64>,
    #[arg(long)]
    pub fat: Option<f64>,
}

impl RecipeFields {
    fn ingredient_inputs(&self) -> Result<Vec<IngredientInput>> {
        self.ingredients
            .iter()
            .map(|s| parse_ingredient_spec(s))
            .collect()
    }

    /// Macros given on the command line, layered over `base`.
    fn macros(&self, base: Option<Macros>) -> Option<Macros> {
        let mut macros = base.unwrap_or_default();
        macros.calories = self.calories.or(macros.calories);
        macros.protein = self.protein.or(macros.protein);
        macros.carbs = self.carbs.or(macros.carbs);
        macros.fat = self.fat.or(macros.fat);
        (!macros.is_empty()).then_some(macros)
    }
}

pub(crate) fn cmd_recipe_create(
    db: &Database,
    user_id: &str,
    title: &str,
    fields: &RecipeFields,
    json: bool,
) -> Result<()> {
    let input = NewRecipe {
        title: title.to_string(),
        instructions: fields.instructions.clone(),
        prep_time: fields.prep,
        image_url: fields.image.clone(),
        macros: fields.macros(None),
        ingredients: fields.ingredient_inputs()?,
    };
    let detail = save_recipe(db, user_id, None, &input)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        let count = detail.ingredients.len();
        println!(
            "Created recipe: {} (id: {}, {count} ingredients)",
            detail.recipe.title, detail.recipe.id
        );
    }
    Ok(())
}

/// Update a recipe. Ingredient lines are replaced only when `-i` is given.
pub(crate) fn cmd_recipe_edit(
    db: &Database,
    user_id: &str,
    reference: &str,
    new_title: Option<String>,
    fields: &RecipeFields,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(db, user_id, reference)?;
    let current = db.get_recipe_detail(user_id, &recipe.id)?;

    let ingredients = if fields.ingredients.is_empty() {
        current
            .ingredients
            .iter()
            .map(|line| IngredientInput {
                name: line.ingredient.name.clone(),
                quantity: line.quantity,
                unit: line.unit.clone(),
            })
            .collect()
    } else {
        fields.ingredient_inputs()?
    };

    let input = NewRecipe {
        title: new_title.unwrap_or(current.recipe.title),
        instructions: fields.instructions.clone().or(current.recipe.instructions),
        prep_time: fields.prep.or(current.recipe.prep_time),
        image_url: fields.image.clone().or(current.recipe.image_url),
        macros: fields.macros(current.recipe.macros),
        ingredients,
    };
    let detail = save_recipe(db, user_id, Some(&recipe.id), &input)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        println!(
            "Updated recipe: {} ({} ingredients)",
            detail.recipe.title,
            detail.ingredients.len()
        );
    }
    Ok(())
}

pub(crate) fn cmd_recipe_list(
    db: &Database,
    user_id: &str,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Prep")]
        prep: String,
        #[tabled(rename = "kcal")]
        calories: String,
    }

    let recipes = db.list_recipes(user_id, search)?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: short_id(&r.id).to_string(),
            title: truncate(&r.title, 40),
            prep: r.prep_time.map_or_else(String::new, |m| format!("{m} min")),
            calories: r
                .macros
                .as_ref()
                .and_then(|m| m.calories)
                .map_or_else(String::new, |c| format!("{c:.0}")),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_recipe_show(
    db: &Database,
    user_id: &str,
    reference: &str,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(db, user_id, reference)?;
    let detail = db.get_recipe_detail(user_id, &recipe.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }
    print!("{}", render_detail(&detail));
    Ok(())
}

fn render_detail(detail: &RecipeDetail) -> String {
    use std::fmt::Write;

    let recipe = &detail.recipe;
    let mut out = format!("=== {} ===\n", recipe.title);
    let _ = writeln!(out, "  id: {}", recipe.id);
    if let Some(prep) = recipe.prep_time {
        let _ = writeln!(out, "  Prep: {prep} min");
    }
    if let Some(m) = &recipe.macros {
        let show = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.0}"));
        let _ = writeln!(
            out,
            "  {} kcal | P:{}g C:{}g F:{}g",
            show(m.calories),
            show(m.protein),
            show(m.carbs),
            show(m.fat)
        );
    }

    out.push_str("\n  INGREDIENTS:\n");
    if detail.ingredients.is_empty() {
        out.push_str("    (none)\n");
    }
    for line in &detail.ingredients {
        let _ = writeln!(
            out,
            "    {} {} {}",
            format_quantity(line.quantity),
            line.unit,
            line.ingredient.name
        );
    }

    if let Some(instructions) = recipe.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str("\n  INSTRUCTIONS:\n");
        for l in instructions.lines() {
            let _ = writeln!(out, "    {l}");
        }
    }
    out
}

pub(crate) fn cmd_recipe_delete(
    db: &Database,
    user_id: &str,
    reference: &str,
    json: bool,
) -> Result<()> {
    let Ok(recipe) = resolve_recipe(db, user_id, reference) else {
        super::helpers::exit_not_found(&format!("Recipe '{reference}' not found"), json);
    };
    db.delete_recipe(user_id, &recipe.id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": recipe.id }));
    } else {
        println!("Deleted recipe: {}", recipe.title);
    }
    Ok(())
}

/// Import one or more Cooklang files. A bad file is reported and skipped.
pub(crate) fn cmd_recipe_import(
    db: &Database,
    user_id: &str,
    files: &[PathBuf],
    name_override: Option<String>,
    json: bool,
) -> Result<()> {
    if name_override.is_some() && files.len() > 1 {
        bail!("--name can only be used when importing a single file");
    }

    let mut report = BatchReport::default();
    for file in files {
        let label = file.display().to_string();
        let outcome = read_cooklang(file, name_override.clone())
            .and_then(|input| save_recipe(db, user_id, None, &input))
            .map(|detail| detail.recipe.id);
        report.record(label, outcome);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for item in &report.items {
            match (&item.id, &item.error) {
                (Some(id), _) => println!("Imported {} (id: {id})", item.label),
                (None, Some(err)) => eprintln!("Failed {}: {err}", item.label),
                (None, None) => {}
            }
        }
        println!(
            "{} imported, {} failed",
            report.succeeded(),
            report.failed()
        );
    }

    if report.succeeded() == 0 {
        process::exit(1);
    }
    Ok(())
}

fn read_cooklang(file: &Path, name_override: Option<String>) -> Result<NewRecipe> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let fallback = file.file_stem().and_then(|s| s.to_str()).map(String::from);
    cooklang_to_recipe(&input, name_override, fallback)
}

/// Convert Cooklang source to a recipe. The title comes from `name_override`,
/// then the file's title metadata, then `fallback_title`.
pub(crate) fn cooklang_to_recipe(
    input: &str,
    name_override: Option<String>,
    fallback_title: Option<String>,
) -> Result<NewRecipe> {
    let (recipe_data, _report) = cooklang::parse(input)
        .into_result()
        .map_err(|e| anyhow::anyhow!("Failed to parse Cooklang file: {e}"))?;

    let title = name_override
        .or_else(|| recipe_data.metadata.title().map(String::from))
        .or(fallback_title)
        .filter(|t| !t.trim().is_empty())
        .context("Could not determine recipe title. Use --name to specify one")?;

    let converter = cooklang::Converter::default();
    let ingredients: Vec<IngredientInput> = recipe_data
        .group_ingredients(&converter)
        .iter()
        .flat_map(|gi| cooklang_lines(gi))
        .collect();
    if ingredients.is_empty() {
        bail!("No ingredients found in recipe");
    }

    let steps = plain_steps(input);
    Ok(NewRecipe {
        title,
        instructions: (!steps.is_empty()).then_some(steps),
        ingredients,
        ..NewRecipe::default()
    })
}

/// One line per grouped quantity; an ingredient without one counts once.
fn cooklang_lines(gi: &cooklang::ingredient_list::GroupedIngredient<'_>) -> Vec<IngredientInput> {
    let name = gi.ingredient.display_name().to_string();
    let mut lines: Vec<IngredientInput> = gi
        .quantity
        .iter()
        .map(|qty: &cooklang::Quantity| {
            let quantity = match qty.value() {
                cooklang::Value::Number(n) => n.value(),
                cooklang::Value::Range { start, .. } => start.value(),
                cooklang::Value::Text(t) => t.trim().parse().unwrap_or(1.0),
            };
            IngredientInput {
                name: name.clone(),
                quantity: if quantity > 0.0 { quantity } else { 1.0 },
                unit: qty.unit().map(String::from).unwrap_or_default(),
            }
        })
        .collect();
    if lines.is_empty() {
        lines.push(IngredientInput {
            name,
            quantity: 1.0,
            unit: String::new(),
        });
    }
    lines
}

/// Step text with Cooklang markup reduced to plain words, one paragraph
/// per step.
fn plain_steps(input: &str) -> String {
    let mut body = input;
    if let Some(rest) = input.trim_start().strip_prefix("---") {
        if let Some(end) = rest.find("\n---") {
            body = rest[end + 4..].trim_start_matches(['-', '\r', '\n']);
        }
    }

    let mut steps: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in body.lines() {
        let line = line.split("--").next().unwrap_or_default().trim();
        if line.starts_with(">>") || line.starts_with('=') {
            continue;
        }
        if line.is_empty() {
            if !current.is_empty() {
                steps.push(current.join(" "));
                current.clear();
            }
            continue;
        }
        current.push(strip_markup(line));
    }
    if !current.is_empty() {
        steps.push(current.join(" "));
    }

    steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_markup(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut marker = None;
    let mut in_braces = false;
    let mut braced = String::new();

    for c in line.chars() {
        if in_braces {
            if c == '}' {
                in_braces = false;
                // Timers keep their duration; amounts live in the ingredient list.
                if marker == Some('~') && !braced.is_empty() {
                    if !out.is_empty() && !out.ends_with(' ') {
                        out.push(' ');
                    }
                    out.push_str(&braced.replace('%', " "));
                }
                braced.clear();
                marker = None;
            } else {
                braced.push(c);
            }
            continue;
        }
        match c {
            '@' | '#' | '~' => marker = Some(c),
            '{' if marker.is_some() => in_braces = true,
            _ => {
                if c.is_whitespace() && !line.contains('{') {
                    marker = None;
                }
                out.push(c);
            }
        }
    }
    out.trim().to_string()
}
