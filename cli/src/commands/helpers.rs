use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use pantry_core::db::Database;
use pantry_core::models::{IngredientInput, Recipe, format_quantity};
use pantry_core::shopping::ShoppingGroup;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Split an amount like "200g", "2 cups" or "3" into quantity and unit.
pub(crate) fn parse_amount(s: &str) -> Result<(f64, Option<String>)> {
    let s = s.trim();
    let idx = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(idx);
    let quantity: f64 = num
        .parse()
        .with_context(|| format!("Invalid amount '{s}'. Use e.g. '200g', '2 cups' or '3'"))?;
    if quantity <= 0.0 {
        bail!("Amount must be greater than 0");
    }
    let unit = unit.trim();
    Ok((quantity, (!unit.is_empty()).then(|| unit.to_string())))
}

/// Parse `name:amount` (e.g. "olive oil:2 tbsp"). A bare name means one unit.
pub(crate) fn parse_ingredient_spec(spec: &str) -> Result<IngredientInput> {
    let (name, amount) = match spec.rsplit_once(':') {
        Some((name, amount)) => (name, Some(amount)),
        None => (spec, None),
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Ingredient '{spec}' has no name. Use 'name:amount', e.g. 'tomato:200g'");
    }
    let (quantity, unit) = match amount {
        Some(a) => parse_amount(a)?,
        None => (1.0, None),
    };
    Ok(IngredientInput {
        name: name.to_string(),
        quantity,
        unit: unit.unwrap_or_default(),
    })
}

/// Look a recipe up by id, exact title, or case-insensitive title.
pub(crate) fn resolve_recipe(db: &Database, user_id: &str, reference: &str) -> Result<Recipe> {
    if let Ok(recipe) = db.get_recipe(user_id, reference) {
        return Ok(recipe);
    }
    if let Some(recipe) = db.find_recipe_by_title(user_id, reference)? {
        return Ok(recipe);
    }
    db.list_recipes(user_id, Some(reference))?
        .into_iter()
        .find(|r| r.title.eq_ignore_ascii_case(reference.trim()))
        .with_context(|| format!("Recipe '{reference}' not found"))
}

pub(crate) fn print_groups_table(groups: &[ShoppingGroup]) {
    #[derive(Tabled)]
    struct GroupRow {
        #[tabled(rename = "")]
        status: &'static str,
        #[tabled(rename = "Item")]
        name: String,
        #[tabled(rename = "Amount")]
        amount: String,
        #[tabled(rename = "IDs")]
        ids: String,
    }

    let rows: Vec<GroupRow> = groups
        .iter()
        .map(|g| GroupRow {
            status: if g.is_purchased { "✓" } else { "☐" },
            name: truncate(&g.ingredient_name, 30),
            amount: format!("{} {}", format_quantity(g.quantity), g.unit),
            ids: g
                .item_ids
                .iter()
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Report a missing record and exit with status 2.
pub(crate) fn exit_not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    std::process::exit(2);
}

/// First block of a uuid, enough to tell rows apart in a table.
pub(crate) fn short_id(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
