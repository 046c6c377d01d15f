use std::path::Path;
use std::process;

use anyhow::{Context, Result, bail};
use chrono::Local;

use pantry_core::db::Database;
use pantry_core::models::{NewShoppingItem, ShoppingListItem, format_quantity, normalize_name};
use pantry_core::print::{printable_rows, render_pdf, render_text};
use pantry_core::shopping::{self, ShoppingGroup};

use super::helpers::{exit_not_found, parse_amount, print_groups_table};

pub(crate) fn cmd_shop_list(db: &Database, user_id: &str, json: bool) -> Result<()> {
    let items = db.list_shopping_items(user_id)?;
    let groups = shopping::aggregate(&items);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "groups": groups,
                "counts": shopping::counts(&items),
            }))?
        );
        return Ok(());
    }
    if groups.is_empty() {
        eprintln!("Shopping list is empty");
        process::exit(2);
    }

    print_groups_table(&groups);
    let counts = shopping::counts(&items);
    println!("{} to buy, {} done", counts.pending, counts.completed);
    Ok(())
}

pub(crate) fn cmd_shop_add(
    db: &Database,
    user_id: &str,
    name: &str,
    amount: &str,
    unit: Option<String>,
    json: bool,
) -> Result<()> {
    let (quantity, parsed_unit) = parse_amount(amount)?;
    let item = shopping::add_item(
        db,
        user_id,
        &NewShoppingItem {
            ingredient_name: name.to_string(),
            quantity,
            unit: unit.or(parsed_unit),
            ingredient_id: None,
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        println!(
            "Added {} {} {} (id: {})",
            format_quantity(item.quantity),
            item.unit,
            item.ingredient_name,
            item.id
        );
    }
    Ok(())
}

/// Find one item by full id or an unambiguous id prefix of at least
/// eight characters, so short names like "beef" never read as ids.
fn find_item(db: &Database, user_id: &str, target: &str) -> Result<Option<ShoppingListItem>> {
    let target = target.trim();
    let id_like = target.len() >= 8 && target.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    if !id_like {
        return Ok(None);
    }
    let matches: Vec<ShoppingListItem> = db
        .list_shopping_items(user_id)?
        .into_iter()
        .filter(|i| i.id.starts_with(target))
        .collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.into_iter().next()),
        n => bail!("'{target}' matches {n} items; use a longer id"),
    }
}

/// Toggle one item by id, or a whole group by ingredient name.
///
/// For a name, the open group is marked purchased; if every group with
/// that name is already purchased they are reopened.
pub(crate) fn cmd_shop_toggle(db: &Database, user_id: &str, target: &str, json: bool) -> Result<()> {
    if let Some(item) = find_item(db, user_id, target)? {
        let item = db.toggle_shopping_item(user_id, &item.id)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&item)?);
        } else {
            let state = if item.is_purchased { "purchased" } else { "to buy" };
            println!("{} marked {state}", item.ingredient_name);
        }
        return Ok(());
    }

    let key = normalize_name(target);
    let groups: Vec<ShoppingGroup> = shopping::aggregate(&db.list_shopping_items(user_id)?)
        .into_iter()
        .filter(|g| g.ingredient_name == key)
        .collect();
    if groups.is_empty() {
        exit_not_found(&format!("No shopping item matches '{target}'"), json);
    }

    let open: Vec<String> = groups
        .iter()
        .filter(|g| !g.is_purchased)
        .flat_map(|g| g.item_ids.iter().cloned())
        .collect();
    let (ids, purchased) = if open.is_empty() {
        let done = groups.iter().flat_map(|g| g.item_ids.iter().cloned()).collect();
        (done, false)
    } else {
        (open, true)
    };
    let changed = db.set_items_purchased(user_id, &ids, purchased)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "name": key, "purchased": purchased, "updated": changed })
        );
    } else {
        let state = if purchased { "purchased" } else { "to buy" };
        println!("{key} marked {state} ({changed} items)");
    }
    Ok(())
}

/// Delete one item by id, or every item with an ingredient name.
pub(crate) fn cmd_shop_delete(db: &Database, user_id: &str, target: &str, json: bool) -> Result<()> {
    if let Some(item) = find_item(db, user_id, target)? {
        db.delete_shopping_item(user_id, &item.id)?;
        if json {
            println!("{}", serde_json::json!({ "deleted": 1 }));
        } else {
            println!("Deleted {} from the shopping list", item.ingredient_name);
        }
        return Ok(());
    }

    let key = normalize_name(target);
    let ids: Vec<String> = db
        .list_shopping_items(user_id)?
        .into_iter()
        .filter(|i| i.ingredient_name == key)
        .map(|i| i.id)
        .collect();
    if ids.is_empty() {
        exit_not_found(&format!("No shopping item matches '{target}'"), json);
    }
    let deleted = db.delete_shopping_items(user_id, &ids)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        println!("Deleted {deleted} {key} items from the shopping list");
    }
    Ok(())
}

pub(crate) fn cmd_shop_clear(db: &Database, user_id: &str, json: bool) -> Result<()> {
    let removed = db.clear_purchased(user_id)?;
    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        println!("Removed {removed} purchased items");
    }
    Ok(())
}

/// Print the open items as a checklist, or write them to a PDF.
pub(crate) fn cmd_shop_print(db: &Database, user_id: &str, pdf: Option<&Path>) -> Result<()> {
    let groups = shopping::aggregate(&db.list_shopping_items(user_id)?);
    let rows = printable_rows(&groups);
    let today = Local::now().date_naive();

    match pdf {
        Some(path) => {
            let bytes = render_pdf(&rows, today)?;
            std::fs::write(path, bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} items to {}", rows.len(), path.display());
        }
        None => print!("{}", render_text(&rows, today)),
    }
    Ok(())
}
