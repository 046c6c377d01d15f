use std::collections::HashMap;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::db::Database;
use crate::models::{
    NewShoppingItem, ShoppingListItem, normalize_name, normalize_unit, validate_quantity,
};

/// A display row over one or more shopping-list items.
///
/// Unpurchased items sharing `(ingredient_name, unit)` collapse into one group
/// with their quantities summed. Purchased items are always singletons.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingGroup {
    pub ingredient_name: String,
    pub unit: String,
    pub quantity: f64,
    pub is_purchased: bool,
    pub item_ids: Vec<String>,
    /// Purchase timestamp of a purchased singleton, creation time otherwise.
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShoppingCounts {
    pub pending: usize,
    pub completed: usize,
}

/// Group items for display, keeping each group at the position of its first item.
#[must_use]
pub fn aggregate(items: &[ShoppingListItem]) -> Vec<ShoppingGroup> {
    let mut groups: Vec<ShoppingGroup> = Vec::with_capacity(items.len());
    let mut open: HashMap<(&str, &str), usize> = HashMap::new();

    for item in items {
        if !item.is_purchased {
            let key = (item.ingredient_name.as_str(), item.unit.as_str());
            if let Some(&idx) = open.get(&key) {
                let group = &mut groups[idx];
                group.quantity += item.quantity;
                group.item_ids.push(item.id.clone());
                continue;
            }
            open.insert(key, groups.len());
        }
        groups.push(ShoppingGroup {
            ingredient_name: item.ingredient_name.clone(),
            unit: item.unit.clone(),
            quantity: item.quantity,
            is_purchased: item.is_purchased,
            item_ids: vec![item.id.clone()],
            updated_at: item.updated_at.clone(),
        });
    }

    groups
}

#[must_use]
pub fn counts(items: &[ShoppingListItem]) -> ShoppingCounts {
    let completed = items.iter().filter(|i| i.is_purchased).count();
    ShoppingCounts {
        pending: items.len() - completed,
        completed,
    }
}

/// Add a manually entered item. The name is stored lowercased.
///
/// A supplied `ingredient_id` is only kept when it is in the user's own
/// catalog. Otherwise the item links to the catalog entry with the same
/// name, if there is one.
pub fn add_item(db: &Database, user_id: &str, item: &NewShoppingItem) -> Result<ShoppingListItem> {
    let name = normalize_name(&item.ingredient_name);
    if name.is_empty() {
        bail!("Item name must not be empty");
    }
    validate_quantity(item.quantity)?;
    let unit = normalize_unit(item.unit.as_deref().unwrap_or_default());

    let ingredient_id = match item.ingredient_id.as_deref() {
        Some(id) => match db.get_ingredient(user_id, id)? {
            Some(ingredient) => Some(ingredient.id),
            None => {
                tracing::debug!("ignoring unknown ingredient id {id} for '{name}'");
                db.find_ingredient(user_id, &name)?.map(|i| i.id)
            }
        },
        None => None,
    };
    db.insert_shopping_item(user_id, &name, item.quantity, &unit, ingredient_id.as_deref())
}
