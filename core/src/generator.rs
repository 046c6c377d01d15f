use std::fmt::Write;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{DEFAULT_UNIT, IngredientInput, Macros, NewRecipe};

/// Text-generation backend. The CLI implements this with reqwest against
/// Gemini; tests use a canned response.
///
/// Called synchronously. Async callers should use the client's own async
/// method and feed its output to [`parse_generated_recipe`].
pub trait RecipeGenerator: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, GeneratorError>;
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("At least one ingredient is required")]
    EmptyIngredients,

    #[error("API key not configured")]
    MissingCredential,

    #[error("Recipe generator failed: {message}")]
    Provider { message: String },

    #[error("No JSON object found in generator response")]
    NoJsonObject,

    #[error("Generator returned invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Generated recipe is missing required fields: {0}")]
    MissingFields(String),
}

impl GeneratorError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// True for errors the caller can fix by changing the request.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::EmptyIngredients)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub preferences: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedIngredient {
    pub name: String,
    #[serde(default = "one", deserialize_with = "lenient_quantity")]
    pub quantity: f64,
    #[serde(default, deserialize_with = "lenient_text")]
    pub unit: String,
}

/// A model reply decoded as forgivingly as possible. Only `title` and the
/// `ingredients` list are required; every other field falls back to empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedRecipe {
    pub title: String,
    #[serde(default, deserialize_with = "lenient_instructions")]
    pub instructions: String,
    #[serde(default, deserialize_with = "lenient_minutes")]
    pub prep_time: Option<i64>,
    #[serde(deserialize_with = "lenient_ingredients")]
    pub ingredients: Vec<GeneratedIngredient>,
    #[serde(
        default,
        deserialize_with = "lenient_macros",
        skip_serializing_if = "Option::is_none"
    )]
    pub macros: Option<Macros>,
}

impl GeneratedRecipe {
    /// Convert into a saveable recipe. Macros default to empty.
    #[must_use]
    pub fn into_new_recipe(self) -> NewRecipe {
        NewRecipe {
            title: self.title,
            instructions: Some(self.instructions).filter(|i| !i.trim().is_empty()),
            prep_time: self.prep_time,
            image_url: None,
            macros: Some(self.macros.unwrap_or_default()),
            ingredients: self
                .ingredients
                .into_iter()
                .map(|i| IngredientInput {
                    name: i.name,
                    quantity: i.quantity,
                    unit: i.unit,
                })
                .collect(),
        }
    }
}

fn one() -> f64 {
    1.0
}

fn fraction(word: &str) -> Option<f64> {
    let (top, bottom) = word.split_once('/')?;
    let top: f64 = top.parse().ok()?;
    let bottom: f64 = bottom.parse().ok()?;
    (bottom != 0.0).then(|| top / bottom)
}

fn numeric_prefix(word: &str) -> Option<f64> {
    let end = word
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(word.len());
    word[..end].parse().ok()
}

/// Leading amount of free text: "2", "1/2", "1 1/2 cups", "450 kcal", "25-30 min".
fn number_from_text(text: &str) -> Option<f64> {
    let mut words = text.split_whitespace();
    let first = words.next()?;
    let amount = fraction(first).or_else(|| numeric_prefix(first))?;
    let part = if first.bytes().all(|b| b.is_ascii_digit()) {
        words.next().and_then(fraction)
    } else {
        None
    };
    Some(amount + part.unwrap_or(0.0))
}

fn number_from_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => number_from_text(s),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Anything without a usable positive amount ("to taste", null) counts as one.
fn lenient_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value).filter(|q| *q > 0.0).unwrap_or(1.0))
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Plain text, or a list of steps joined one per line.
fn lenient_instructions<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Array(steps) => steps
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    })
}

fn lenient_minutes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value).map(|m| m.round() as i64))
}

/// Entries without a name are dropped.
fn lenient_ingredients<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<GeneratedIngredient>, D::Error> {
    let entries = Vec::<Value>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .filter(|entry| {
            entry
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| !n.trim().is_empty())
        })
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

/// Each macro is read on its own; values that are not numbers become `None`.
fn lenient_macros<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Macros>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let Value::Object(fields) = value else {
        return Ok(None);
    };
    let field = |key: &str| fields.get(key).and_then(number_from_value);
    let macros = Macros {
        calories: field("calories"),
        protein: field("protein"),
        carbs: field("carbs"),
        fat: field("fat"),
    };
    Ok(Some(macros).filter(|m| !m.is_empty()))
}

/// Ingredient names with blanks removed.
#[must_use]
pub fn clean_ingredients(ingredients: &[String]) -> Vec<String> {
    ingredients
        .iter()
        .map(|i| i.trim())
        .filter(|i| !i.is_empty())
        .map(String::from)
        .collect()
}

#[must_use]
pub fn build_prompt(ingredients: &[String], preferences: Option<&str>) -> String {
    let preferences = preferences
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("none");

    let mut prompt = String::from(
        "You are a helpful cooking assistant. Create a recipe that uses the following ingredients:\n",
    );
    for ingredient in ingredients {
        let _ = writeln!(prompt, "- {ingredient}");
    }
    let _ = writeln!(prompt, "\nPreferences: {preferences}");
    prompt.push_str(
        "\nReply with ONLY a JSON object in exactly this format, no other text:\n\
         {\n\
           \"title\": \"Recipe name\",\n\
           \"instructions\": \"Step by step instructions\",\n\
           \"prep_time\": 30,\n\
           \"ingredients\": [\n\
             {\"name\": \"ingredient\", \"quantity\": 100, \"unit\": \"g\"}\n\
           ],\n\
           \"macros\": {\"calories\": 400, \"protein\": 20, \"carbs\": 50, \"fat\": 10}\n\
         }\n\
         prep_time is in minutes. quantity is a number.",
    );
    prompt
}

/// First balanced `{...}` in `text`, skipping braces inside JSON strings.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull the recipe object out of raw generator text and check it.
pub fn parse_generated_recipe(raw: &str) -> Result<GeneratedRecipe, GeneratorError> {
    let json = extract_json_object(raw).ok_or(GeneratorError::NoJsonObject)?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| GeneratorError::InvalidJson(e.to_string()))?;

    let has_title = value
        .get("title")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.trim().is_empty());
    if !has_title {
        return Err(GeneratorError::MissingFields("title".to_string()));
    }
    if !value.get("ingredients").is_some_and(Value::is_array) {
        return Err(GeneratorError::MissingFields(
            "ingredients must be a list".to_string(),
        ));
    }

    let mut recipe: GeneratedRecipe =
        serde_json::from_value(value).map_err(|e| GeneratorError::InvalidJson(e.to_string()))?;
    recipe.title = recipe.title.trim().to_string();
    for ingredient in &mut recipe.ingredients {
        if ingredient.unit.trim().is_empty() {
            ingredient.unit = DEFAULT_UNIT.to_string();
        }
    }
    Ok(recipe)
}

/// Validate, prompt, call once, parse. No retries.
pub fn generate_recipe(
    generator: &dyn RecipeGenerator,
    request: &GenerateRequest,
) -> Result<GeneratedRecipe, GeneratorError> {
    let ingredients = clean_ingredients(&request.ingredients);
    if ingredients.is_empty() {
        return Err(GeneratorError::EmptyIngredients);
    }
    let prompt = build_prompt(&ingredients, request.preferences.as_deref());
    let raw = generator.complete(&prompt)?;
    parse_generated_recipe(&raw).inspect_err(|e| {
        tracing::debug!("unusable generator response ({e}): {raw}");
    })
}
