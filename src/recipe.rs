use serde::Serialize;
use serde_json::{Map, Value};

/// Model output beyond this size is not worth scanning for a recipe.
const MAX_MODEL_TEXT_BYTES: usize = 1024 * 1024;
const DEFAULT_RECIPE_NAME: &str = "Recette";
const DEFAULT_UNIT: &str = "g";
const DEFAULT_SERVINGS: i64 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingredient {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub number: i64,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipe {
    pub recipe_name: String,
    pub description: String,
    pub servings: i64,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<Step>,
    pub tips: Vec<String>,
}

/// Extracts the JSON object from a model answer.
///
/// Markdown fences are stripped first. When strict decoding still fails, the
/// span between the first `{` and the last `}` is tried instead.
pub fn parse_recipe_json(text: &str) -> Option<Map<String, Value>> {
    if text.len() > MAX_MODEL_TEXT_BYTES {
        return None;
    }

    let cleaned = strip_code_fence(text.trim());
    if let Some(object) = decode_object(cleaned) {
        return Some(object);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }

    decode_object(&cleaned[start..=end])
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    let rest = rest.strip_suffix("```").unwrap_or(rest);

    rest.trim_end()
}

fn decode_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(text) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Builds a [`Recipe`] from loosely shaped model output, defaulting every
/// missing field.
pub fn map_recipe(data: &Map<String, Value>) -> Recipe {
    let ingredients = array_field(data, "ingredients")
        .iter()
        .map(|item| Ingredient {
            name: string_field(item, "name").unwrap_or_default(),
            quantity: item.get("quantity").and_then(as_quantity).unwrap_or(0.0),
            unit: string_field(item, "unit").unwrap_or_else(|| DEFAULT_UNIT.to_string()),
            checked: false,
        })
        .collect();

    let steps = array_field(data, "steps")
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let position = index as i64 + 1;
            Step {
                number: item.get("number").and_then(as_integer).unwrap_or(position),
                title: string_field(item, "title").unwrap_or_else(|| format!("Étape {position}")),
                description: string_field(item, "description").unwrap_or_default(),
            }
        })
        .collect();

    let tips = array_field(data, "tips")
        .iter()
        .filter_map(|tip| tip.as_str().map(ToString::to_string))
        .collect();

    Recipe {
        recipe_name: data
            .get("recipe_name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_RECIPE_NAME)
            .to_string(),
        description: data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        servings: data
            .get("servings")
            .and_then(as_integer)
            .unwrap_or(DEFAULT_SERVINGS),
        ingredients,
        steps,
        tips,
    }
}

fn array_field<'a>(data: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    data.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn string_field(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(ToString::to_string)
}

fn as_quantity(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.round() as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
