//! Dot-notation flattening and empty-value pruning.

use serde_json::Map;
use serde_json::Value;

const PATH_SEPARATOR: char = '.';

/// Flattens nested objects into `parent.child` keys. Arrays and scalars are leaves.
pub fn to_dot_notation(input: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(&mut out, None, input);
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, input: &Map<String, Value>) {
    for (key, value) in input {
        let path = match prefix {
            Some(prefix) => format!("{prefix}{PATH_SEPARATOR}{key}"),
            None => key.clone(),
        };

        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_into(out, Some(&path), nested),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// Rebuilds nested objects from `parent.child` keys.
///
/// When a dotted path collides with a scalar already stored at a prefix, the
/// later object replaces the scalar.
pub fn from_dot_notation(input: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (path, value) in input {
        insert_path(&mut out, path, value.clone());
    }
    out
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split(PATH_SEPARATOR).peekable();
    let mut cursor = root;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            cursor.insert(segment.to_owned(), value);
            return;
        }

        let slot = cursor
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }

        cursor = match slot {
            Value::Object(next) => next,
            _ => return,
        };
    }
}

/// Drops `null` and `""` values recursively.
///
/// `0`, `false`, and non-empty arrays are kept. Empty arrays and objects that
/// end up empty after pruning are dropped too.
pub fn clean_data(input: &Value) -> Value {
    match input {
        Value::Object(map) => Value::Object(clean_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(clean_data).collect()),
        other => other.clone(),
    }
}

fn clean_map(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let cleaned = match value {
            Value::Null => continue,
            Value::String(text) if text.is_empty() => continue,
            Value::Array(items) if items.is_empty() => continue,
            Value::Object(nested) => {
                let nested = clean_map(nested);
                if nested.is_empty() {
                    continue;
                }
                Value::Object(nested)
            }
            other => clean_data(other),
        };
        out.insert(key.clone(), cleaned);
    }
    out
}
