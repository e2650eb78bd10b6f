//! Small helpers shared by the model and the SQL layer

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde_json::Value;

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

static COLUMNIFY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w.*\-@#]+").unwrap());

/// Random lowercase alphanumeric string of `length` characters
pub fn random_string(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())] as char)
        .collect()
}

/// Strip everything that cannot appear in a column/table identifier
pub fn columnify(value: &str) -> String {
    COLUMNIFY_RE.replace_all(value, "").into_owned()
}

/// Normalize an arbitrary value into a list of unique, non-empty strings.
///
/// JSON-encoded arrays given as strings are decoded first, so both
/// `["a","b"]` and `"[\"a\",\"b\"]"` produce the same list.
pub fn to_unique_string_slice(value: &Value) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    match value {
        Value::Null => {}
        Value::String(s) => {
            let trimmed = s.trim();
            let decoded = if trimmed.starts_with('[') {
                serde_json::from_str::<Vec<Value>>(trimmed).ok()
            } else {
                None
            };
            match decoded {
                Some(items) => {
                    for item in items.iter().filter_map(scalar_to_string) {
                        push_unique(&mut result, item);
                    }
                }
                None => push_unique(&mut result, s.clone()),
            }
        }
        Value::Array(items) => {
            for item in items.iter().filter_map(scalar_to_string) {
                push_unique(&mut result, item);
            }
        }
        other => {
            if let Some(s) = scalar_to_string(other) {
                push_unique(&mut result, s);
            }
        }
    }

    result
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

/// Render a scalar JSON value as a plain string (no quotes)
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Loose truthiness used when normalising boolean columns
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "t" | "yes"
        ),
        _ => false,
    }
}

/// Items of `base` that are not present in `subtract`
pub fn subtract_slice(base: &[String], subtract: &[String]) -> Vec<String> {
    base.iter()
        .filter(|item| !subtract.contains(item))
        .cloned()
        .collect()
}
