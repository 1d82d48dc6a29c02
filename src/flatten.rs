//! JSON flattening for schema-less API payloads.
//!
//! Nested objects collapse into `parent_child` keys, arrays are kept as
//! serialized JSON text, and scalars pass through. Key order follows the
//! document order of the input.

use serde_json::Value;

use crate::models::Record;

/// Flatten one JSON value into a single-level record.
///
/// A non-object top-level value is stored under `"value"`.
pub fn flatten(value: &Value) -> Record {
    let mut out = Record::new();
    match value {
        Value::Object(_) => flatten_into("", value, &mut out),
        other => {
            out.insert("value".to_string(), scalar_or_json(other));
        }
    }
    out
}

/// Flatten a page of API objects.
pub fn flatten_all(records: Vec<Record>) -> Vec<Record> {
    records
        .into_iter()
        .map(|r| flatten(&Value::Object(r)))
        .collect()
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Record) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let joined = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}_{}", prefix, key)
                };
                flatten_into(&joined, child, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), scalar_or_json(other));
        }
    }
}

fn scalar_or_json(value: &Value) -> Value {
    match value {
        Value::Array(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}

/// Render a value as the text stored in a TEXT column.
///
/// Returns `None` for JSON null so callers can bind SQL NULL.
pub fn format_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(format_number(n)),
        other => Some(other.to_string()),
    }
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        // Whole floats print without a trailing ".0" so ids stay comparable.
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Union of keys over the first `sample` records, in first-seen order.
pub fn collect_columns(records: &[Record], sample: usize) -> Vec<String> {
    let mut seen = Record::new();
    for record in records.iter().take(sample) {
        for key in record.keys() {
            if !seen.contains_key(key) {
                seen.insert(key.clone(), Value::Null);
            }
        }
    }
    seen.into_iter().map(|(k, _)| k).collect()
}
