//! Key lookup inside engine output documents of unknown shape.
//!
//! The engine's state file nests outputs under resources, instances and
//! attribute maps whose layout varies between providers and engine versions,
//! so lookups search by key name at any depth instead of following a path.

use serde_json::Value;

/// Finds the value stored under `key` anywhere in `document`.
///
/// The search is depth first: an object's own keys are checked before any of
/// its values are descended into, and arrays are searched element by element.
/// When the key occurs more than once any occurrence may be returned.
#[must_use]
pub fn locate<'doc>(document: &'doc Value, key: &str) -> Option<&'doc Value> {
    match document {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|child| locate(child, key))),
        Value::Array(items) => items.iter().find_map(|child| locate(child, key)),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => None,
    }
}

/// Finds `key` and renders its value as text.
///
/// Strings are returned verbatim and other scalars are rendered. A root
/// module output wrapper (`{"value": ..., "type": ...}`) is unwrapped to its
/// `value`. `null`, empty strings, arrays and other objects are treated as
/// absent since none of them can serve as an address or key material.
#[must_use]
pub fn locate_str(document: &Value, key: &str) -> Option<String> {
    match locate(document, key)? {
        Value::Object(wrapper) => wrapper.get("value").and_then(scalar_text),
        other => scalar_text(other),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::String(_) | Value::Null | Value::Object(_) | Value::Array(_) => None,
    }
}
