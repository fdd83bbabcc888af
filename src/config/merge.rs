//! Deep merge and path helpers for layered configuration.
//!
//! Objects merge field-by-field; arrays and scalars are replaced entirely.

use serde_json::{Map, Value};

/// Deep merge two JSON values, with `overlay` taking precedence over `base`.
///
/// A null overlay keeps the base value (null means "not specified").
///
/// ```
/// use serde_json::json;
/// use task_wizard::config::deep_merge;
///
/// let base = json!({ "server": { "port": 2021, "host": "127.0.0.1" } });
/// let overlay = json!({ "server": { "port": 8080 } });
/// assert_eq!(
///     deep_merge(base, overlay),
///     json!({ "server": { "port": 8080, "host": "127.0.0.1" } })
/// );
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = if let Some(base_value) = base_map.remove(&key) {
                    deep_merge(base_value, overlay_value)
                } else {
                    overlay_value
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Merge layers in order, later layers winning.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}

/// Every path from the root to a non-object value, e.g. `["server", "port"]`.
pub fn leaf_paths(value: &Value) -> Vec<Vec<String>> {
    fn walk(value: &Value, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    prefix.push(key.clone());
                    walk(child, prefix, out);
                    prefix.pop();
                }
            }
            _ if !prefix.is_empty() => out.push(prefix.clone()),
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(value, &mut Vec::new(), &mut out);
    out
}

/// Build a sparse object holding `leaf` at `path`.
pub fn nest(path: &[String], leaf: Value) -> Value {
    path.iter().rev().fold(leaf, |acc, key| {
        let mut map = Map::new();
        map.insert(key.clone(), acc);
        Value::Object(map)
    })
}
