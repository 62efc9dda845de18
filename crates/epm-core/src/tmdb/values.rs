//! Generic tree-walking cleanup over catalog payloads.

use serde_json::Value;

/// Renames keys on an object, or on every object of a list.
pub(super) fn rename_keys(data: &mut Value, renames: &[(&str, &str)]) {
    match data {
        Value::Array(items) => {
            for item in items {
                rename_keys(item, renames);
            }
        }
        Value::Object(map) => {
            for (old, new) in renames {
                if let Some(value) = map.remove(*old) {
                    map.insert((*new).to_string(), value);
                }
            }
        }
        _ => {}
    }
}

/// Drops keys from an object, or from every object of a list.
pub(super) fn drop_keys(data: &mut Value, keys: &[&str]) {
    match data {
        Value::Array(items) => {
            for item in items {
                drop_keys(item, keys);
            }
        }
        Value::Object(map) => {
            for key in keys {
                map.remove(*key);
            }
        }
        _ => {}
    }
}

/// Drops empty values (null, `""`, `[]`, `{}`, `0`, `false`) from an
/// object, or from every object of a list.
pub(super) fn drop_empty(data: &mut Value) {
    match data {
        Value::Array(items) => {
            for item in items {
                drop_empty(item);
            }
        }
        Value::Object(map) => {
            map.retain(|_, value| !is_empty(value));
        }
        _ => {}
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Joins the `name` field of every entry, comma separated.
pub(super) fn join_names(people: &Value) -> String {
    people
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|person| person.get("name").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

/// Joins the names of crew members holding `job`, comma separated.
pub(super) fn join_job(crew: &Value, job: &str) -> String {
    crew.as_array()
        .map(|list| {
            list.iter()
                .filter(|person| person.get("job").and_then(Value::as_str) == Some(job))
                .filter_map(|person| person.get("name").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}
