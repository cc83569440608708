// src/config/merge.rs

//! Deep merge over plain settings trees.
//!
//! - Tables merge key by key, recursively.
//! - Any non-table value (lists included) replaces the earlier value.
//! - `null` in the overlay removes the key from the result.

use serde_json::Value;

use crate::errors::{ExpError, Result};

/// A settings tree: section → key → value, arbitrarily nested.
pub type Settings = serde_json::Map<String, Value>;

/// Merge `overlay` into `base` in place.
pub fn deep_merge(base: &mut Settings, overlay: &Settings) {
    for (key, value) in overlay {
        match value {
            Value::Null => {
                base.remove(key);
            }
            Value::Object(over) => match base.get_mut(key) {
                Some(Value::Object(existing)) => deep_merge(existing, over),
                _ => {
                    let mut fresh = Settings::new();
                    deep_merge(&mut fresh, over);
                    base.insert(key.clone(), Value::Object(fresh));
                }
            },
            other => {
                base.insert(key.clone(), other.clone());
            }
        }
    }
}

/// Non-mutating variant of [`deep_merge`].
pub fn merged(base: &Settings, overlay: &Settings) -> Settings {
    let mut out = base.clone();
    deep_merge(&mut out, overlay);
    out
}

/// Look up a dotted path such as `forecast.length`.
pub fn get_path<'a>(settings: &'a Settings, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = settings.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Set a dotted path, creating intermediate tables as needed.
pub fn set_path(settings: &mut Settings, path: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(ExpError::Config(format!("invalid settings path '{path}'")));
    }
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| ExpError::Config("empty settings path".to_string()))?;

    let mut current = settings;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Settings::new()));
        if !entry.is_object() {
            *entry = Value::Object(Settings::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => unreachable!("entry was just made a table"),
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Parse a `section.key=value` assignment into a one-entry settings tree.
///
/// The value is read as JSON when possible (`9`, `true`, `null`,
/// `["a"]`) and as a plain string otherwise.
pub fn parse_assignment(assignment: &str) -> Result<Settings> {
    let (path, raw) = assignment
        .split_once('=')
        .ok_or_else(|| ExpError::Config(format!("expected KEY=VALUE, got '{assignment}'")))?;
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    let mut out = Settings::new();
    set_path(&mut out, path.trim(), value)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Settings {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn later_layer_overrides_nested_keys_only() {
        let mut base = obj(json!({"forecast": {"length": 6, "model": "surfex"}}));
        deep_merge(&mut base, &obj(json!({"forecast": {"length": 12}})));
        assert_eq!(base, obj(json!({"forecast": {"length": 12, "model": "surfex"}})));
    }

    #[test]
    fn lists_are_replaced_not_concatenated() {
        let mut base = obj(json!({"general": {"hh_list": [0, 6, 12, 18]}}));
        deep_merge(&mut base, &obj(json!({"general": {"hh_list": [0, 12]}})));
        assert_eq!(get_path(&base, "general.hh_list"), Some(&json!([0, 12])));
    }

    #[test]
    fn null_clears_an_earlier_value() {
        let mut base = obj(json!({"general": {"a": 1, "b": 2}}));
        deep_merge(&mut base, &obj(json!({"general": {"a": null}})));
        assert_eq!(base, obj(json!({"general": {"b": 2}})));
    }

    #[test]
    fn empty_overlay_is_identity() {
        let base = obj(json!({"general": {"a": [1, 2]}, "x": "y"}));
        assert_eq!(merged(&base, &Settings::new()), base);
    }

    #[test]
    fn assignment_parses_json_scalars_and_strings() {
        let s = parse_assignment("forecast.length=9").unwrap();
        assert_eq!(get_path(&s, "forecast.length"), Some(&json!(9)));

        let s = parse_assignment("general.cname = dk").unwrap();
        assert_eq!(get_path(&s, "general.cname"), Some(&json!("dk")));

        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("a..b=1").is_err());
    }
}
