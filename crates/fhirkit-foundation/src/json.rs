//! JSON utility functions.
//!
//! Besides the usual parse/stringify helpers, this module provides
//! dotted-path navigation over `serde_json::Value` trees with the list
//! flattening semantics FHIR data requires: walking `code.coding.system`
//! over a resource collects the `system` of every coding, not just the
//! first.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parse a JSON string into a typed value.
pub fn parse<T>(json: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_str(json).map_err(Into::into)
}

/// Serialize a value to a JSON string.
pub fn stringify<T>(value: &T, pretty: bool) -> Result<String>
where
    T: Serialize,
{
    if pretty {
        serde_json::to_string_pretty(value).map_err(Into::into)
    } else {
        serde_json::to_string(value).map_err(Into::into)
    }
}

/// Walk a dotted path over a JSON value, flattening arrays one level at
/// each step.
///
/// Each path segment is either an object member name or a numeric index
/// into an array. A member applied to an array projects the member over
/// every element. Absent members contribute nothing.
pub fn values_at_path<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = vec![root];

    for segment in path.split('.') {
        let mut next: Vec<&Value> = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(member) = map.get(segment) {
                        push_flattened(&mut next, member);
                    }
                }
                Value::Array(items) => {
                    if let Ok(index) = segment.parse::<usize>() {
                        if let Some(item) = items.get(index) {
                            push_flattened(&mut next, item);
                        }
                    } else {
                        for item in items {
                            if let Some(member) = item.get(segment) {
                                push_flattened(&mut next, member);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }

    current
}

fn push_flattened<'a>(out: &mut Vec<&'a Value>, value: &'a Value) {
    match value {
        Value::Array(items) => out.extend(items.iter()),
        Value::Null => {}
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_values_at_path_flattens_arrays() {
        let patient = json!({
            "resourceType": "Patient",
            "name": [
                {"given": ["John", "William"], "family": "Smith"},
                {"given": ["Johnny"]}
            ]
        });

        let given = values_at_path(&patient, "name.given");
        let given: Vec<&str> = given.iter().filter_map(|v| v.as_str()).collect();
        assert_eq!(given, vec!["John", "William", "Johnny"]);
    }

    #[test]
    fn test_values_at_path_index() {
        let value = json!({"name": [{"family": "Smith"}, {"family": "Jones"}]});
        let result = values_at_path(&value, "name.1.family");
        assert_eq!(result, vec![&json!("Jones")]);
    }

    #[test]
    fn test_values_at_path_absent_member() {
        let value = json!({"a": {"b": 1}});
        assert!(values_at_path(&value, "a.c").is_empty());
    }
}
