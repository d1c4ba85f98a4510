//! Cleansing transforms: standardization, type coercion, defaults.
//!
//! Dedup is also a cleansing rule but runs through the engine's
//! per-(task, interface) windows, not here.

use hubd_catalog::model::Rule;
use hubd_core::{HubError, HubResult, Row};
use serde_json::Value;

fn target_field<'a>(rule: &'a Rule) -> HubResult<&'a str> {
    rule.logic
        .get("field")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HubError::invalid_input("logic.field", "required"))
}

/// Apply one cleansing rule to one row in place.
pub fn apply(rule: &Rule, row: &mut Row) -> HubResult<()> {
    match rule.rule_type.as_str() {
        "trim" => {
            for_each_string_field(rule, row, |s| s.trim().to_string())?;
        }
        "normalize_case" => {
            let upper = rule
                .logic
                .get("mode")
                .and_then(|v| v.as_str())
                .map(|m| m.eq_ignore_ascii_case("upper"))
                .unwrap_or(false);
            for_each_string_field(rule, row, |s| {
                if upper {
                    s.to_uppercase()
                } else {
                    s.to_lowercase()
                }
            })?;
        }
        "normalize_whitespace" => {
            for_each_string_field(rule, row, |s| {
                s.split_whitespace().collect::<Vec<_>>().join(" ")
            })?;
        }
        "coerce" => {
            let field = target_field(rule)?;
            let to = rule
                .logic
                .get("to")
                .and_then(|v| v.as_str())
                .ok_or_else(|| HubError::invalid_input("logic.to", "required"))?;
            if let Some(value) = row.get(field).cloned() {
                let coerced = coerce(&value, to).ok_or_else(|| {
                    HubError::InvalidInput(format!(
                        "field {field:?}: cannot coerce {value} to {to}"
                    ))
                })?;
                row.insert(field.to_string(), coerced);
            }
        }
        "fill_default" => {
            let field = target_field(rule)?;
            let default = rule
                .logic
                .get("value")
                .cloned()
                .ok_or_else(|| HubError::invalid_input("logic.value", "required"))?;
            let missing = matches!(row.get(field), None | Some(Value::Null));
            if missing {
                row.insert(field.to_string(), default);
            }
        }
        other => {
            return Err(HubError::invalid_input(
                "rule_type",
                format!("unknown cleansing rule {other:?}"),
            ))
        }
    }
    Ok(())
}

/// Fields named in `logic.fields`, or every string field when absent.
fn for_each_string_field(
    rule: &Rule,
    row: &mut Row,
    transform: impl Fn(&str) -> String,
) -> HubResult<()> {
    let named: Option<Vec<String>> = rule.logic.get("fields").and_then(|v| {
        v.as_array().map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(Into::into))
                .collect()
        })
    });
    match named {
        Some(fields) => {
            for field in fields {
                if let Some(Value::String(s)) = row.get(&field) {
                    let next = transform(s);
                    row.insert(field, Value::String(next));
                }
            }
        }
        None => {
            let keys: Vec<String> = row.keys().cloned().collect();
            for key in keys {
                if let Some(Value::String(s)) = row.get(&key) {
                    let next = transform(s);
                    row.insert(key, Value::String(next));
                }
            }
        }
    }
    Ok(())
}

fn coerce(value: &Value, to: &str) -> Option<Value> {
    match to {
        "string" => Some(match value {
            Value::String(s) => Value::String(s.clone()),
            Value::Null => Value::Null,
            other => Value::String(other.to_string()),
        }),
        "int" => match value {
            Value::Number(n) => n.as_i64().map(Value::from).or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| Value::from(f as i64))
            }),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            Value::Bool(b) => Some(Value::from(*b as i64)),
            Value::Null => Some(Value::Null),
            _ => None,
        },
        "float" => match value {
            Value::Number(n) => n.as_f64().map(Value::from),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
            Value::Null => Some(Value::Null),
            _ => None,
        },
        "bool" => match value {
            Value::Bool(b) => Some(Value::from(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Value::from(true)),
                "false" | "0" | "no" => Some(Value::from(false)),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|i| Value::from(i != 0)),
            Value::Null => Some(Value::Null),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{cleansing_rule, row};

    #[test]
    fn trim_touches_only_strings() {
        let rule = cleansing_rule("trim", serde_json::json!({}));
        let mut r = row(serde_json::json!({"name": "  ada  ", "age": 36}));
        apply(&rule, &mut r).unwrap();
        assert_eq!(r["name"], "ada");
        assert_eq!(r["age"], 36);
    }

    #[test]
    fn coerce_string_to_int() {
        let rule = cleansing_rule("coerce", serde_json::json!({"field": "age", "to": "int"}));
        let mut r = row(serde_json::json!({"age": " 42 "}));
        apply(&rule, &mut r).unwrap();
        assert_eq!(r["age"], 42);
    }

    #[test]
    fn coerce_failure_is_an_error() {
        let rule = cleansing_rule("coerce", serde_json::json!({"field": "age", "to": "int"}));
        let mut r = row(serde_json::json!({"age": "not a number"}));
        assert!(apply(&rule, &mut r).is_err());
    }

    #[test]
    fn fill_default_only_when_missing() {
        let rule = cleansing_rule(
            "fill_default",
            serde_json::json!({"field": "region", "value": "eu"}),
        );
        let mut missing = row(serde_json::json!({"id": 1}));
        apply(&rule, &mut missing).unwrap();
        assert_eq!(missing["region"], "eu");

        let mut present = row(serde_json::json!({"region": "us"}));
        apply(&rule, &mut present).unwrap();
        assert_eq!(present["region"], "us");
    }
}
