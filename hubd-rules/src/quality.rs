//! Quality rule evaluators and the per-dimension metric aggregation.

use chrono::{DateTime, Utc};
use hubd_catalog::model::Rule;
use hubd_core::{HubError, HubResult, Row};
use serde_json::Value;

/// The seven scored dimensions.
pub const DIMENSIONS: &[&str] = &[
    "completeness",
    "accuracy",
    "consistency",
    "validity",
    "uniqueness",
    "timeliness",
    "standardization",
];

/// Default dimension per rule type; overridable via `logic.dimension`.
pub fn dimension_of(rule: &Rule) -> &str {
    if let Some(dim) = rule.logic.get("dimension").and_then(|v| v.as_str()) {
        if DIMENSIONS.contains(&dim) {
            return DIMENSIONS.iter().find(|d| **d == dim).unwrap();
        }
    }
    match rule.rule_type.as_str() {
        "not_null" => "completeness",
        "range" => "accuracy",
        "allowed_values" => "consistency",
        "type_check" => "validity",
        "unique_key" => "uniqueness",
        "freshness" => "timeliness",
        "length" => "standardization",
        _ => "validity",
    }
}

/// Evaluate one quality rule against one row; `Ok(None)` is a pass,
/// `Ok(Some(reason))` a fail.
pub fn evaluate(rule: &Rule, row: &Row) -> HubResult<Option<String>> {
    match rule.rule_type.as_str() {
        "not_null" => {
            let fields = string_list(rule, "fields")?;
            for field in fields {
                if matches!(row.get(&field), None | Some(Value::Null)) {
                    return Ok(Some(format!("field {field:?} is null")));
                }
            }
            Ok(None)
        }
        "range" => {
            let field = field_of(rule)?;
            let Some(value) = row.get(&field).and_then(|v| v.as_f64()) else {
                return Ok(Some(format!("field {field:?} is not numeric")));
            };
            if let Some(min) = rule.logic.get("min").and_then(|v| v.as_f64()) {
                if value < min {
                    return Ok(Some(format!("{field} = {value} below minimum {min}")));
                }
            }
            if let Some(max) = rule.logic.get("max").and_then(|v| v.as_f64()) {
                if value > max {
                    return Ok(Some(format!("{field} = {value} above maximum {max}")));
                }
            }
            Ok(None)
        }
        "allowed_values" => {
            let field = field_of(rule)?;
            let allowed = rule
                .logic
                .get("values")
                .and_then(|v| v.as_array())
                .ok_or_else(|| HubError::invalid_input("logic.values", "required"))?;
            match row.get(&field) {
                Some(value) if allowed.contains(value) => Ok(None),
                Some(value) => Ok(Some(format!("{field} = {value} not in allowed set"))),
                None => Ok(Some(format!("field {field:?} missing"))),
            }
        }
        "type_check" => {
            let field = field_of(rule)?;
            let expected = rule
                .logic
                .get("expected")
                .and_then(|v| v.as_str())
                .ok_or_else(|| HubError::invalid_input("logic.expected", "required"))?;
            let value = row.get(&field).unwrap_or(&Value::Null);
            let ok = match expected {
                "string" => value.is_string(),
                "int" => value.is_i64() || value.is_u64(),
                "float" | "number" => value.is_number(),
                "bool" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                other => {
                    return Err(HubError::invalid_input(
                        "logic.expected",
                        format!("unknown type {other:?}"),
                    ))
                }
            };
            Ok((!ok).then(|| format!("field {field:?} is not a {expected}")))
        }
        "length" => {
            let field = field_of(rule)?;
            let Some(text) = row.get(&field).and_then(|v| v.as_str()) else {
                return Ok(Some(format!("field {field:?} is not a string")));
            };
            let len = text.chars().count() as u64;
            if let Some(min) = rule.logic.get("min").and_then(|v| v.as_u64()) {
                if len < min {
                    return Ok(Some(format!("{field} length {len} below {min}")));
                }
            }
            if let Some(max) = rule.logic.get("max").and_then(|v| v.as_u64()) {
                if len > max {
                    return Ok(Some(format!("{field} length {len} above {max}")));
                }
            }
            Ok(None)
        }
        "freshness" => {
            let field = field_of(rule)?;
            let max_age = rule
                .logic
                .get("max_age_secs")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| HubError::invalid_input("logic.max_age_secs", "required"))?;
            let Some(raw) = row.get(&field).and_then(|v| v.as_str()) else {
                return Ok(Some(format!("field {field:?} is not a timestamp string")));
            };
            let parsed: DateTime<Utc> = raw
                .parse()
                .map_err(|_| HubError::InvalidInput(format!("field {field:?}: unparseable timestamp {raw:?}")))?;
            let age = Utc::now().signed_duration_since(parsed).num_seconds();
            Ok((age > max_age).then(|| format!("{field} is {age}s old (max {max_age}s)")))
        }
        other => Err(HubError::invalid_input(
            "rule_type",
            format!("unknown quality rule {other:?}"),
        )),
    }
}

fn field_of(rule: &Rule) -> HubResult<String> {
    rule.logic
        .get("field")
        .and_then(|v| v.as_str())
        .map(Into::into)
        .ok_or_else(|| HubError::invalid_input("logic.field", "required"))
}

fn string_list(rule: &Rule, key: &str) -> HubResult<Vec<String>> {
    rule.logic
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(Into::into))
                .collect::<Vec<String>>()
        })
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HubError::invalid_input(format!("logic.{key}"), "required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{quality_rule, row};

    #[test]
    fn not_null_flags_missing_fields() {
        let rule = quality_rule("not_null", serde_json::json!({"fields": ["id", "ts"]}));
        assert!(evaluate(&rule, &row(serde_json::json!({"id": 1, "ts": "x"})))
            .unwrap()
            .is_none());
        assert!(evaluate(&rule, &row(serde_json::json!({"id": 1, "ts": null})))
            .unwrap()
            .is_some());
        assert!(evaluate(&rule, &row(serde_json::json!({"id": 1})))
            .unwrap()
            .is_some());
    }

    #[test]
    fn range_checks_bounds() {
        let rule = quality_rule(
            "range",
            serde_json::json!({"field": "amt", "min": 0, "max": 100}),
        );
        assert!(evaluate(&rule, &row(serde_json::json!({"amt": 55})))
            .unwrap()
            .is_none());
        assert!(evaluate(&rule, &row(serde_json::json!({"amt": -1})))
            .unwrap()
            .is_some());
        assert!(evaluate(&rule, &row(serde_json::json!({"amt": "x"})))
            .unwrap()
            .is_some());
    }

    #[test]
    fn misconfigured_rule_is_an_error_not_a_fail() {
        let rule = quality_rule("range", serde_json::json!({}));
        assert!(evaluate(&rule, &row(serde_json::json!({"amt": 1}))).is_err());
    }

    #[test]
    fn dimension_defaults_and_override() {
        let rule = quality_rule("not_null", serde_json::json!({"fields": ["a"]}));
        assert_eq!(dimension_of(&rule), "completeness");
        let overridden = quality_rule(
            "not_null",
            serde_json::json!({"fields": ["a"], "dimension": "consistency"}),
        );
        assert_eq!(dimension_of(&overridden), "consistency");
    }
}
