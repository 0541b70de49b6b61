/// Condition node evaluation
///
/// Conditions compare one field of the triggering record against a literal.
/// Ordering operators need both sides to be numbers (numeric strings count);
/// when either side cannot be read as a number the condition is false and a
/// warning is logged. Evaluation never errors.

use crate::table::types::Record;
use crate::workflow::types::{ConditionConfig, ConditionOperator};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

/// Resolve `field` or `field.nested.key` against a record
///
/// An array segment may be a numeric index.
pub fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn evaluate(config: &ConditionConfig, record: &Record) -> bool {
    let actual = lookup(record, &config.field);
    let expected = &config.value;

    match config.operator {
        ConditionOperator::Equals => equals(actual, expected),
        ConditionOperator::NotEquals => !equals(actual, expected),
        ConditionOperator::GreaterThan => compare(config, actual, |o| o == Ordering::Greater),
        ConditionOperator::GreaterThanOrEqual => compare(config, actual, |o| o != Ordering::Less),
        ConditionOperator::LessThan => compare(config, actual, |o| o == Ordering::Less),
        ConditionOperator::LessThanOrEqual => compare(config, actual, |o| o != Ordering::Greater),
        ConditionOperator::Contains => contains(actual, expected).unwrap_or_else(|| {
            warn!("⚠️ Condition on '{}': contains needs a string or array", config.field);
            false
        }),
        ConditionOperator::NotContains => match actual {
            None | Some(Value::Null) => true,
            _ => contains(actual, expected).map(|found| !found).unwrap_or_else(|| {
                warn!("⚠️ Condition on '{}': not_contains needs a string or array", config.field);
                false
            }),
        },
        ConditionOperator::IsEmpty => is_empty(actual),
        ConditionOperator::IsNotEmpty => !is_empty(actual),
    }
}

/// Numeric reading of a value; numeric strings are accepted
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Text used when two values are compared as strings
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    let actual = match actual {
        None | Some(Value::Null) => return expected.is_null(),
        Some(v) => v,
    };
    if expected.is_null() {
        return false;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => as_text(actual) == as_text(expected),
    }
}

fn compare(config: &ConditionConfig, actual: Option<&Value>, accept: impl Fn(Ordering) -> bool) -> bool {
    let left = actual.and_then(as_number);
    let right = as_number(&config.value);
    match (left, right) {
        (Some(a), Some(b)) => a.partial_cmp(&b).map(accept).unwrap_or(false),
        _ => {
            let shown = actual.map_or_else(|| "missing value".to_string(), |v| v.to_string());
            warn!(
                "⚠️ Condition on '{}' is false: cannot compare {} with {} numerically",
                config.field, shown, config.value
            );
            false
        }
    }
}

/// `None` when the actual value is not a string or array
fn contains(actual: Option<&Value>, expected: &Value) -> Option<bool> {
    match actual? {
        Value::String(s) => Some(s.contains(&as_text(expected))),
        Value::Array(items) => Some(items.iter().any(|item| equals(Some(item), expected))),
        _ => None,
    }
}

fn is_empty(actual: Option<&Value>) -> bool {
    match actual {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("record must be an object"),
        }
    }

    fn check(field: &str, operator: ConditionOperator, value: Value, rec: &Record) -> bool {
        evaluate(
            &ConditionConfig {
                field: field.to_string(),
                operator,
                value,
            },
            rec,
        )
    }

    #[test]
    fn greater_than_coerces_numeric_strings_and_fails_closed() {
        use ConditionOperator::GreaterThan;
        assert!(check("price", GreaterThan, json!(1000), &record(json!({"price": 1500}))));
        assert!(!check("price", GreaterThan, json!(1000), &record(json!({"price": 900}))));
        assert!(check("price", GreaterThan, json!("1000"), &record(json!({"price": "1500.50"}))));
        assert!(!check("price", GreaterThan, json!(1000), &record(json!({"price": "abc"}))));
        assert!(!check("price", GreaterThan, json!(1000), &record(json!({}))));
        assert!(!check("price", GreaterThan, json!(1000), &record(json!({"price": {"amount": 5000}}))));
    }

    #[test]
    fn equality_across_representations() {
        let rec = record(json!({"qty": "5", "status": "open", "flag": true, "note": null}));
        assert!(check("qty", ConditionOperator::Equals, json!(5), &rec));
        assert!(check("status", ConditionOperator::Equals, json!("open"), &rec));
        assert!(check("flag", ConditionOperator::Equals, json!("true"), &rec));
        assert!(check("note", ConditionOperator::Equals, Value::Null, &rec));
        assert!(check("status", ConditionOperator::NotEquals, json!("closed"), &rec));
        assert!(check("missing", ConditionOperator::NotEquals, json!("x"), &rec));
    }

    #[test]
    fn contains_and_emptiness() {
        let rec = record(json!({"name": "Gold Watch", "tags": ["a", 2], "blank": " ", "meta": {"k": {"deep": 1}}}));
        assert!(check("name", ConditionOperator::Contains, json!("Gold"), &rec));
        assert!(check("tags", ConditionOperator::Contains, json!(2), &rec));
        assert!(check("name", ConditionOperator::NotContains, json!("Silver"), &rec));
        assert!(!check("meta", ConditionOperator::Contains, json!("k"), &rec));
        assert!(check("blank", ConditionOperator::IsEmpty, Value::Null, &rec));
        assert!(check("missing", ConditionOperator::IsEmpty, Value::Null, &rec));
        assert!(check("tags", ConditionOperator::IsNotEmpty, Value::Null, &rec));
        assert!(check("meta.k.deep", ConditionOperator::GreaterThanOrEqual, json!(1), &rec));
        assert_eq!(lookup(&rec, "tags.1"), Some(&json!(2)));
    }
}
