/// Record validator
///
/// Validates and normalises a record payload against a table definition before
/// it reaches the physical database. All problems in a payload are collected
/// and returned together so the caller gets per-field detail in one round trip.

use crate::errors::{ValidationError, ValidationErrors};
use crate::table::data_types::{GeometryKind, ScalarType, DEFAULT_PRECISION, DEFAULT_SCALE, DEFAULT_SRID, DEFAULT_VARCHAR_LENGTH};
use crate::table::types::{FieldDefinition, FieldShape, Record, TableDefinition, SYSTEM_COLUMNS};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

/// What to do with decimal input carrying more fractional digits than `scale`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionPolicy {
    #[default]
    Reject,
    /// Drop excess fractional digits; never rounds
    Truncate,
}

impl FromStr for PrecisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "truncate" => Ok(Self::Truncate),
            other => Err(format!("unknown precision policy '{other}'")),
        }
    }
}

/// Create payloads are complete, update payloads are partial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordValidator {
    policy: PrecisionPolicy,
}

impl RecordValidator {
    pub fn new(policy: PrecisionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PrecisionPolicy {
        self.policy
    }

    /// Validate `payload` against `def`, returning the normalised record
    pub fn validate(&self, def: &TableDefinition, payload: &Value, mode: ValidationMode) -> Result<Record, ValidationErrors> {
        let Some(input) = payload.as_object() else {
            return Err(ValidationErrors {
                errors: vec![ValidationError::new("$", "payload must be a JSON object")],
            });
        };

        let mut errors = Vec::new();
        let mut record = Map::new();

        for key in input.keys() {
            if SYSTEM_COLUMNS.contains(&key.as_str()) {
                errors.push(ValidationError::new(key, "system column cannot be written"));
            } else if def.field(key).is_none() {
                errors.push(ValidationError::new(key, "unknown field"));
            }
        }

        for field in def.ordered_fields() {
            let shape = match field.shape() {
                Ok(shape) => shape,
                Err(e) => {
                    errors.push(ValidationError::new(&field.name, e.to_string()));
                    continue;
                }
            };

            let supplied = input.get(&field.name).filter(|v| !is_empty(v));
            let value = match supplied {
                Some(value) => value,
                None => {
                    let present = input.contains_key(&field.name);
                    match (mode, &field.default_value) {
                        (ValidationMode::Create, Some(default)) => default,
                        (ValidationMode::Update, _) if !present => continue,
                        _ => {
                            if field.is_required {
                                errors.push(ValidationError::new(&field.name, "is required"));
                            } else if present {
                                record.insert(field.name.clone(), Value::Null);
                            }
                            continue;
                        }
                    }
                }
            };

            match self.coerce(field, &shape, value) {
                Ok(normalized) => {
                    record.insert(field.name.clone(), normalized);
                }
                Err(reason) => errors.push(ValidationError::new(&field.name, reason)),
            }
        }

        if errors.is_empty() {
            Ok(record)
        } else {
            Err(ValidationErrors { errors })
        }
    }

    fn coerce(&self, field: &FieldDefinition, shape: &FieldShape, value: &Value) -> Result<Value, String> {
        match shape {
            FieldShape::Geometry { kind, srid } => coerce_geometry(value, *kind, *srid),
            FieldShape::Scalar(scalar) | FieldShape::Relation { data_type: scalar, .. } => match scalar {
                ScalarType::Text => coerce_text(value, field.max_length),
                ScalarType::Varchar => coerce_text(value, Some(field.max_length.unwrap_or(DEFAULT_VARCHAR_LENGTH))),
                ScalarType::Integer => coerce_integer(value, i64::from(i32::MIN), i64::from(i32::MAX)),
                ScalarType::BigInt => coerce_integer(value, i64::MIN, i64::MAX),
                ScalarType::Float => coerce_float(value),
                ScalarType::Decimal => self.coerce_decimal(
                    value,
                    field.precision.unwrap_or(DEFAULT_PRECISION),
                    field.scale.unwrap_or(DEFAULT_SCALE),
                ),
                ScalarType::Boolean => match value {
                    Value::Bool(b) => Ok(Value::Bool(*b)),
                    Value::String(s) if s == "true" => Ok(Value::Bool(true)),
                    Value::String(s) if s == "false" => Ok(Value::Bool(false)),
                    _ => Err("expected a boolean (true/false)".to_string()),
                },
                ScalarType::Date => {
                    let text = value.as_str().ok_or("expected a date string (YYYY-MM-DD)")?;
                    NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .map(|date| Value::from(date.format("%Y-%m-%d").to_string()))
                        .map_err(|_| format!("invalid date '{text}', expected YYYY-MM-DD"))
                }
                ScalarType::Timestamp => {
                    let text = value.as_str().ok_or("expected an RFC 3339 timestamp string")?;
                    DateTime::parse_from_rfc3339(text)
                        .map(|ts| Value::from(ts.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                        .map_err(|_| format!("invalid timestamp '{text}', expected RFC 3339"))
                }
                ScalarType::Uuid => {
                    let text = value.as_str().ok_or("expected a UUID string")?;
                    if text.len() != 36 {
                        return Err(format!("invalid UUID '{text}'"));
                    }
                    Uuid::parse_str(text)
                        .map(|id| Value::from(id.hyphenated().to_string()))
                        .map_err(|_| format!("invalid UUID '{text}'"))
                }
                ScalarType::Json => Ok(value.clone()),
            },
        }
    }

    /// Check precision/scale on the decimal text and normalise to a string
    fn coerce_decimal(&self, value: &Value, precision: u32, scale: u32) -> Result<Value, String> {
        let text = match value {
            // serde renders very small and very large floats as `1e-7`
            Value::Number(n) => {
                let text = n.to_string();
                expand_exponent(&text).unwrap_or(text)
            }
            Value::String(s) => s.trim().to_string(),
            _ => return Err("expected a decimal number".to_string()),
        };

        let (negative, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(&text)),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let well_formed = !(int_part.is_empty() && frac_part.is_empty())
            && int_part.chars().all(|c| c.is_ascii_digit())
            && frac_part.chars().all(|c| c.is_ascii_digit())
            && !unsigned.ends_with('.');
        if !well_formed {
            return Err(format!("invalid decimal '{text}'"));
        }

        let int_digits = int_part.trim_start_matches('0');
        let max_int_digits = precision.saturating_sub(scale) as usize;
        if int_digits.len() > max_int_digits {
            return Err(format!(
                "'{text}' exceeds precision {precision} with scale {scale}"
            ));
        }

        let frac = if frac_part.len() > scale as usize {
            match self.policy {
                PrecisionPolicy::Reject => {
                    return Err(format!("'{text}' has more than {scale} decimal places"));
                }
                PrecisionPolicy::Truncate => &frac_part[..scale as usize],
            }
        } else {
            frac_part
        };

        let int_digits = if int_digits.is_empty() { "0" } else { int_digits };
        let is_zero = int_digits == "0" && frac.chars().all(|c| c == '0');
        let mut normalized = String::new();
        if negative && !is_zero {
            normalized.push('-');
        }
        normalized.push_str(int_digits);
        if !frac.is_empty() {
            normalized.push('.');
            normalized.push_str(frac);
        }
        Ok(Value::String(normalized))
    }
}

/// Largest exponent `expand_exponent` will spell out
const MAX_DECIMAL_EXPONENT: i32 = 400;

/// Rewrite exponent notation (`1.5e-7`) as plain decimal text, digit for digit
fn expand_exponent(text: &str) -> Option<String> {
    let (mantissa, exponent) = text.split_once(['e', 'E'])?;
    let exponent: i32 = exponent.parse().ok()?;
    if exponent.abs() > MAX_DECIMAL_EXPONENT {
        return None;
    }
    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{int_part}{frac_part}");
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    // position of the decimal point within `digits`
    let point = int_part.len() as i32 + exponent;
    let body = if point <= 0 {
        format!("0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
    } else if point as usize >= digits.len() {
        format!("{digits}{}", "0".repeat(point as usize - digits.len()))
    } else {
        let (int_digits, frac_digits) = digits.split_at(point as usize);
        format!("{int_digits}.{frac_digits}")
    };
    Some(if negative { format!("-{body}") } else { body })
}

/// Null and blank strings count as missing
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn coerce_text(value: &Value, max_length: Option<u32>) -> Result<Value, String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return Err("expected text".to_string()),
    };
    if let Some(max) = max_length {
        let length = text.chars().count();
        if length > max as usize {
            return Err(format!("length {length} exceeds maxLength {max}"));
        }
    }
    Ok(Value::String(text))
}

fn coerce_integer(value: &Value, min: i64, max: i64) -> Result<Value, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| format!("'{n}' is not an integer"))?,
        Value::String(s) => {
            let digits = s.strip_prefix('-').unwrap_or(s);
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("'{s}' is not an integer"));
            }
            s.parse::<i64>().map_err(|_| format!("'{s}' is out of range"))?
        }
        _ => return Err("expected an integer".to_string()),
    };
    if parsed < min || parsed > max {
        return Err(format!("{parsed} is out of range"));
    }
    Ok(Value::from(parsed))
}

fn coerce_float(value: &Value) -> Result<Value, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("'{n}' is not a number"))?,
        Value::String(s) => {
            if !is_plain_number(s) {
                return Err(format!("'{s}' is not a number"));
            }
            s.parse::<f64>().map_err(|_| format!("'{s}' is not a number"))?
        }
        _ => return Err("expected a number".to_string()),
    };
    if !parsed.is_finite() {
        return Err("number must be finite".to_string());
    }
    Ok(Value::from(parsed))
}

/// `-?(digits[.digits]|.digits)([eE][+-]?digits)?`
fn is_plain_number(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(at) => (&s[..at], Some(&s[at + 1..])),
        None => (s, None),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mantissa_ok = (!int_part.is_empty() || !frac_part.is_empty())
        && !mantissa.ends_with('.')
        && int_part.chars().all(|c| c.is_ascii_digit())
        && frac_part.chars().all(|c| c.is_ascii_digit());
    let exponent_ok = match exponent {
        None => true,
        Some(exp) => {
            let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
    };
    mantissa_ok && exponent_ok
}

fn coerce_geometry(value: &Value, kind: GeometryKind, srid: i32) -> Result<Value, String> {
    let parsed;
    let object = match value {
        Value::Object(object) => object,
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).map_err(|_| "expected a GeoJSON geometry".to_string())?;
            parsed.as_object().ok_or("expected a GeoJSON geometry object")?
        }
        _ => return Err("expected a GeoJSON geometry".to_string()),
    };

    let declared = object.get("type").and_then(Value::as_str).ok_or("GeoJSON geometry has no type")?;
    if declared != kind.geojson_type() {
        return Err(format!("expected a {} geometry, got {declared}", kind.geojson_type()));
    }
    let coordinates = object.get("coordinates").ok_or("GeoJSON geometry has no coordinates")?;

    let geographic = srid == DEFAULT_SRID;
    match kind {
        GeometryKind::Point => check_position(coordinates, geographic)?,
        GeometryKind::MultiPoint => check_positions(coordinates, 1, geographic)?,
        GeometryKind::LineString => check_positions(coordinates, 2, geographic)?,
        GeometryKind::Polygon => check_polygon(coordinates, geographic)?,
        GeometryKind::MultiPolygon => {
            let polygons = non_empty_array(coordinates, "multipolygon")?;
            for polygon in polygons {
                check_polygon(polygon, geographic)?;
            }
        }
    }

    let mut normalized = Map::new();
    normalized.insert("type".to_string(), Value::from(declared));
    normalized.insert("coordinates".to_string(), coordinates.clone());
    Ok(Value::Object(normalized))
}

fn non_empty_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>, String> {
    match value.as_array() {
        Some(items) if !items.is_empty() => Ok(items),
        _ => Err(format!("{what} coordinates must be a non-empty array")),
    }
}

fn check_position(value: &Value, geographic: bool) -> Result<(), String> {
    let numbers: Vec<f64> = value
        .as_array()
        .ok_or("position must be an array of numbers")?
        .iter()
        .map(|n| n.as_f64().filter(|f| f.is_finite()))
        .collect::<Option<_>>()
        .ok_or("position must contain only finite numbers")?;
    if numbers.len() != 2 && numbers.len() != 3 {
        return Err(format!("position must have 2 or 3 coordinates, got {}", numbers.len()));
    }
    if geographic {
        let (lon, lat) = (numbers[0], numbers[1]);
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(format!("position [{lon}, {lat}] is outside EPSG:4326 bounds"));
        }
    }
    Ok(())
}

fn check_positions(value: &Value, minimum: usize, geographic: bool) -> Result<(), String> {
    let positions = value.as_array().ok_or("coordinates must be an array of positions")?;
    if positions.len() < minimum {
        return Err(format!("at least {minimum} positions required, got {}", positions.len()));
    }
    positions.iter().try_for_each(|p| check_position(p, geographic))
}

fn check_polygon(value: &Value, geographic: bool) -> Result<(), String> {
    for ring in non_empty_array(value, "polygon")? {
        check_positions(ring, 4, geographic)?;
        let positions = ring.as_array().ok_or("ring must be an array")?;
        let same = |a: &Value, b: &Value| {
            let a = a.as_array().into_iter().flatten().filter_map(Value::as_f64);
            let b = b.as_array().into_iter().flatten().filter_map(Value::as_f64);
            a.eq(b)
        };
        if let (Some(first), Some(last)) = (positions.first(), positions.last()) {
            if !same(first, last) {
                return Err("polygon ring is not closed".to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items() -> TableDefinition {
        TableDefinition {
            name: "items".to_string(),
            fields: vec![
                FieldDefinition {
                    is_required: true,
                    max_length: Some(10),
                    ..FieldDefinition::new("item_name", "VARCHAR")
                },
                FieldDefinition {
                    precision: Some(6),
                    scale: Some(2),
                    ..FieldDefinition::new("price", "DECIMAL")
                },
                FieldDefinition::new("qty", "INTEGER"),
                FieldDefinition::new("ratio", "FLOAT"),
                FieldDefinition {
                    default_value: Some(json!("true")),
                    ..FieldDefinition::new("active", "BOOLEAN")
                },
                FieldDefinition::new("opened", "DATE"),
                FieldDefinition::new("seen_at", "TIMESTAMP"),
                FieldDefinition::new("area", "POLYGON"),
                FieldDefinition::new("spot", "POINT"),
            ],
            ..TableDefinition::default()
        }
    }

    fn validator() -> RecordValidator {
        RecordValidator::default()
    }

    fn reason(errors: &ValidationErrors, field: &str) -> String {
        errors.for_field(field).map(|e| e.reason.clone()).unwrap_or_default()
    }

    #[test]
    fn normalizes_a_valid_payload_and_applies_defaults() {
        let record = validator()
            .validate(
                &items(),
                &json!({
                    "item_name": "Widget",
                    "price": "0012.50",
                    "qty": "7",
                    "ratio": "1.5e2",
                    "opened": "2024-02-29",
                    "seen_at": "2024-03-01T10:00:00+02:00",
                    "spot": {"type": "Point", "coordinates": [13.4, 52.5]}
                }),
                ValidationMode::Create,
            )
            .unwrap();

        assert_eq!(record["price"], json!("12.50"));
        assert_eq!(record["qty"], json!(7));
        assert_eq!(record["ratio"], json!(150.0));
        assert_eq!(record["active"], json!(true));
        assert_eq!(record["seen_at"], json!("2024-03-01T08:00:00Z"));
        assert!(!record.contains_key("area"));
    }

    #[test]
    fn rejects_unknown_system_and_missing_fields() {
        let errors = validator()
            .validate(&items(), &json!({"id": 4, "colour": "red"}), ValidationMode::Create)
            .unwrap_err();
        assert_eq!(reason(&errors, "id"), "system column cannot be written");
        assert_eq!(reason(&errors, "colour"), "unknown field");
        assert_eq!(reason(&errors, "item_name"), "is required");

        let errors = validator()
            .validate(&items(), &json!({"item_name": "   "}), ValidationMode::Create)
            .unwrap_err();
        assert_eq!(reason(&errors, "item_name"), "is required");
    }

    #[test]
    fn strict_numeric_and_boolean_coercion() {
        for (field, bad) in [
            ("qty", json!("12.0")),
            ("qty", json!("1e3")),
            ("qty", json!(1.5)),
            ("qty", json!("3000000000")),
            ("ratio", json!("NaN")),
            ("ratio", json!("inf")),
            ("ratio", json!("0x10")),
            ("active", json!("yes")),
            ("active", json!(1)),
            ("opened", json!("29/02/2024")),
        ] {
            let errors = validator()
                .validate(&items(), &json!({"item_name": "a", field: bad.clone()}), ValidationMode::Create)
                .unwrap_err();
            assert!(errors.for_field(field).is_some(), "{field} should reject {bad}");
        }
    }

    #[test]
    fn decimal_precision_policy() {
        let payload = json!({"item_name": "a", "price": "1234.567"});
        let errors = validator()
            .validate(&items(), &payload, ValidationMode::Create)
            .unwrap_err();
        assert!(reason(&errors, "price").contains("decimal places"));

        let record = RecordValidator::new(PrecisionPolicy::Truncate)
            .validate(&items(), &payload, ValidationMode::Create)
            .unwrap();
        assert_eq!(record["price"], json!("1234.56"));

        // integer digits are never truncated
        let errors = RecordValidator::new(PrecisionPolicy::Truncate)
            .validate(&items(), &json!({"item_name": "a", "price": 12345.6}), ValidationMode::Create)
            .unwrap_err();
        assert!(reason(&errors, "price").contains("exceeds precision"));
    }

    #[test]
    fn decimal_accepts_exponent_notation_numbers() {
        let rates = TableDefinition {
            name: "rates".to_string(),
            fields: vec![FieldDefinition {
                precision: Some(30),
                scale: Some(8),
                ..FieldDefinition::new("rate", "DECIMAL")
            }],
            ..TableDefinition::default()
        };
        let check = |value: Value| {
            validator()
                .validate(&rates, &json!({ "rate": value }), ValidationMode::Create)
                .map(|record| record["rate"].clone())
        };

        assert_eq!(check(json!(1e-7)).unwrap(), json!("0.0000001"));
        assert_eq!(check(json!(-2.5e-6)).unwrap(), json!("-0.0000025"));
        assert_eq!(check(json!(2.5e16)).unwrap(), json!("25000000000000000"));
        let errors = check(json!(1e-9)).unwrap_err();
        assert!(reason(&errors, "rate").contains("decimal places"));

        // strings keep the strict plain format
        assert!(check(json!("1e-7")).is_err());
    }

    #[test]
    fn expands_exponents_digit_for_digit() {
        assert_eq!(expand_exponent("1.5e+3").as_deref(), Some("1500"));
        assert_eq!(expand_exponent("1.25e1").as_deref(), Some("12.5"));
        assert_eq!(expand_exponent("1e16").as_deref(), Some("10000000000000000"));
        assert_eq!(expand_exponent("-3e-2").as_deref(), Some("-0.03"));
        assert_eq!(expand_exponent("12.5"), None);
        assert_eq!(expand_exponent("1e999"), None);
    }

    #[test]
    fn geometry_structure_checks() {
        let open_ring = json!({"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1]]]});
        let errors = validator()
            .validate(&items(), &json!({"item_name": "a", "area": open_ring}), ValidationMode::Create)
            .unwrap_err();
        assert_eq!(reason(&errors, "area"), "polygon ring is not closed");

        let closed = json!({"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]});
        assert!(validator()
            .validate(&items(), &json!({"item_name": "a", "area": closed}), ValidationMode::Create)
            .is_ok());

        for bad in [
            json!({"type": "LineString", "coordinates": [[0, 0], [1, 1]]}),
            json!({"type": "Point", "coordinates": [200, 0]}),
            json!({"type": "Point", "coordinates": [1]}),
            json!({"type": "Point"}),
            json!([1, 2]),
        ] {
            let errors = validator()
                .validate(&items(), &json!({"item_name": "a", "spot": bad.clone()}), ValidationMode::Create)
                .unwrap_err();
            assert!(errors.for_field("spot").is_some(), "spot should reject {bad}");
        }
    }

    #[test]
    fn update_payloads_are_partial() {
        let record = validator()
            .validate(&items(), &json!({"qty": 3}), ValidationMode::Update)
            .unwrap();
        assert_eq!(record.len(), 1);

        let errors = validator()
            .validate(&items(), &json!({"item_name": null}), ValidationMode::Update)
            .unwrap_err();
        assert_eq!(reason(&errors, "item_name"), "is required");

        let record = validator()
            .validate(&items(), &json!({"qty": null}), ValidationMode::Update)
            .unwrap();
        assert_eq!(record["qty"], Value::Null);
    }

    #[test]
    fn text_length_counts_characters() {
        assert!(validator()
            .validate(&items(), &json!({"item_name": "éééééééééé"}), ValidationMode::Create)
            .is_ok());
        let errors = validator()
            .validate(&items(), &json!({"item_name": "abcdefghijk"}), ValidationMode::Create)
            .unwrap_err();
        assert!(reason(&errors, "item_name").contains("maxLength"));
    }
}
