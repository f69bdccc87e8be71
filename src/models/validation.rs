//! Order payload validation
//!
//! [`validate`] is the gate between the untyped wire payload and the typed
//! [`Order`](super::Order). It never panics: any shape it does not expect is
//! reported as a [`ValidationError`]. The field helpers below are shared with
//! `Order::from_payload` for the typed conversion.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::OnceLock;

use super::error::{ValidationError, ValidationErrorKind, ValidationResult};

/// Keys every order payload must carry
pub const REQUIRED_FIELDS: [&str; 8] = [
    "order_id",
    "customer_id",
    "customer_name",
    "customer_email",
    "items",
    "total_amount",
    "status",
    "created_at",
];

static ORDER_ID_REGEX: OnceLock<Regex> = OnceLock::new();

fn order_id_regex() -> &'static Regex {
    ORDER_ID_REGEX.get_or_init(|| {
        Regex::new(r"^ORD-\d{8}-\d{5,}$").expect("Invalid order id regex pattern")
    })
}

/// Validate the shape of a decoded order payload
///
/// Checks, in order: required keys present, `items` is a non-empty array,
/// `total_amount` is a number greater than zero.
pub fn validate(raw: &Map<String, Value>) -> ValidationResult<()> {
    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !raw.contains_key(**field))
        .map(|field| field.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(ValidationError::missing_fields(missing));
    }

    match raw.get("items") {
        Some(Value::Array(items)) if !items.is_empty() => {},
        _ => {
            return Err(ValidationError::new(
                ValidationErrorKind::EmptyItems,
                "items",
            ))
        },
    }

    let total_is_positive = match raw.get("total_amount") {
        Some(value @ Value::Number(_)) => parse_decimal(value)
            .map(|total| total > Decimal::ZERO)
            .unwrap_or(false),
        _ => false,
    };

    if !total_is_positive {
        return Err(ValidationError::new(
            ValidationErrorKind::NonPositiveTotal,
            "total_amount",
        ));
    }

    Ok(())
}

/// Check an order id against `ORD-<yyyymmdd>-<sequence>`
pub fn is_valid_order_id(order_id: &str) -> bool {
    order_id_regex().is_match(order_id)
}

/// Parse a JSON number into an exact decimal
///
/// Goes through the number's shortest textual form so that `8.99` becomes
/// exactly `8.99` rather than the nearest binary fraction.
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => {
            let text = number.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        },
        _ => None,
    }
}

/// Read a required non-empty string field
pub fn require_string(raw: &Map<String, Value>, field: &str) -> ValidationResult<String> {
    match raw.get(field) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
        Some(Value::String(_)) => Err(ValidationError::new(
            ValidationErrorKind::RequiredField,
            field,
        )),
        Some(other) => Err(ValidationError::with_context(
            ValidationErrorKind::InvalidField,
            field,
            format!("expected a string, got {}", json_type_name(other)),
        )),
        None => Err(ValidationError::missing_fields(vec![field.to_string()])),
    }
}

/// Read a required positive decimal field
pub fn require_positive_decimal(
    raw: &Map<String, Value>,
    field: &str,
) -> ValidationResult<Decimal> {
    let value = raw
        .get(field)
        .ok_or_else(|| ValidationError::missing_fields(vec![field.to_string()]))?;

    match parse_decimal(value) {
        Some(amount) if amount > Decimal::ZERO => Ok(amount),
        Some(amount) => Err(ValidationError::with_context(
            ValidationErrorKind::InvalidField,
            field,
            format!("must be positive, got {}", amount),
        )),
        None => Err(ValidationError::with_context(
            ValidationErrorKind::InvalidField,
            field,
            format!("expected a number, got {}", json_type_name(value)),
        )),
    }
}

/// Parse a timestamp field
///
/// Accepts RFC3339, and ISO-8601 without an offset which is read as UTC.
pub fn validate_timestamp_field(
    timestamp: &str,
    field_name: &str,
) -> ValidationResult<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| {
            ValidationError::with_context(
                ValidationErrorKind::InvalidTimestamp,
                field_name,
                format!("Failed to parse timestamp '{}': {}", timestamp, e),
            )
        })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
