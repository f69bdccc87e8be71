//! Validation error types for order payloads
//!
//! This module defines error types specifically for payload validation,
//! separate from the general application errors. A validation failure is
//! always permanent: the same bytes can never pass on redelivery.

use std::fmt;
use thiserror::Error;

/// Main validation error type
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The kind of validation error
    pub kind: ValidationErrorKind,
    /// The field that failed validation
    pub field: String,
    /// Optional additional context
    pub context: Option<String>,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(kind: ValidationErrorKind, field: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            context: None,
        }
    }

    /// Create a validation error with additional context
    pub fn with_context(
        kind: ValidationErrorKind,
        field: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            field: field.into(),
            context: Some(context.into()),
        }
    }

    /// Error for one or more absent required keys
    pub fn missing_fields(fields: Vec<String>) -> Self {
        let field = fields.join(",");
        Self::new(ValidationErrorKind::MissingFields(fields), field)
    }

    /// Names of the missing required keys, empty for other kinds
    pub fn missing(&self) -> &[String] {
        match &self.kind {
            ValidationErrorKind::MissingFields(fields) => fields,
            _ => &[],
        }
    }

    /// Stable reason code, used as a structured log field
    pub fn reason(&self) -> &'static str {
        self.kind.reason()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(
                f,
                "Validation failed for field '{}': {} - {}",
                self.field, self.kind, ctx
            ),
            None => write!(
                f,
                "Validation failed for field '{}': {}",
                self.field, self.kind
            ),
        }
    }
}

/// Specific validation error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// One or more required keys are absent
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// `items` is not a non-empty array
    #[error("Items must be a non-empty list")]
    EmptyItems,

    /// `total_amount` is not a positive number
    #[error("Total amount must be a positive number")]
    NonPositiveTotal,

    /// Field is present but empty
    #[error("Required field is empty")]
    RequiredField,

    /// Field has the wrong type or shape
    #[error("Invalid field value")]
    InvalidField,

    /// Invalid timestamp format
    #[error("Invalid timestamp format")]
    InvalidTimestamp,

    /// Unknown order status
    #[error("Invalid order status (expected: pending, processing, completed, failed)")]
    InvalidStatus,

    /// Order id does not follow `ORD-<yyyymmdd>-<sequence>`
    #[error("Invalid order id format")]
    InvalidOrderId,

    /// A subtotal or the total does not match its components
    #[error("Monetary amounts are inconsistent")]
    InconsistentAmount,
}

impl ValidationErrorKind {
    /// Stable reason code for logs and counters
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationErrorKind::MissingFields(_) => "missing_fields",
            ValidationErrorKind::EmptyItems => "empty_items",
            ValidationErrorKind::NonPositiveTotal => "non_positive_total",
            ValidationErrorKind::RequiredField => "required_field",
            ValidationErrorKind::InvalidField => "invalid_field",
            ValidationErrorKind::InvalidTimestamp => "invalid_timestamp",
            ValidationErrorKind::InvalidStatus => "invalid_status",
            ValidationErrorKind::InvalidOrderId => "invalid_order_id",
            ValidationErrorKind::InconsistentAmount => "inconsistent_amount",
        }
    }
}

/// Result type alias for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Convert validation errors to application errors
impl From<ValidationError> for crate::error::Error {
    fn from(err: ValidationError) -> Self {
        crate::error::Error::validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_creation() {
        let error = ValidationError::new(ValidationErrorKind::RequiredField, "customer_id");
        assert_eq!(error.field, "customer_id");
        assert!(error.context.is_none());
    }

    #[test]
    fn test_validation_error_with_context() {
        let error = ValidationError::with_context(
            ValidationErrorKind::InvalidTimestamp,
            "created_at",
            "expected RFC3339",
        );
        assert_eq!(error.field, "created_at");
        assert_eq!(error.context.as_deref(), Some("expected RFC3339"));
    }

    #[test]
    fn test_missing_fields_are_named() {
        let error = ValidationError::missing_fields(vec!["items".into(), "status".into()]);
        assert_eq!(error.missing(), ["items".to_string(), "status".to_string()]);
        assert_eq!(error.reason(), "missing_fields");

        let display = error.to_string();
        assert!(display.contains("items, status"));
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(ValidationErrorKind::EmptyItems.reason(), "empty_items");
        assert_eq!(
            ValidationErrorKind::NonPositiveTotal.reason(),
            "non_positive_total"
        );
        assert!(ValidationError::new(ValidationErrorKind::EmptyItems, "items")
            .missing()
            .is_empty());
    }

    #[test]
    fn test_validation_error_kinds_display() {
        let kinds = vec![
            ValidationErrorKind::MissingFields(vec!["order_id".into()]),
            ValidationErrorKind::EmptyItems,
            ValidationErrorKind::NonPositiveTotal,
            ValidationErrorKind::RequiredField,
            ValidationErrorKind::InvalidField,
            ValidationErrorKind::InvalidTimestamp,
            ValidationErrorKind::InvalidStatus,
            ValidationErrorKind::InvalidOrderId,
            ValidationErrorKind::InconsistentAmount,
        ];

        for kind in kinds {
            let error = ValidationError::new(kind.clone(), "test_field");
            assert!(!error.to_string().is_empty());
        }
    }
}
