//! Data models for the order pipeline
//!
//! This module contains the order domain model, payload validation and the
//! validation error types.

pub mod error;
pub mod order;
pub mod validation;

// Re-export commonly used types
pub use error::{ValidationError, ValidationErrorKind, ValidationResult};
pub use order::{round_money, LineItem, Order, OrderStatus, StoredOrder};
pub use validation::{is_valid_order_id, validate, REQUIRED_FIELDS};
