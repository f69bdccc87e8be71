//! Order store abstraction
//!
//! This module defines the [`OrderStore`] trait and the store error type.
//! Native driver errors are classified exactly once, when they are converted
//! into a [`StoreError`]; everything above this layer only looks at
//! [`StoreErrorKind`].

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::models::{Order, StoredOrder};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// How a store failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The natural key already exists; the write already happened
    DuplicateKey,
    /// Connection lost, pool exhausted, serialization conflict and similar;
    /// the same write may succeed later
    Transient,
    /// Anything else; retrying will not help
    Other,
}

impl StoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::DuplicateKey => "duplicate_key",
            StoreErrorKind::Transient => "transient",
            StoreErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store error with its classification
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} store error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::DuplicateKey, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Other, message)
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }

    /// Check if this is a duplicate key error
    pub fn is_duplicate_key(&self) -> bool {
        self.kind == StoreErrorKind::DuplicateKey
    }
}

/// PostgreSQL SQLSTATE codes worth another attempt
fn is_transient_sqlstate(code: &str) -> bool {
    // Class 08: connection exception
    code.starts_with("08")
        || matches!(
            code,
            "40001" // serialization_failure
                | "40P01" // deadlock_detected
                | "53300" // too_many_connections
                | "57P01" // admin_shutdown
                | "57P02" // crash_shutdown
                | "57P03" // cannot_connect_now
        )
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db_err) => match db_err.code() {
                // PostgreSQL unique violation error code is 23505
                Some(code) if code == "23505" => StoreErrorKind::DuplicateKey,
                Some(code) if is_transient_sqlstate(&code) => StoreErrorKind::Transient,
                _ => StoreErrorKind::Other,
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreErrorKind::Transient,
            _ => StoreErrorKind::Other,
        };

        StoreError::new(kind, err.to_string())
    }
}

/// Convert store errors to application errors
impl From<StoreError> for crate::error::Error {
    fn from(err: StoreError) -> Self {
        crate::error::Error::database(err.to_string())
    }
}

/// Durable store of materialized orders
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order in its own transaction
    ///
    /// Returns the stored row including the server-assigned `processed_at`.
    /// An existing `order_id` fails with [`StoreErrorKind::DuplicateKey`] and
    /// leaves the stored row untouched.
    async fn insert_order(&self, order: &Order) -> StoreResult<StoredOrder>;

    /// Find an order by its natural key
    async fn find_by_id(&self, order_id: &str) -> StoreResult<Option<StoredOrder>>;

    /// Count stored orders
    async fn count(&self) -> StoreResult<i64>;

    /// Health check for the store
    async fn health_check(&self) -> StoreResult<()>;

    /// Release all pooled connections
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_kinds() {
        assert!(StoreError::transient("connection reset").is_retryable());
        assert!(!StoreError::duplicate_key("orders_pkey").is_retryable());
        assert!(!StoreError::other("check violation").is_retryable());
        assert!(StoreError::duplicate_key("orders_pkey").is_duplicate_key());
    }

    #[test]
    fn test_sqlx_errors_are_classified() {
        assert_eq!(
            StoreError::from(sqlx::Error::PoolTimedOut).kind,
            StoreErrorKind::Transient
        );
        assert_eq!(
            StoreError::from(sqlx::Error::PoolClosed).kind,
            StoreErrorKind::Transient
        );
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            StoreError::from(sqlx::Error::Io(io)).kind,
            StoreErrorKind::Transient
        );
        assert_eq!(
            StoreError::from(sqlx::Error::RowNotFound).kind,
            StoreErrorKind::Other
        );
        assert_eq!(
            StoreError::from(sqlx::Error::Protocol("bad message".into())).kind,
            StoreErrorKind::Other
        );
    }

    #[test]
    fn test_transient_sqlstates() {
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("40001"));
        assert!(is_transient_sqlstate("57P01"));
        assert!(!is_transient_sqlstate("23505"));
        assert!(!is_transient_sqlstate("23514"));
    }

    #[test]
    fn test_display_includes_kind() {
        let err = StoreError::duplicate_key("orders_pkey");
        assert_eq!(err.to_string(), "duplicate_key store error: orders_pkey");
    }
}
