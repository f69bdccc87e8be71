//! Retrying order writer
//!
//! Wraps an [`OrderStore`] with the bounded exponential retry of
//! [`RetryPolicy`]. Only [`StoreErrorKind::Transient`] failures are retried;
//! a duplicate key is reported at once as its own outcome.

use std::sync::Arc;
use thiserror::Error;

use crate::db::repository::{OrderStore, StoreError, StoreErrorKind};
use crate::models::{Order, StoredOrder};
use crate::retry::{retry_transient, RetryPolicy};

/// Terminal outcome of a failed write
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    /// The order was already stored by an earlier delivery
    #[error("Order {order_id} already exists")]
    DuplicateKey { order_id: String },

    /// Every attempt failed with a transient error
    #[error("Write failed after {attempts} attempts: {last_error}")]
    TransientExhausted { attempts: u32, last_error: StoreError },

    /// Non-retryable store failure
    #[error("Write failed: {0}")]
    Other(StoreError),
}

impl WriteError {
    /// Short machine-readable name, used as a structured log field
    pub fn error_type(&self) -> &'static str {
        match self {
            WriteError::DuplicateKey { .. } => "duplicate_key",
            WriteError::TransientExhausted { .. } => "transient_exhausted",
            WriteError::Other(_) => "store_error",
        }
    }
}

/// Writes orders with bounded retries on transient failures
#[derive(Clone)]
pub struct RetryingWriter {
    store: Arc<dyn OrderStore>,
    policy: RetryPolicy,
}

impl RetryingWriter {
    pub fn new(store: Arc<dyn OrderStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    /// Insert `order`, retrying transient failures per the policy
    pub async fn write(&self, order: &Order) -> Result<StoredOrder, WriteError> {
        let store = &self.store;

        let result = retry_transient(&self.policy, StoreError::is_retryable, |attempt| {
            tracing::debug!(order_id = %order.order_id, attempt, "Writing order");
            store.insert_order(order)
        })
        .await;

        result.map_err(|failure| match failure.error.kind {
            StoreErrorKind::DuplicateKey => WriteError::DuplicateKey {
                order_id: order.order_id.clone(),
            },
            StoreErrorKind::Transient => WriteError::TransientExhausted {
                attempts: failure.attempts,
                last_error: failure.error,
            },
            StoreErrorKind::Other => WriteError::Other(failure.error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::OrderBuilder;
    use crate::test_utils::MemoryOrderStore;
    use std::time::Duration;

    fn writer(store: &MemoryOrderStore, attempts: u32) -> RetryingWriter {
        RetryingWriter::new(
            Arc::new(store.clone()),
            RetryPolicy::new(attempts, Duration::from_millis(1000)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_success() {
        let store = MemoryOrderStore::new();
        let order = OrderBuilder::new().build();

        let stored = writer(&store, 3).write(&order).await.unwrap();
        assert_eq!(stored.order, order);
        assert_eq!(store.len(), 1);
        assert_eq!(store.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_is_not_retried() {
        let store = MemoryOrderStore::new();
        let order = OrderBuilder::new().build();
        let writer = writer(&store, 3);

        writer.write(&order).await.unwrap();
        let err = writer.write(&order).await.unwrap_err();

        assert_eq!(
            err,
            WriteError::DuplicateKey {
                order_id: order.order_id.clone()
            }
        );
        assert_eq!(store.attempts(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausted_after_three_attempts() {
        let store = MemoryOrderStore::new();
        store.fail_next(StoreError::transient("connection refused"), 5);
        let order = OrderBuilder::new().build();
        let started = tokio::time::Instant::now();

        let err = writer(&store, 3).write(&order).await.unwrap_err();

        match err {
            WriteError::TransientExhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.is_retryable());
            },
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.attempts(), 3);
        assert_eq!(store.rollbacks(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let store = MemoryOrderStore::new();
        store.fail_next(StoreError::transient("connection reset"), 1);
        let order = OrderBuilder::new().build();
        let started = tokio::time::Instant::now();

        writer(&store, 3).write(&order).await.unwrap();

        assert_eq!(store.attempts(), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_error_is_not_retried() {
        let store = MemoryOrderStore::new();
        store.fail_next(StoreError::other("check constraint violated"), 5);
        let order = OrderBuilder::new().build();

        let err = writer(&store, 3).write(&order).await.unwrap_err();

        assert!(matches!(err, WriteError::Other(_)));
        assert_eq!(err.error_type(), "store_error");
        assert_eq!(store.attempts(), 1);
    }
}
