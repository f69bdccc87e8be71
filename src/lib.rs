//! Order pipeline library
//!
//! A rate-limited Kafka producer of mock food orders and a consumer group
//! member that validates them and writes them idempotently to PostgreSQL.
//! The modules are exposed for the binary, for integration tests and for
//! embedding either loop in another application.

pub mod config;
pub mod db;
pub mod error;
pub mod kafka;
pub mod logging;
pub mod mock_data;
pub mod models;
pub mod retry;
pub mod shutdown;
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use error::{Error, Result};

pub use db::{OrderStore, PgOrderRepository, RetryingWriter, StoreError, StoreErrorKind, WriteError};
pub use kafka::{
    KafkaConfig, MessageProcessor, OrderConsumer, OrderPublisher, ProducerLoop, ProducerStats,
};
pub use mock_data::MockDataGenerator;
pub use models::{LineItem, Order, OrderStatus, StoredOrder, ValidationError, ValidationErrorKind};
pub use retry::RetryPolicy;
pub use shutdown::{shutdown_signal, ShutdownHandle};
