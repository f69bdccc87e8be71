//! Database module for the order pipeline
//!
//! This module provides database connectivity, connection pooling, the
//! order store and the retrying writer in front of it.

pub mod order_repo;
pub mod pool;
pub mod repository;
pub mod writer;

// Re-export commonly used types
pub use order_repo::PgOrderRepository;
pub use pool::{create_pool, DbPool};
pub use repository::{OrderStore, StoreError, StoreErrorKind, StoreResult};
pub use writer::{RetryingWriter, WriteError};

use sqlx::migrate::Migrator;

/// Database migrator for running schema migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
