//! Logging setup for the order pipeline
//!
//! Structured logging through the tracing crate: JSON lines for machines and
//! pretty output for people. The span macros carry the order id as the
//! `correlation_id` field so every line logged while an order is processed
//! can be tied back to it.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::error::Result;

/// Initialize the logging system
///
/// `log_format` is `json` or `text`. `RUST_LOG`, when set, replaces the
/// level filter built from `log_level`.
pub fn init_tracing(log_level: &str, log_format: &str, service: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("order_pipeline={},warn", log_level)));

    if log_format == "json" {
        let formatting_layer = fmt::layer()
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_span_events(FmtSpan::NONE)
            .with_current_span(true);

        Registry::default()
            .with(env_filter)
            .with(formatting_layer)
            .try_init()
            .map_err(|e| {
                crate::error::Error::internal(format!("Failed to initialize tracing: {}", e))
            })?;
    } else {
        let formatting_layer = fmt::layer()
            .pretty()
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_target(true);

        Registry::default()
            .with(env_filter)
            .with(formatting_layer)
            .try_init()
            .map_err(|e| {
                crate::error::Error::internal(format!("Failed to initialize tracing: {}", e))
            })?;
    }

    tracing::info!(
        service = service,
        log_level = log_level,
        log_format = log_format,
        "Logging initialized"
    );

    Ok(())
}

/// Create a span for processing one consumed order message
///
/// `correlation_id` and `customer_id` are recorded once the payload has been
/// decoded.
#[macro_export]
macro_rules! order_span {
    ($partition:expr, $offset:expr) => {
        tracing::info_span!(
            "order_message",
            partition = $partition,
            offset = $offset,
            correlation_id = tracing::field::Empty,
            customer_id = tracing::field::Empty,
            processing_time_ms = tracing::field::Empty,
        )
    };
}

/// Create a span for database operations
#[macro_export]
macro_rules! db_span {
    ($operation:expr) => {
        tracing::info_span!(
            "database",
            operation = $operation,
            rows_affected = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        )
    };
}

/// Log an error with context
#[macro_export]
macro_rules! log_error {
    ($error:expr, $msg:expr) => {
        tracing::error!(
            error = %$error,
            error_type = $error.error_type(),
            $msg
        )
    };
    ($error:expr, $msg:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::error!(
            error = %$error,
            error_type = $error.error_type(),
            $($key = tracing::field::display(&$value),)*
            $msg
        )
    };
}

/// Helper for timing operations
pub struct Timer {
    start: std::time::Instant,
    operation: &'static str,
}

impl Timer {
    /// Start a new timer
    pub fn start(operation: &'static str) -> Self {
        Timer {
            start: std::time::Instant::now(),
            operation,
        }
    }

    /// Elapsed time in fractional milliseconds, without stopping
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Stop the timer and log the duration at debug
    pub fn stop(self) -> std::time::Duration {
        let duration = self.start.elapsed();
        tracing::debug!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer() {
        let timer = Timer::start("test_operation");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
        let duration = timer.stop();
        assert!(duration.as_millis() >= 10);
    }

    #[test]
    fn test_spans_can_be_created() {
        let span = crate::order_span!(2, 41_i64);
        span.record("correlation_id", "ORD-20250110-00001");
        let _db = crate::db_span!("insert_order");
    }
}
