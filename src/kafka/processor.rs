//! Per-message processing: decode, validate, convert, write

use serde_json::{Map, Value};
use std::fmt;
use tracing::{error, info, warn, Instrument};

use super::client::LogRecord;
use crate::db::{RetryingWriter, WriteError};
use crate::logging::Timer;
use crate::models::{validate, Order, StoredOrder, ValidationError};

/// Why a message was permanently rejected before reaching the store
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Not a UTF-8 JSON object
    Decode(String),
    Invalid(ValidationError),
}

impl RejectReason {
    pub fn error_type(&self) -> &'static str {
        match self {
            RejectReason::Decode(_) => "decode_error",
            RejectReason::Invalid(e) => e.reason(),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Decode(msg) => write!(f, "Undecodable payload: {}", msg),
            RejectReason::Invalid(e) => write!(f, "{}", e),
        }
    }
}

/// What became of one message
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    /// Newly written
    Processed(StoredOrder),
    /// Already present in the store
    Duplicate { order_id: String },
    /// Malformed or invalid; never retried
    Rejected(RejectReason),
    /// The write failed for good
    Failed(WriteError),
}

/// Turns consumed records into stored orders
#[derive(Clone)]
pub struct MessageProcessor {
    writer: RetryingWriter,
}

impl MessageProcessor {
    pub fn new(writer: RetryingWriter) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &RetryingWriter {
        &self.writer
    }

    /// Process a single record
    ///
    /// Never fails: every record ends in exactly one [`ProcessingOutcome`].
    pub async fn process(&self, record: &LogRecord) -> ProcessingOutcome {
        let span = crate::order_span!(record.partition, record.offset);
        self.process_record(record).instrument(span).await
    }

    async fn process_record(&self, record: &LogRecord) -> ProcessingOutcome {
        let timer = Timer::start("process_order");
        let span = tracing::Span::current();

        let raw = match decode_payload(record.payload.as_deref()) {
            Ok(raw) => raw,
            Err(reason) => {
                error!(error = %reason, "Failed to decode message, skipping");
                return ProcessingOutcome::Rejected(reason);
            },
        };

        if let Some(order_id) = raw.get("order_id").and_then(Value::as_str) {
            span.record("correlation_id", order_id);
        }
        if let Some(customer_id) = raw.get("customer_id").and_then(Value::as_str) {
            span.record("customer_id", customer_id);
        }

        let order = match validate(&raw).and_then(|()| Order::from_payload(&raw)) {
            Ok(order) => order,
            Err(e) => {
                error!(
                    reason = e.reason(),
                    field = %e.field,
                    error = %e,
                    "Invalid order, skipping"
                );
                return ProcessingOutcome::Rejected(RejectReason::Invalid(e));
            },
        };

        let outcome = match self.writer.write(&order).await {
            Ok(stored) => {
                let processing_time_ms = timer.elapsed_ms();
                span.record("processing_time_ms", processing_time_ms);
                info!(
                    total_amount = %order.total_amount,
                    item_count = order.item_count(),
                    processing_time_ms,
                    pipeline_latency_ms = stored.pipeline_latency().num_milliseconds(),
                    "Order processed"
                );
                ProcessingOutcome::Processed(stored)
            },
            Err(WriteError::DuplicateKey { order_id }) => {
                warn!("Order already stored, skipping duplicate");
                ProcessingOutcome::Duplicate { order_id }
            },
            Err(e) => {
                crate::log_error!(e, "Failed to store order");
                ProcessingOutcome::Failed(e)
            },
        };

        timer.stop();
        outcome
    }
}

/// Decode a payload into a JSON object
fn decode_payload(payload: Option<&[u8]>) -> Result<Map<String, Value>, RejectReason> {
    let bytes = payload.ok_or_else(|| RejectReason::Decode("empty payload".to_string()))?;

    let text = std::str::from_utf8(bytes)
        .map_err(|e| RejectReason::Decode(format!("invalid UTF-8: {}", e)))?;

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RejectReason::Decode(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(RejectReason::Decode(format!("invalid JSON: {}", e))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
