//! Event log client seam
//!
//! [`LogConsumer`] and [`LogProducer`] are the only surfaces the pipeline
//! loops see. The rdkafka-backed implementations live here; in-memory ones
//! live in [`crate::test_utils`].

use anyhow::Context as _;
use async_trait::async_trait;
use futures::future::BoxFuture;
use rdkafka::client::ClientContext;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::KafkaConfig;
use crate::error::{Error, Result};

/// A message read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// Broker timestamp in milliseconds, when known
    pub timestamp: Option<i64>,
}

/// Broker error categories the loops act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogErrorKind {
    AllBrokersDown,
    Authentication,
    TopicAuthorization,
    QueueFull,
    PartitionEof,
    TimedOut,
    Other,
}

impl LogErrorKind {
    /// Errors after which the consumer cannot make progress
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LogErrorKind::AllBrokersDown
                | LogErrorKind::Authentication
                | LogErrorKind::TopicAuthorization
        )
    }
}

/// Error reported by the event log client
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct LogError {
    pub kind: LogErrorKind,
    pub message: String,
}

impl LogError {
    pub fn new(kind: LogErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl From<&KafkaError> for LogError {
    fn from(err: &KafkaError) -> Self {
        let kind = match err {
            KafkaError::PartitionEOF(_) => LogErrorKind::PartitionEof,
            _ => match err.rdkafka_error_code() {
                Some(RDKafkaErrorCode::AllBrokersDown) => LogErrorKind::AllBrokersDown,
                Some(RDKafkaErrorCode::Authentication)
                | Some(RDKafkaErrorCode::SaslAuthenticationFailed) => LogErrorKind::Authentication,
                Some(RDKafkaErrorCode::TopicAuthorizationFailed) => {
                    LogErrorKind::TopicAuthorization
                },
                Some(RDKafkaErrorCode::QueueFull) => LogErrorKind::QueueFull,
                Some(RDKafkaErrorCode::MessageTimedOut)
                | Some(RDKafkaErrorCode::OperationTimedOut) => LogErrorKind::TimedOut,
                _ => LogErrorKind::Other,
            },
        };

        LogError::new(kind, err.to_string())
    }
}

impl From<KafkaError> for LogError {
    fn from(err: KafkaError) -> Self {
        LogError::from(&err)
    }
}

impl From<LogError> for Error {
    fn from(err: LogError) -> Self {
        Error::kafka(err.message)
    }
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Message(LogRecord),
    /// Nothing arrived within the timeout
    Timeout,
    /// Informational: the consumer reached the end of a partition
    EndOfPartition { partition: i32 },
    Error(LogError),
}

/// Pull side of the event log
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Wait up to `timeout` for the next message or event
    async fn poll(&self, timeout: Duration) -> PollResult;

    /// Synchronously commit `next_offset` (the offset of the next message to
    /// read) for `partition`
    fn commit(&self, topic: &str, partition: i32, next_offset: i64)
        -> std::result::Result<(), LogError>;

    /// Final commit of consumer state and leave the group
    fn close(&self) -> std::result::Result<(), LogError>;
}

/// Broker acknowledgement for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
}

/// Delivery confirmation correlated with the order it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub order_id: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
}

/// Future resolving once the broker acknowledged or rejected a message
pub type PendingDelivery = BoxFuture<'static, std::result::Result<Delivered, LogError>>;

/// Synchronous failure to hand a message to the client
#[derive(Error, Debug)]
pub enum PublishError {
    /// The client's local queue is saturated
    #[error("Producer queue is full")]
    BufferFull,

    #[error("Failed to serialize order: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Kafka error: {0}")]
    Kafka(LogError),
}

/// Push side of the event log
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Buffer a message; returns before the broker acknowledges it
    fn send(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
    ) -> std::result::Result<PendingDelivery, PublishError>;

    /// Wait until every buffered message is acknowledged or `timeout` elapses
    async fn flush(&self, timeout: Duration) -> std::result::Result<(), LogError>;

    /// Messages buffered but not yet acknowledged
    fn in_flight(&self) -> usize;
}

/// Client context that keeps the first fatal error for the consumer loop
#[derive(Default)]
pub struct PipelineContext {
    fatal: Mutex<Option<LogError>>,
}

impl PipelineContext {
    fn take_fatal(&self) -> Option<LogError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ClientContext for PipelineContext {
    fn error(&self, error: KafkaError, reason: &str) {
        let log_error = LogError::from(&error);
        if log_error.is_fatal() {
            error!(error = %error, reason, "Fatal Kafka client error");
            self.fatal
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert(log_error);
        } else {
            warn!(error = %error, reason, "Kafka client error");
        }
    }
}

impl ConsumerContext for PipelineContext {}

/// rdkafka-backed [`LogConsumer`] with manual offset management
pub struct KafkaLogConsumer {
    consumer: StreamConsumer<PipelineContext>,
    topic: String,
}

impl KafkaLogConsumer {
    /// Create a consumer and subscribe it to the orders topic
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer<PipelineContext> = config
            .build_consumer_config()
            .set_log_level(RDKafkaLogLevel::Warning)
            .create_with_context(PipelineContext::default())
            .map_err(|e| Error::kafka(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[&config.orders_topic])
            .map_err(|e| Error::kafka(format!("Failed to subscribe to topic: {}", e)))?;

        info!(
            topic = %config.orders_topic,
            group_id = %config.consumer_group,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.orders_topic.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl LogConsumer for KafkaLogConsumer {
    async fn poll(&self, timeout: Duration) -> PollResult {
        if let Some(fatal) = self.consumer.context().take_fatal() {
            return PollResult::Error(fatal);
        }

        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => PollResult::Timeout,
            Ok(Ok(message)) => PollResult::Message(LogRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(|k| k.to_vec()),
                payload: message.payload().map(|p| p.to_vec()),
                timestamp: message.timestamp().to_millis(),
            }),
            Ok(Err(KafkaError::PartitionEOF(partition))) => {
                PollResult::EndOfPartition { partition }
            },
            Ok(Err(e)) => PollResult::Error(LogError::from(e)),
        }
    }

    fn commit(
        &self,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> std::result::Result<(), LogError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(topic, partition, Offset::Offset(next_offset))
            .map_err(LogError::from)?;

        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(LogError::from)
    }

    fn close(&self) -> std::result::Result<(), LogError> {
        // Offsets are committed per message, so there is usually nothing left
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            debug!(error = %e, "No consumer state to commit on close");
        }
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Kafka consumer closed");
        Ok(())
    }
}

/// Partition layout of a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub topic: String,
    pub partitions: Vec<PartitionInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    pub id: i32,
    pub leader: i32,
}

/// rdkafka-backed [`LogProducer`]
#[derive(Clone)]
pub struct KafkaLogProducer {
    producer: FutureProducer,
}

impl KafkaLogProducer {
    /// Create a new producer
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .set_log_level(RDKafkaLogLevel::Warning)
            .create()
            .map_err(|e| Error::kafka(format!("Failed to create Kafka producer: {}", e)))?;

        Ok(Self { producer })
    }

    /// Fetch partition metadata for `topic`
    ///
    /// Doubles as the startup reachability check for the brokers.
    pub async fn topic_metadata(&self, topic: &str, timeout: Duration) -> Result<TopicMetadata> {
        let producer = self.producer.clone();
        let topic = topic.to_string();

        tokio::task::spawn_blocking(move || {
            let metadata = producer
                .client()
                .fetch_metadata(Some(topic.as_str()), timeout)
                .map_err(|e| Error::kafka(format!("Failed to fetch metadata: {}", e)))?;

            let topic_metadata = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| Error::kafka(format!("Topic '{}' not in metadata", topic)))?;

            if let Some(err) = topic_metadata.error() {
                return Err(Error::kafka(format!(
                    "Topic '{}' metadata error: {:?}",
                    topic, err
                )));
            }

            Ok(TopicMetadata {
                topic: topic.clone(),
                partitions: topic_metadata
                    .partitions()
                    .iter()
                    .map(|p| PartitionInfo {
                        id: p.id(),
                        leader: p.leader(),
                    })
                    .collect(),
            })
        })
        .await
        .context("Metadata task failed")?
    }
}

#[async_trait]
impl LogProducer for KafkaLogProducer {
    fn send(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
    ) -> std::result::Result<PendingDelivery, PublishError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send_result(record) {
            Ok(delivery) => Ok(Box::pin(async move {
                match delivery.await {
                    Ok(Ok(delivered)) => Ok(Delivered {
                        partition: delivered.partition,
                        offset: delivered.offset,
                        timestamp: delivered.timestamp.to_millis(),
                    }),
                    Ok(Err((e, _message))) => Err(LogError::from(e)),
                    Err(_canceled) => Err(LogError::new(
                        LogErrorKind::Other,
                        "Producer dropped before delivery was reported",
                    )),
                }
            })),
            Err((e, _record)) => match e.rdkafka_error_code() {
                Some(RDKafkaErrorCode::QueueFull) => Err(PublishError::BufferFull),
                _ => Err(PublishError::Kafka(LogError::from(e))),
            },
        }
    }

    async fn flush(&self, timeout: Duration) -> std::result::Result<(), LogError> {
        let producer = self.producer.clone();

        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| LogError::new(LogErrorKind::Other, format!("Flush task failed: {}", e)))?
            .map_err(LogError::from)
    }

    fn in_flight(&self) -> usize {
        self.producer.in_flight_count().max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(LogErrorKind::AllBrokersDown.is_fatal());
        assert!(LogErrorKind::Authentication.is_fatal());
        assert!(LogErrorKind::TopicAuthorization.is_fatal());
        assert!(!LogErrorKind::PartitionEof.is_fatal());
        assert!(!LogErrorKind::QueueFull.is_fatal());
        assert!(!LogErrorKind::Other.is_fatal());
    }

    #[test]
    fn test_kafka_error_classification() {
        let down = KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown);
        assert_eq!(LogError::from(&down).kind, LogErrorKind::AllBrokersDown);

        let auth = KafkaError::MessageConsumption(RDKafkaErrorCode::TopicAuthorizationFailed);
        assert!(LogError::from(auth).is_fatal());

        let full = KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull);
        assert_eq!(LogError::from(full).kind, LogErrorKind::QueueFull);

        let eof = KafkaError::PartitionEOF(3);
        assert_eq!(LogError::from(eof).kind, LogErrorKind::PartitionEof);
    }

    #[test]
    fn test_context_keeps_first_fatal_error() {
        let context = PipelineContext::default();
        context.error(
            KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure),
            "transport",
        );
        assert!(context.take_fatal().is_none());

        context.error(KafkaError::Global(RDKafkaErrorCode::AllBrokersDown), "down");
        context.error(KafkaError::Global(RDKafkaErrorCode::Authentication), "auth");

        let fatal = context.take_fatal().unwrap();
        assert_eq!(fatal.kind, LogErrorKind::AllBrokersDown);
        assert!(context.take_fatal().is_none());
    }

    #[test]
    fn test_producer_creation_is_lazy() {
        let result = KafkaLogProducer::new(&KafkaConfig::default());
        assert!(result.is_ok());
    }
}
