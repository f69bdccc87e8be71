//! Order consumer with commit-after-process offset management

use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::client::{LogConsumer, LogErrorKind, LogRecord, PollResult};
use super::processor::{MessageProcessor, ProcessingOutcome};
use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use crate::shutdown::ShutdownHandle;

/// Consumer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Polling,
    Processing,
    Committing,
    Draining,
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Idle => "idle",
            ConsumerState::Polling => "polling",
            ConsumerState::Processing => "processing",
            ConsumerState::Committing => "committing",
            ConsumerState::Draining => "draining",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Consumer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Orders newly written
    pub processed: u64,
    /// Duplicates already in the store
    pub skipped: u64,
    /// Rejected payloads and failed writes
    pub failed: u64,
    pub commit_failures: u64,
    /// Non-fatal broker errors
    pub broker_errors: u64,
}

impl ConsumerStats {
    /// Messages handled, whatever their outcome
    pub fn total(&self) -> u64 {
        self.processed + self.skipped + self.failed
    }

    fn record(&mut self, outcome: &ProcessingOutcome) {
        match outcome {
            ProcessingOutcome::Processed(_) => self.processed += 1,
            ProcessingOutcome::Duplicate { .. } => self.skipped += 1,
            ProcessingOutcome::Rejected(_) | ProcessingOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// What one call to [`OrderConsumer::poll_once`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// Nothing arrived within the poll timeout
    Idle,
    /// A message was processed and its offset committed
    Message,
    /// A non-fatal broker event was observed
    Event,
}

/// Polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub poll_timeout: Duration,
    /// Log a running summary every this many messages
    pub summary_interval: u64,
}

impl From<&ConsumerConfig> for ConsumerSettings {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout(),
            summary_interval: config.summary_interval.max(1),
        }
    }
}

/// Reads orders one at a time and commits each offset after its outcome is
/// final
pub struct OrderConsumer<C> {
    consumer: C,
    topic: String,
    processor: MessageProcessor,
    settings: ConsumerSettings,
    shutdown: ShutdownHandle,
    state: ConsumerState,
    stats: ConsumerStats,
}

impl<C: LogConsumer> OrderConsumer<C> {
    pub fn new(
        consumer: C,
        topic: impl Into<String>,
        processor: MessageProcessor,
        settings: ConsumerSettings,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            consumer,
            topic: topic.into(),
            processor,
            settings,
            shutdown,
            state: ConsumerState::Idle,
            stats: ConsumerStats::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Consume until shutdown or a fatal broker error, then close
    ///
    /// The iteration in progress when shutdown is requested always
    /// completes, including its commit.
    pub async fn run(&mut self) -> Result<ConsumerStats> {
        info!(
            topic = %self.topic,
            poll_timeout_ms = self.settings.poll_timeout.as_millis() as u64,
            "Order consumer started"
        );

        let result = loop {
            if self.shutdown.is_triggered() {
                info!("Shutdown requested, stopping consumer");
                break Ok(());
            }

            if let Err(e) = self.poll_once().await {
                break Err(e);
            }
        };

        self.close().await;
        result.map(|()| self.stats)
    }

    /// Run one poll and handle whatever it returned
    pub async fn poll_once(&mut self) -> Result<Iteration> {
        self.state = ConsumerState::Polling;

        match self.consumer.poll(self.settings.poll_timeout).await {
            PollResult::Timeout => Ok(Iteration::Idle),
            PollResult::EndOfPartition { partition } => {
                debug!(partition, "Reached end of partition");
                Ok(Iteration::Event)
            },
            PollResult::Error(e) if e.kind == LogErrorKind::PartitionEof => {
                debug!(error = %e, "Reached end of partition");
                Ok(Iteration::Event)
            },
            PollResult::Error(e) if e.is_fatal() => {
                error!(error = %e, kind = ?e.kind, "Fatal broker error, stopping consumer");
                Err(Error::kafka(format!("Fatal broker error: {}", e)))
            },
            PollResult::Error(e) => {
                self.stats.broker_errors += 1;
                error!(error = %e, kind = ?e.kind, "Broker error");
                Ok(Iteration::Event)
            },
            PollResult::Message(record) => {
                self.handle(&record).await;
                Ok(Iteration::Message)
            },
        }
    }

    async fn handle(&mut self, record: &LogRecord) {
        self.state = ConsumerState::Processing;
        let outcome = self.processor.process(record).await;
        self.stats.record(&outcome);

        self.state = ConsumerState::Committing;
        self.commit(record);

        if self.stats.total() % self.settings.summary_interval == 0 {
            self.log_summary("Consumer progress");
        }

        self.state = ConsumerState::Polling;
    }

    /// Commit the offset after `record`; failures are logged, never fatal
    fn commit(&mut self, record: &LogRecord) {
        let next_offset = record.offset + 1;

        match self.consumer.commit(&record.topic, record.partition, next_offset) {
            Ok(()) => debug!(
                partition = record.partition,
                offset = next_offset,
                "Offset committed"
            ),
            Err(e) => {
                self.stats.commit_failures += 1;
                warn!(
                    partition = record.partition,
                    offset = next_offset,
                    error = %e,
                    "Offset commit failed, message may be redelivered"
                );
            },
        }
    }

    /// Leave the group, close the store and log final counts; idempotent
    pub async fn close(&mut self) {
        if self.state == ConsumerState::Stopped {
            return;
        }

        self.state = ConsumerState::Draining;
        info!("Closing consumer");

        if let Err(e) = self.consumer.close() {
            warn!(error = %e, "Final offset commit failed while closing consumer");
        }
        self.processor.writer().store().close().await;

        self.state = ConsumerState::Stopped;
        self.log_summary("Consumer stopped");
    }

    fn log_summary(&self, message: &'static str) {
        info!(
            processed = self.stats.processed,
            skipped = self.stats.skipped,
            failed = self.stats.failed,
            total = self.stats.total(),
            commit_failures = self.stats.commit_failures,
            broker_errors = self.stats.broker_errors,
            state = %self.state,
            "{}",
            message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RetryingWriter, StoreError};
    use crate::kafka::client::LogError;
    use crate::models::order::OrderBuilder;
    use crate::retry::RetryPolicy;
    use crate::test_utils::{MemoryBroker, MemoryConsumer, MemoryOrderStore};
    use std::sync::Arc;

    const GROUP: &str = "order-processors";

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            poll_timeout: Duration::from_secs(1),
            summary_interval: 100,
        }
    }

    fn order_consumer(
        broker: &MemoryBroker,
        store: &MemoryOrderStore,
        shutdown: &ShutdownHandle,
    ) -> (OrderConsumer<MemoryConsumer>, MemoryConsumer) {
        let consumer = broker.consumer(GROUP);
        let processor = MessageProcessor::new(RetryingWriter::new(
            Arc::new(store.clone()),
            RetryPolicy::new(3, Duration::from_millis(1000)),
        ));
        let order_consumer = OrderConsumer::new(
            consumer.clone(),
            broker.topic(),
            processor,
            settings(),
            shutdown.clone(),
        );
        (order_consumer, consumer)
    }

    fn publish(broker: &MemoryBroker, n: u32) {
        let order = OrderBuilder::new()
            .order_id(&format!("ORD-20250110-{:05}", n))
            .customer_id(&format!("CUST-{:05}", n))
            .build();
        broker.append(Some(order.partition_key()), &order.to_json_bytes().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_processes_and_commits_every_message() {
        let broker = MemoryBroker::new("food-orders", 3);
        let store = MemoryOrderStore::new();
        let shutdown = ShutdownHandle::new();
        for n in 1..=6 {
            publish(&broker, n);
        }

        let (mut order_consumer, consumer) = order_consumer(&broker, &store, &shutdown);
        consumer.stop_when_drained(shutdown.clone());

        assert_eq!(order_consumer.state(), ConsumerState::Idle);
        let stats = order_consumer.run().await.unwrap();

        assert_eq!(stats.processed, 6);
        assert_eq!(stats.failed, 0);
        assert_eq!(store.len(), 6);
        assert_eq!(order_consumer.state(), ConsumerState::Stopped);
        assert!(consumer.is_closed());
        assert!(store.is_closed());

        for partition in 0..3 {
            let expected = broker.records(partition).len() as i64;
            let committed = broker.committed(GROUP, partition).unwrap_or(0);
            assert_eq!(committed, expected, "partition {}", partition);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_is_committed_and_counted() {
        let broker = MemoryBroker::new("food-orders", 1);
        let store = MemoryOrderStore::new();
        let shutdown = ShutdownHandle::new();
        broker.append(None, b"{ not json");
        publish(&broker, 1);

        let (mut order_consumer, consumer) = order_consumer(&broker, &store, &shutdown);
        consumer.stop_when_drained(shutdown.clone());
        let stats = order_consumer.run().await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(broker.committed(GROUP, 0), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_is_skipped() {
        let broker = MemoryBroker::new("food-orders", 1);
        let store = MemoryOrderStore::new();
        let shutdown = ShutdownHandle::new();
        publish(&broker, 1);
        publish(&broker, 1);

        let (mut order_consumer, consumer) = order_consumer(&broker, &store, &shutdown);
        consumer.stop_when_drained(shutdown.clone());
        let stats = order_consumer.run().await.unwrap();

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_write_is_committed_as_failed() {
        let broker = MemoryBroker::new("food-orders", 1);
        let store = MemoryOrderStore::new();
        store.fail_next(StoreError::transient("connection refused"), 3);
        let shutdown = ShutdownHandle::new();
        publish(&broker, 1);

        let (mut order_consumer, consumer) = order_consumer(&broker, &store, &shutdown);
        consumer.stop_when_drained(shutdown.clone());
        let stats = order_consumer.run().await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(store.attempts(), 3);
        assert_eq!(broker.committed(GROUP, 0), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_with_error() {
        let broker = MemoryBroker::new("food-orders", 1);
        let store = MemoryOrderStore::new();
        let shutdown = ShutdownHandle::new();

        let (mut order_consumer, consumer) = order_consumer(&broker, &store, &shutdown);
        consumer.push_poll_result(PollResult::Error(LogError::new(
            LogErrorKind::AllBrokersDown,
            "all brokers down",
        )));

        let err = order_consumer.run().await.unwrap_err();

        assert!(matches!(err, Error::Kafka(_)));
        assert_eq!(order_consumer.state(), ConsumerState::Stopped);
        assert!(consumer.is_closed());
        assert!(store.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_fatal_events_keep_polling() {
        let broker = MemoryBroker::new("food-orders", 1);
        let store = MemoryOrderStore::new();
        let shutdown = ShutdownHandle::new();
        publish(&broker, 1);

        let (mut order_consumer, consumer) = order_consumer(&broker, &store, &shutdown);
        consumer.push_poll_result(PollResult::EndOfPartition { partition: 0 });
        consumer.push_poll_result(PollResult::Error(LogError::new(
            LogErrorKind::Other,
            "Broker: Leader not available",
        )));

        assert_eq!(order_consumer.poll_once().await.unwrap(), Iteration::Event);
        assert_eq!(order_consumer.poll_once().await.unwrap(), Iteration::Event);
        assert_eq!(order_consumer.poll_once().await.unwrap(), Iteration::Message);
        assert_eq!(order_consumer.poll_once().await.unwrap(), Iteration::Idle);

        let stats = order_consumer.stats();
        assert_eq!(stats.broker_errors, 1);
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_is_not_fatal() {
        let broker = MemoryBroker::new("food-orders", 1);
        let store = MemoryOrderStore::new();
        let shutdown = ShutdownHandle::new();
        publish(&broker, 1);
        publish(&broker, 2);

        let (mut order_consumer, consumer) = order_consumer(&broker, &store, &shutdown);
        consumer.fail_commits(1);
        consumer.stop_when_drained(shutdown.clone());
        let stats = order_consumer.run().await.unwrap();

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.commit_failures, 1);
        assert_eq!(broker.committed(GROUP, 0), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_run_only_closes() {
        let broker = MemoryBroker::new("food-orders", 1);
        let store = MemoryOrderStore::new();
        let shutdown = ShutdownHandle::new();
        publish(&broker, 1);
        shutdown.trigger();

        let (mut order_consumer, consumer) = order_consumer(&broker, &store, &shutdown);
        let stats = order_consumer.run().await.unwrap();

        assert_eq!(stats.total(), 0);
        assert!(consumer.is_closed());
        assert_eq!(broker.committed(GROUP, 0), None);

        order_consumer.close().await;
        assert_eq!(order_consumer.state(), ConsumerState::Stopped);
    }

    #[test]
    fn test_settings_from_config() {
        let settings = ConsumerSettings::from(&ConsumerConfig::default());
        assert_eq!(settings.poll_timeout, Duration::from_secs(1));
        assert_eq!(settings.summary_interval, 100);
    }
}
