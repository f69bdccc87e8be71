//! Kafka configuration module

use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Kafka configuration settings, shared by the producer and consumer clients
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct KafkaConfig {
    /// Kafka broker addresses (comma-separated)
    #[serde(default = "default_brokers")]
    #[envconfig(from = "KAFKA_BOOTSTRAP_SERVERS", default = "localhost:9092")]
    pub brokers: String,

    /// Topic carrying order events
    #[serde(default = "default_orders_topic")]
    #[envconfig(from = "KAFKA_TOPIC_ORDERS", default = "food-orders")]
    pub orders_topic: String,

    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    #[envconfig(from = "CONSUMER_GROUP_ID", default = "order-processors")]
    pub consumer_group: String,

    /// Client id reported by the consumer
    #[serde(default = "default_consumer_client_id")]
    #[envconfig(from = "CONSUMER_CLIENT_ID", default = "order-consumer")]
    pub consumer_client_id: String,

    /// Client id reported by the producer
    #[serde(default = "default_producer_client_id")]
    #[envconfig(from = "PRODUCER_CLIENT_ID", default = "order-producer")]
    pub producer_client_id: String,

    /// Where a new group starts reading (earliest, latest)
    #[serde(default = "default_auto_offset_reset")]
    #[envconfig(from = "CONSUMER_AUTO_OFFSET_RESET", default = "earliest")]
    pub auto_offset_reset: String,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout")]
    #[envconfig(from = "KAFKA_SESSION_TIMEOUT_MS", default = "30000")]
    pub session_timeout_ms: u32,

    /// Maximum poll interval in milliseconds
    #[serde(default = "default_max_poll_interval")]
    #[envconfig(from = "KAFKA_MAX_POLL_INTERVAL_MS", default = "300000")]
    pub max_poll_interval_ms: u32,

    /// Surface end-of-partition events to the consumer loop
    #[serde(default)]
    #[envconfig(from = "KAFKA_ENABLE_PARTITION_EOF", default = "false")]
    pub enable_partition_eof: bool,

    /// Enable idempotent producer
    #[serde(default = "default_idempotent_producer")]
    #[envconfig(from = "ENABLE_IDEMPOTENCE", default = "true")]
    pub idempotent_producer: bool,

    /// Acknowledgement level (0, 1, all)
    #[serde(default = "default_acks")]
    #[envconfig(from = "PRODUCER_ACKS", default = "all")]
    pub acks: String,

    /// Compression type for produced batches
    #[serde(default = "default_compression_type")]
    #[envconfig(from = "PRODUCER_COMPRESSION", default = "snappy")]
    pub compression_type: String,

    /// Time to wait for batching, in milliseconds
    #[serde(default = "default_linger_ms")]
    #[envconfig(from = "PRODUCER_LINGER_MS", default = "10")]
    pub linger_ms: u32,

    /// Maximum batch size in bytes
    #[serde(default = "default_batch_size")]
    #[envconfig(from = "PRODUCER_BATCH_SIZE", default = "16384")]
    pub batch_size: u32,

    /// Total memory for buffered messages, in bytes
    #[serde(default = "default_buffer_memory")]
    #[envconfig(from = "PRODUCER_BUFFER_MEMORY", default = "33554432")]
    pub buffer_memory: u64,

    /// Maximum number of buffered messages
    #[serde(default = "default_queue_max_messages")]
    #[envconfig(from = "PRODUCER_QUEUE_MAX_MESSAGES", default = "100000")]
    pub queue_max_messages: u32,

    /// Delivery timeout per message, in milliseconds
    #[serde(default = "default_message_timeout")]
    #[envconfig(from = "PRODUCER_MESSAGE_TIMEOUT_MS", default = "30000")]
    pub message_timeout_ms: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            orders_topic: default_orders_topic(),
            consumer_group: default_consumer_group(),
            consumer_client_id: default_consumer_client_id(),
            producer_client_id: default_producer_client_id(),
            auto_offset_reset: default_auto_offset_reset(),
            session_timeout_ms: default_session_timeout(),
            max_poll_interval_ms: default_max_poll_interval(),
            enable_partition_eof: false,
            idempotent_producer: default_idempotent_producer(),
            acks: default_acks(),
            compression_type: default_compression_type(),
            linger_ms: default_linger_ms(),
            batch_size: default_batch_size(),
            buffer_memory: default_buffer_memory(),
            queue_max_messages: default_queue_max_messages(),
            message_timeout_ms: default_message_timeout(),
        }
    }
}

impl KafkaConfig {
    /// Create a new KafkaConfig from environment variables
    pub fn from_env() -> std::result::Result<Self, envconfig::Error> {
        <Self as envconfig::Envconfig>::init_from_env()
    }

    /// Get session timeout as Duration
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms as u64)
    }

    /// Get per-message delivery timeout as Duration
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms as u64)
    }

    /// Get brokers as a vector
    pub fn brokers_list(&self) -> Vec<String> {
        self.brokers.split(',').map(|s| s.trim().to_string()).collect()
    }

    /// Check the settings that would otherwise fail late inside librdkafka
    pub fn validate(&self) -> Result<()> {
        if self.brokers_list().iter().all(|b| b.is_empty()) {
            return Err(Error::config("Kafka brokers cannot be empty"));
        }
        if self.orders_topic.trim().is_empty() {
            return Err(Error::config("Kafka topic cannot be empty"));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(Error::config("Consumer group id cannot be empty"));
        }
        if !matches!(self.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(Error::config(format!(
                "Invalid auto offset reset '{}' (expected earliest or latest)",
                self.auto_offset_reset
            )));
        }
        if !matches!(self.acks.as_str(), "0" | "1" | "all" | "-1") {
            return Err(Error::config(format!("Invalid producer acks '{}'", self.acks)));
        }
        if self.idempotent_producer && !matches!(self.acks.as_str(), "all" | "-1") {
            return Err(Error::config("Idempotent producer requires acks=all"));
        }
        if self.linger_ms > 1000 {
            return Err(Error::config("Producer linger must be between 0 and 1000 ms"));
        }
        if self.batch_size < 1024 {
            return Err(Error::config("Producer batch size must be at least 1024 bytes"));
        }
        if self.buffer_memory < 1024 * 1024 {
            return Err(Error::config("Producer buffer memory must be at least 1 MiB"));
        }
        Ok(())
    }

    /// Build rdkafka consumer configuration
    ///
    /// Auto-commit is always off: offsets are committed by the consumer loop
    /// after each message reaches a terminal outcome.
    pub fn build_consumer_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("client.id", &self.consumer_client_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                self.max_poll_interval_ms.to_string(),
            )
            .set("enable.partition.eof", self.enable_partition_eof.to_string())
            .set("auto.offset.reset", &self.auto_offset_reset);

        config
    }

    /// Build rdkafka producer configuration
    pub fn build_producer_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.producer_client_id)
            .set("message.timeout.ms", self.message_timeout_ms.to_string())
            .set("compression.type", &self.compression_type)
            .set("linger.ms", self.linger_ms.to_string())
            .set("batch.size", self.batch_size.to_string())
            .set(
                "queue.buffering.max.kbytes",
                (self.buffer_memory / 1024).to_string(),
            )
            .set(
                "queue.buffering.max.messages",
                self.queue_max_messages.to_string(),
            )
            .set("acks", &self.acks);

        if self.idempotent_producer {
            config
                .set("enable.idempotence", "true")
                .set("max.in.flight.requests.per.connection", "5");
        }

        config
    }
}

// Default value functions
fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_orders_topic() -> String {
    "food-orders".to_string()
}

fn default_consumer_group() -> String {
    "order-processors".to_string()
}

fn default_consumer_client_id() -> String {
    "order-consumer".to_string()
}

fn default_producer_client_id() -> String {
    "order-producer".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout() -> u32 {
    30000 // 30 seconds
}

fn default_max_poll_interval() -> u32 {
    300000 // 5 minutes
}

fn default_idempotent_producer() -> bool {
    true
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_compression_type() -> String {
    "snappy".to_string()
}

fn default_linger_ms() -> u32 {
    10
}

fn default_batch_size() -> u32 {
    16384
}

fn default_buffer_memory() -> u64 {
    33554432 // 32 MiB
}

fn default_queue_max_messages() -> u32 {
    100000
}

fn default_message_timeout() -> u32 {
    30000
}
