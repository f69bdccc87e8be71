//! Kafka side of the order pipeline
//!
//! This module provides:
//! - The event log client seam ([`LogConsumer`], [`LogProducer`]) and its
//!   rdkafka implementations
//! - The order publisher and the rate-limited production loop
//! - The order consumer with commit-after-process offset management
//! - Per-message processing (decode, validate, write)

pub mod client;
mod config;
pub mod consumer;
pub mod processor;
pub mod producer;
pub mod producer_loop;

pub use client::{
    Delivered, DeliveryReceipt, KafkaLogConsumer, KafkaLogProducer, LogConsumer, LogError,
    LogErrorKind, LogProducer, LogRecord, PartitionInfo, PollResult, PublishError, TopicMetadata,
};
pub use config::KafkaConfig;
pub use consumer::{ConsumerSettings, ConsumerState, ConsumerStats, Iteration, OrderConsumer};
pub use processor::{MessageProcessor, ProcessingOutcome, RejectReason};
pub use producer::{OrderPublisher, PublisherStats};
pub use producer_loop::{OrderSource, ProducerLoop, ProducerLoopSettings, ProducerStats};
