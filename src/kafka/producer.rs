//! Order publisher with delivery tracking

use futures::FutureExt;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::client::{DeliveryReceipt, LogError, LogErrorKind, LogProducer, PendingDelivery, PublishError};
use crate::models::Order;

struct InFlight {
    order_id: String,
    delivery: PendingDelivery,
}

/// Publisher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Messages handed to the client
    pub published: u64,
    /// Broker acknowledgements observed
    pub delivered: u64,
    /// Delivery failures observed
    pub delivery_failed: u64,
    /// Sends rejected because the local queue was full
    pub buffer_full: u64,
}

/// Publishes orders keyed by customer id and tracks their delivery
///
/// Delivery results are only observed at explicit drain points:
/// [`OrderPublisher::poll_deliveries`] (called after every publish) and
/// [`OrderPublisher::flush`].
pub struct OrderPublisher<P> {
    producer: P,
    topic: String,
    in_flight: VecDeque<InFlight>,
    receipts: VecDeque<DeliveryReceipt>,
    receipt_capacity: usize,
    stats: PublisherStats,
    closed: bool,
}

impl<P: LogProducer> OrderPublisher<P> {
    pub fn new(producer: P, topic: impl Into<String>, receipt_capacity: usize) -> Self {
        Self {
            producer,
            topic: topic.into(),
            in_flight: VecDeque::new(),
            receipts: VecDeque::with_capacity(receipt_capacity),
            receipt_capacity: receipt_capacity.max(1),
            stats: PublisherStats::default(),
            closed: false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats
    }

    /// Most recent delivery receipts, oldest first
    pub fn recent_receipts(&self) -> &VecDeque<DeliveryReceipt> {
        &self.receipts
    }

    /// Deliveries not yet confirmed either way
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Serialize `order` and hand it to the client, keyed by customer id
    ///
    /// Returns once the message is buffered; the broker acknowledgement is
    /// reported later through the delivery counters and receipts.
    pub fn publish(&mut self, order: &Order) -> Result<(), PublishError> {
        if self.closed {
            return Err(PublishError::Kafka(LogError::new(
                LogErrorKind::Other,
                "Publisher is closed",
            )));
        }

        let payload = order.to_json_bytes()?;

        let result = self
            .producer
            .send(&self.topic, order.partition_key(), &payload);

        match result {
            Ok(delivery) => {
                self.in_flight.push_back(InFlight {
                    order_id: order.order_id.clone(),
                    delivery,
                });
                self.stats.published += 1;
                debug!(
                    correlation_id = %order.order_id,
                    customer_id = %order.customer_id,
                    total_amount = %order.total_amount,
                    "Order published"
                );
            },
            Err(PublishError::BufferFull) => {
                self.stats.buffer_full += 1;
                warn!(
                    correlation_id = %order.order_id,
                    in_flight = self.producer.in_flight(),
                    "Producer buffer full"
                );
                self.poll_deliveries();
                return Err(PublishError::BufferFull);
            },
            Err(e) => return Err(e),
        }

        self.poll_deliveries();
        Ok(())
    }

    /// Observe every delivery that has completed, without waiting
    ///
    /// Returns the number of deliveries observed.
    pub fn poll_deliveries(&mut self) -> usize {
        let mut completed = Vec::new();

        self.in_flight.retain_mut(|entry| match (&mut entry.delivery).now_or_never() {
            Some(result) => {
                completed.push((std::mem::take(&mut entry.order_id), result));
                false
            },
            None => true,
        });

        let observed = completed.len();
        for (order_id, result) in completed {
            match result {
                Ok(delivered) => {
                    debug!(
                        correlation_id = %order_id,
                        partition = delivered.partition,
                        offset = delivered.offset,
                        "Order delivered"
                    );
                    self.stats.delivered += 1;
                    if self.receipts.len() == self.receipt_capacity {
                        self.receipts.pop_front();
                    }
                    self.receipts.push_back(DeliveryReceipt {
                        order_id,
                        partition: delivered.partition,
                        offset: delivered.offset,
                        timestamp: delivered.timestamp,
                    });
                },
                Err(e) => {
                    error!(
                        correlation_id = %order_id,
                        error = %e,
                        "Order delivery failed"
                    );
                    self.stats.delivery_failed += 1;
                },
            }
        }

        observed
    }

    /// Wait for outstanding deliveries, up to `timeout`
    ///
    /// Returns the number of messages still unconfirmed.
    pub async fn flush(&mut self, timeout: Duration) -> usize {
        if !self.in_flight.is_empty() {
            info!(
                pending = self.in_flight.len(),
                timeout_secs = timeout.as_secs_f64(),
                "Flushing producer"
            );
        }

        if let Err(e) = self.producer.flush(timeout).await {
            warn!(error = %e, "Producer flush did not complete");
        }

        self.poll_deliveries();
        self.in_flight.len()
    }

    /// Flush and release the publisher; never fails
    ///
    /// Returns the number of messages that were never confirmed.
    pub async fn close(&mut self, timeout: Duration) -> usize {
        if self.closed {
            return self.in_flight.len();
        }

        let remaining = self.flush(timeout).await;
        self.closed = true;

        if remaining > 0 {
            error!(
                undelivered = remaining,
                "Producer closed with undelivered messages"
            );
        } else {
            info!("Producer closed, all messages delivered");
        }

        remaining
    }
}
