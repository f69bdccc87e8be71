//! Rate-limited production loop

use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::client::{LogProducer, PublishError};
use super::producer::OrderPublisher;
use crate::config::ProducerConfig;
use crate::models::Order;
use crate::shutdown::ShutdownHandle;

/// Supplies the orders to publish
pub trait OrderSource: Send {
    /// Next order, or `None` once the source is exhausted
    fn next_order(&mut self) -> Option<Order>;
}

impl OrderSource for std::vec::IntoIter<Order> {
    fn next_order(&mut self) -> Option<Order> {
        self.next()
    }
}

/// Pacing and teardown settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerLoopSettings {
    /// Pause after each publish attempt
    pub interval: Duration,
    /// Stop after this long; `None` runs until shutdown
    pub duration: Option<Duration>,
    pub flush_timeout: Duration,
    pub close_timeout: Duration,
    /// Log progress every this many orders
    pub progress_interval: u64,
}

impl From<&ProducerConfig> for ProducerLoopSettings {
    fn from(config: &ProducerConfig) -> Self {
        Self {
            interval: config.interval(),
            duration: config.duration(),
            flush_timeout: config.flush_timeout(),
            close_timeout: config.close_timeout(),
            progress_interval: config.progress_interval.max(1),
        }
    }
}

/// Final producer counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProducerStats {
    /// Orders accepted by the client
    pub orders_sent: u64,
    /// Orders that could not be handed to the client
    pub errors: u64,
    pub delivered: u64,
    pub delivery_failed: u64,
    /// Messages still unconfirmed when the producer closed
    pub undelivered: usize,
    pub elapsed: Duration,
}

impl ProducerStats {
    /// Orders sent per second over the whole run
    pub fn actual_rate(&self) -> f64 {
        rate(self.orders_sent, self.elapsed)
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Generates orders from a source and publishes them at a fixed pace
pub struct ProducerLoop<P, S> {
    publisher: OrderPublisher<P>,
    source: S,
    settings: ProducerLoopSettings,
    shutdown: ShutdownHandle,
}

impl<P: LogProducer, S: OrderSource> ProducerLoop<P, S> {
    pub fn new(
        publisher: OrderPublisher<P>,
        source: S,
        settings: ProducerLoopSettings,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            publisher,
            source,
            settings,
            shutdown,
        }
    }

    /// Run until the duration bound, shutdown or an exhausted source
    ///
    /// Teardown (flush, close, summary) always runs exactly once.
    pub async fn run(mut self) -> ProducerStats {
        let target_rate = rate(1, self.settings.interval);
        info!(
            topic = self.publisher.topic(),
            target_rate,
            sleep_interval_ms = self.settings.interval.as_millis() as u64,
            duration_secs = self.settings.duration.map(|d| d.as_secs()),
            "Starting order production"
        );

        let start = Instant::now();
        let mut orders_sent = 0u64;
        let mut errors = 0u64;

        loop {
            if self.shutdown.is_triggered() {
                info!(orders_sent, "Shutdown requested, stopping production");
                break;
            }

            if let Some(limit) = self.settings.duration {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    info!(
                        duration_secs = limit.as_secs(),
                        elapsed_secs = elapsed.as_secs_f64(),
                        orders_sent,
                        "Duration limit reached, stopping production"
                    );
                    break;
                }
            }

            let Some(order) = self.source.next_order() else {
                info!(orders_sent, "Order source exhausted, stopping production");
                break;
            };

            match self.publisher.publish(&order) {
                Ok(()) => {
                    orders_sent += 1;
                    if orders_sent % self.settings.progress_interval == 0 {
                        let elapsed = start.elapsed();
                        info!(
                            orders_sent,
                            elapsed_secs = elapsed.as_secs_f64(),
                            target_rate,
                            actual_rate = rate(orders_sent, elapsed),
                            errors,
                            "Production progress"
                        );
                    }
                },
                Err(PublishError::BufferFull) => {
                    errors += 1;
                    warn!(
                        correlation_id = %order.order_id,
                        "Producer queue full, order dropped"
                    );
                },
                Err(e) => {
                    errors += 1;
                    error!(
                        correlation_id = %order.order_id,
                        error = %e,
                        "Failed to publish order"
                    );
                },
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {},
                _ = self.shutdown.wait() => {},
            }
        }

        self.finish(start, orders_sent, errors).await
    }

    async fn finish(&mut self, start: Instant, orders_sent: u64, errors: u64) -> ProducerStats {
        info!(
            orders_sent,
            errors,
            pending = self.publisher.pending(),
            "Flushing pending messages"
        );
        let remaining = self.publisher.flush(self.settings.flush_timeout).await;
        if remaining == 0 {
            info!("All messages delivered");
        } else {
            warn!(remaining, "Messages not delivered after flush");
        }

        let undelivered = self.publisher.close(self.settings.close_timeout).await;

        let publisher_stats = self.publisher.stats();
        let stats = ProducerStats {
            orders_sent,
            errors,
            delivered: publisher_stats.delivered,
            delivery_failed: publisher_stats.delivery_failed,
            undelivered,
            elapsed: start.elapsed(),
        };

        info!(
            total_orders = stats.orders_sent,
            total_errors = stats.errors,
            delivered = stats.delivered,
            delivery_failed = stats.delivery_failed,
            undelivered = stats.undelivered,
            total_duration_secs = stats.elapsed.as_secs_f64(),
            average_rate = stats.actual_rate(),
            "Producer shutdown complete"
        );

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::OrderBuilder;
    use crate::test_utils::MemoryBroker;

    fn settings(interval_ms: u64, duration: Option<Duration>) -> ProducerLoopSettings {
        ProducerLoopSettings {
            interval: Duration::from_millis(interval_ms),
            duration,
            flush_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
            progress_interval: 100,
        }
    }

    fn orders(count: u32) -> std::vec::IntoIter<Order> {
        (1..=count)
            .map(|n| {
                OrderBuilder::new()
                    .order_id(&format!("ORD-20250110-{:05}", n))
                    .customer_id(&format!("CUST-{:05}", n % 7 + 1))
                    .build()
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_settings_from_config() {
        let config = ProducerConfig {
            rate: 20,
            duration_secs: 0,
            ..ProducerConfig::default()
        };
        let settings = ProducerLoopSettings::from(&config);
        assert_eq!(settings.interval, Duration::from_millis(50));
        assert_eq!(settings.duration, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_source_publishes_everything() {
        let broker = MemoryBroker::new("food-orders", 3);
        let publisher = OrderPublisher::new(broker.producer(), "food-orders", 100);

        let stats = ProducerLoop::new(publisher, orders(5), settings(100, None), ShutdownHandle::new())
            .run()
            .await;

        assert_eq!(stats.orders_sent, 5);
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.undelivered, 0);
        assert_eq!(broker.message_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_bound_paces_publishing() {
        let broker = MemoryBroker::new("food-orders", 1);
        let publisher = OrderPublisher::new(broker.producer(), "food-orders", 100);

        // 10 per second for one second
        let stats = ProducerLoop::new(
            publisher,
            orders(1000),
            settings(100, Some(Duration::from_secs(1))),
            ShutdownHandle::new(),
        )
        .run()
        .await;

        assert_eq!(stats.orders_sent, 10);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop_and_flushes() {
        let broker = MemoryBroker::new("food-orders", 1);
        let producer = broker.producer();
        let publisher = OrderPublisher::new(producer.clone(), "food-orders", 100);
        let shutdown = ShutdownHandle::new();

        let handle = tokio::spawn(
            ProducerLoop::new(publisher, orders(1000), settings(100, None), shutdown.clone()).run(),
        );

        tokio::time::sleep(Duration::from_millis(450)).await;
        shutdown.trigger();
        let stats = handle.await.unwrap();

        assert_eq!(stats.orders_sent, 5);
        assert_eq!(producer.flushes(), 2, "flush then close");
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_full_is_counted_and_loop_continues() {
        let broker = MemoryBroker::new("food-orders", 1);
        let producer = broker.producer();
        producer.stall();
        producer.set_capacity(2);
        let publisher = OrderPublisher::new(producer, "food-orders", 100);

        let stats = ProducerLoop::new(publisher, orders(5), settings(10, None), ShutdownHandle::new())
            .run()
            .await;

        assert_eq!(stats.orders_sent, 2);
        assert_eq!(stats.errors, 3);
        assert_eq!(stats.undelivered, 2);
    }

    #[test]
    fn test_actual_rate() {
        let stats = ProducerStats {
            orders_sent: 50,
            elapsed: Duration::from_secs(5),
            ..ProducerStats::default()
        };
        assert_eq!(stats.actual_rate(), 10.0);
        assert_eq!(ProducerStats::default().actual_rate(), 0.0);
    }
}
