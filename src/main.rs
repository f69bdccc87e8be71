//! order-pipeline - Kafka order event pipeline
//!
//! `produce` publishes mock food orders to Kafka at a fixed rate, keyed by
//! customer id. `consume` reads them as a member of a consumer group,
//! validates them and writes each one exactly once to PostgreSQL.
//!
//! # Usage
//!
//! ```bash
//! # Publish 20 orders per second for two minutes
//! order-pipeline produce --rate 20 --duration 120
//!
//! # Publish until interrupted, reproducible data
//! order-pipeline produce --duration 0 --seed 12345
//!
//! # Consume with text logs
//! order-pipeline --log-format text consume --group-id order-processors
//! ```
//!
//! Both commands stop gracefully on SIGINT (Ctrl+C) or SIGTERM.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use order_pipeline::config::Config;
use order_pipeline::db::{self, OrderStore, PgOrderRepository, RetryingWriter};
use order_pipeline::error::{Error, Result};
use order_pipeline::kafka::{
    ConsumerSettings, KafkaLogConsumer, KafkaLogProducer, MessageProcessor, OrderConsumer,
    OrderPublisher, ProducerLoop, ProducerLoopSettings,
};
use order_pipeline::logging;
use order_pipeline::mock_data::{MockDataGenerator, NUM_CUSTOMERS};
use order_pipeline::shutdown::ShutdownHandle;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka order event pipeline
#[derive(Parser, Debug)]
#[command(name = "order-pipeline")]
#[command(about = "Kafka order producer and idempotent PostgreSQL consumer")]
#[command(version)]
struct Cli {
    /// Kafka bootstrap servers (overrides KAFKA_BOOTSTRAP_SERVERS)
    #[arg(long, global = true)]
    bootstrap_servers: Option<String>,

    /// Orders topic (overrides KAFKA_TOPIC_ORDERS)
    #[arg(long, global = true)]
    topic: Option<String>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// Log format (overrides LOG_FORMAT)
    #[arg(long, global = true, value_parser = ["json", "text"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate mock orders and publish them to Kafka
    Produce(ProduceArgs),
    /// Consume orders from Kafka and store them in PostgreSQL
    Consume(ConsumeArgs),
}

#[derive(clap::Args, Debug)]
struct ProduceArgs {
    /// Orders per second, 1-1000
    #[arg(long)]
    rate: Option<u32>,

    /// Run duration in seconds, 0 runs until interrupted
    #[arg(long)]
    duration: Option<u64>,

    /// Seed for reproducible mock data
    #[arg(long)]
    seed: Option<u64>,

    /// Producer client id
    #[arg(long)]
    client_id: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ConsumeArgs {
    /// Consumer group id
    #[arg(long)]
    group_id: Option<String>,

    /// Consumer client id
    #[arg(long)]
    client_id: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of the environment
    fn apply(&self, config: &mut Config) {
        if let Some(brokers) = &self.bootstrap_servers {
            config.kafka.brokers = brokers.clone();
        }
        if let Some(topic) = &self.topic {
            config.kafka.orders_topic = topic.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.log_format = format.clone();
        }

        match &self.command {
            Command::Produce(args) => {
                if let Some(rate) = args.rate {
                    config.producer.rate = rate;
                }
                if let Some(duration) = args.duration {
                    config.producer.duration_secs = duration;
                }
                if let Some(seed) = args.seed {
                    config.producer.mock_seed = seed;
                }
                if let Some(client_id) = &args.client_id {
                    config.kafka.producer_client_id = client_id.clone();
                }
            },
            Command::Consume(args) => {
                if let Some(group_id) = &args.group_id {
                    config.kafka.consumer_group = group_id.clone();
                }
                if let Some(client_id) = &args.client_id {
                    config.kafka.consumer_client_id = client_id.clone();
                }
            },
        }
    }

    fn service_name(&self) -> &'static str {
        match self.command {
            Command::Produce(_) => "order-producer",
            Command::Consume(_) => "order-consumer",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        },
    };
    cli.apply(&mut config);

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let service = cli.service_name();
    if let Err(e) = logging::init_tracing(
        &config.logging.log_level,
        &config.logging.log_format,
        service,
    ) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    config.log_config();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), service, "Starting");

    let result = match cli.command {
        Command::Produce(_) => run_producer(config).await,
        Command::Consume(_) => run_consumer(config).await,
    };

    match result {
        Ok(()) => {
            tracing::info!(service, "Shutdown complete");
            ExitCode::SUCCESS
        },
        Err(e) => {
            order_pipeline::log_error!(e, "Service failed");
            ExitCode::FAILURE
        },
    }
}

async fn run_producer(config: Config) -> Result<()> {
    let producer = KafkaLogProducer::new(&config.kafka)?;

    tracing::info!(brokers = %config.kafka.brokers, "Validating Kafka connection");
    let metadata = producer
        .topic_metadata(&config.kafka.orders_topic, METADATA_TIMEOUT)
        .await?;
    tracing::info!(
        topic = %metadata.topic,
        partition_count = metadata.partitions.len(),
        partitions = ?metadata.partitions,
        "Topic metadata"
    );

    tracing::info!(
        seed = config.producer.mock_seed,
        num_customers = NUM_CUSTOMERS,
        "Initializing mock data generator"
    );
    let generator = MockDataGenerator::new(config.producer.mock_seed);

    let shutdown = ShutdownHandle::new();
    shutdown.listen_for_signals();

    let publisher = OrderPublisher::new(
        producer,
        config.kafka.orders_topic.clone(),
        config.producer.receipt_buffer,
    );
    let stats = ProducerLoop::new(
        publisher,
        generator,
        ProducerLoopSettings::from(&config.producer),
        shutdown,
    )
    .run()
    .await;

    if stats.errors > 0 || stats.undelivered > 0 {
        tracing::warn!(
            errors = stats.errors,
            undelivered = stats.undelivered,
            "Producer finished with unpublished orders"
        );
    }

    Ok(())
}

async fn run_consumer(config: Config) -> Result<()> {
    let pool = db::create_pool(&config.database).await?;

    if config.database.run_migrations {
        db::run_migrations(&pool)
            .await
            .map_err(|e| Error::database(format!("Failed to run migrations: {}", e)))?;
        tracing::info!("Database migrations applied");
    }

    let store = Arc::new(PgOrderRepository::new(pool));
    let stored_orders = store.count().await?;
    tracing::info!(stored_orders, "Order store ready");

    let consumer = match KafkaLogConsumer::new(&config.kafka) {
        Ok(consumer) => consumer,
        Err(e) => {
            store.close().await;
            return Err(e);
        },
    };

    let shutdown = ShutdownHandle::new();
    shutdown.listen_for_signals();

    let processor =
        MessageProcessor::new(RetryingWriter::new(store, config.consumer.retry_policy()));
    let mut order_consumer = OrderConsumer::new(
        consumer,
        config.kafka.orders_topic.clone(),
        processor,
        ConsumerSettings::from(&config.consumer),
        shutdown,
    );

    order_consumer.run().await?;
    Ok(())
}
