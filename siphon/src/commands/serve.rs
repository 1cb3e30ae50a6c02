//! Entrypoint for the siphon ingestion server

use observability_deps::tracing::*;
use siphon_clap_blocks::{kafka::KafkaConfig, routing::RoutingConfig, write::WriteConfig};
use siphon_ingest::{
    extract::{RawExtractor, RollupExtractor},
    listen::Listener,
    process::BatchProcessor,
    write::IngestWriter,
};
use siphon_queue::{QueueError, kafka::KafkaBatchSource};
use siphon_types::{AGGREGATION_FULL, RawMetric, RollupMetric};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trogging::cli::LoggingConfig;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("Cannot build the InfluxDB write client: {0}")]
    Client(#[from] siphon_client::Error),

    #[error("Cannot build the tenant route provider: {0}")]
    Routing(#[from] siphon_clap_blocks::routing::Error),

    #[error("Cannot start a Kafka listener: {0}")]
    Kafka(#[source] QueueError),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// logging options
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,

    /// kafka consumer options
    #[clap(flatten)]
    kafka_config: KafkaConfig,

    /// tenant routing options
    #[clap(flatten)]
    routing_config: RoutingConfig,

    /// influxdb write options
    #[clap(flatten)]
    write_config: WriteConfig,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        raw_topic = %config.kafka_config.raw_topic,
        rollup_topics = config.kafka_config.rollup_topics.len(),
        routing_mode = ?config.routing_config.mode,
        "Siphon server starting",
    );

    let client = config.write_config.client()?;
    let routes = config.routing_config.route_provider()?;
    let writer = Arc::new(
        IngestWriter::new(client, routes)
            .with_max_attempts(config.write_config.max_attempts)
            .with_retry_backoff(config.write_config.retry_initial_backoff),
    );

    // Construct a token to trigger clean shutdown
    let shutdown = CancellationToken::new();
    let mut listeners: Vec<JoinHandle<()>> = Vec::new();

    // One listener per topic. The raw topic always exists; rollup topics
    // are optional and each carries its aggregation level.
    let source = KafkaBatchSource::<RawMetric>::try_new(
        &config
            .kafka_config
            .source_config(config.kafka_config.raw_topic.as_str()),
    )
    .map_err(Error::Kafka)?;
    let processor = BatchProcessor::new(RawExtractor, Arc::clone(&writer), AGGREGATION_FULL);
    listeners.push(tokio::spawn(
        Listener::new(source, processor, shutdown.clone()).run(),
    ));

    for (level, topic) in &config.kafka_config.rollup_topics {
        let source =
            KafkaBatchSource::<RollupMetric>::try_new(&config.kafka_config.source_config(topic.as_str()))
                .map_err(Error::Kafka)?;
        let processor = BatchProcessor::new(RollupExtractor, Arc::clone(&writer), level.as_str());
        listeners.push(tokio::spawn(
            Listener::new(source, processor, shutdown.clone()).run(),
        ));
    }

    wait_for_signal().await;

    info!("Shutting down; in-flight batches finish before listeners stop");
    shutdown.cancel();
    for listener in listeners {
        if let Err(error) = listener.await {
            error!(%error, "listener task failed");
        }
    }

    info!("Siphon server stopped");
    Ok(())
}

/// Wait for the process to receive either SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).expect("failed to register signal handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to register signal handler");

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
}

/// Wait for a `ctrl+c` to stop the process on Windows systems
#[cfg(windows)]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT");
}
