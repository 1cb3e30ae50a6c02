//! CLI config for the Kafka consumers.

use siphon_queue::kafka::{DEFAULT_LINGER, DEFAULT_MAX_BATCH_SIZE, KafkaSourceConfig};
use std::{collections::HashMap, time::Duration};

fn default_max_batch_size() -> &'static str {
    let s = DEFAULT_MAX_BATCH_SIZE.to_string();
    Box::leak(Box::new(s))
}

fn default_poll_timeout() -> &'static str {
    let s = humantime::format_duration(DEFAULT_LINGER).to_string();
    Box::leak(Box::new(s))
}

/// Split a `level=topic` pair.
fn parse_level_topic(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(level, topic)| (level.to_owned(), topic.to_owned()))
        .filter(|(level, topic)| !level.is_empty() && !topic.is_empty())
        .ok_or_else(|| format!("expected 'level=topic', got '{s}'"))
}

/// CLI config for the Kafka consumers.
#[derive(Debug, Clone, clap::Parser)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` broker list.
    #[clap(
        long = "kafka-bootstrap-brokers",
        env = "SIPHON_KAFKA_BOOTSTRAP_BROKERS",
        default_value = "localhost:9092",
        action
    )]
    pub bootstrap_brokers: String,

    /// Consumer group every listener joins; acknowledged positions are
    /// committed against it.
    #[clap(
        long = "kafka-consumer-group",
        env = "SIPHON_KAFKA_CONSUMER_GROUP",
        default_value = "siphon-ingest",
        action
    )]
    pub consumer_group: String,

    /// Topic carrying raw (single-observation) metric records.
    #[clap(
        long = "kafka-raw-topic",
        env = "SIPHON_KAFKA_RAW_TOPIC",
        default_value = "metrics.raw",
        action
    )]
    pub raw_topic: String,

    /// Rollup topic per aggregation window, as repeated `level=topic`
    /// pairs (for example `--kafka-rollup-topic 5m=metrics.rollup.5m`).
    #[clap(
        long = "kafka-rollup-topic",
        env = "SIPHON_KAFKA_ROLLUP_TOPICS",
        value_parser = parse_level_topic,
        value_delimiter = ',',
        action
    )]
    pub rollup_topics: Vec<(String, String)>,

    /// Most records a listener pulls into one batch.
    #[clap(
        long = "kafka-max-batch-size",
        env = "SIPHON_KAFKA_MAX_BATCH_SIZE",
        default_value = default_max_batch_size(),
        action
    )]
    pub max_batch_size: usize,

    /// How long a listener keeps topping a batch up after its first
    /// record arrives.
    #[clap(
        long = "kafka-poll-timeout",
        env = "SIPHON_KAFKA_POLL_TIMEOUT",
        default_value = default_poll_timeout(),
        value_parser = humantime::parse_duration,
        action
    )]
    pub poll_timeout: Duration,

    /// CA certificate path for TLS broker connections, passed through
    /// to librdkafka.
    #[clap(long = "kafka-ssl-ca", env = "SIPHON_KAFKA_SSL_CA", action)]
    pub ssl_ca: Option<String>,

    /// Client certificate path for mutual TLS.
    #[clap(long = "kafka-ssl-cert", env = "SIPHON_KAFKA_SSL_CERT", action)]
    pub ssl_cert: Option<String>,

    /// Client key path for mutual TLS.
    #[clap(long = "kafka-ssl-key", env = "SIPHON_KAFKA_SSL_KEY", action)]
    pub ssl_key: Option<String>,
}

impl KafkaConfig {
    /// Source settings for one topic, carrying the shared tuning and
    /// TLS material.
    pub fn source_config(&self, topic: impl Into<String>) -> KafkaSourceConfig {
        let mut config = KafkaSourceConfig::new(
            self.bootstrap_brokers.clone(),
            self.consumer_group.clone(),
            topic,
        );
        config.max_batch_size = self.max_batch_size;
        config.linger = self.poll_timeout;
        config.connection_config = self.connection_config();
        config
    }

    fn connection_config(&self) -> HashMap<String, String> {
        let mut options = HashMap::new();
        let material = [
            ("ssl.ca.location", &self.ssl_ca),
            ("ssl.certificate.location", &self.ssl_cert),
            ("ssl.key.location", &self.ssl_key),
        ];
        for (key, value) in material {
            if let Some(value) = value {
                options.insert(key.to_owned(), value.clone());
            }
        }
        if !options.is_empty() {
            options.insert("security.protocol".to_owned(), "ssl".to_owned());
        }
        options
    }
}
