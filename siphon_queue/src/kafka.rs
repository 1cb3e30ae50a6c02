//! Kafka-backed [`BatchSource`].
//!
//! Payloads are JSON-decoded into the source's record type as they are
//! pulled off the wire; undecodable payloads are dropped and counted so
//! the caller can surface them without the partition ever wedging on a
//! bad message.

use crate::core::{BatchSource, QueueError, SourceBatch};
use async_trait::async_trait;
use observability_deps::tracing::{debug, info, warn};
use rdkafka::{
    ClientConfig, Message, Offset, TopicPartitionList,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::BorrowedMessage,
};
use serde::de::DeserializeOwned;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

/// Record cap per delivered batch when the config does not say otherwise.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Default window for topping a batch up after its first record arrives.
pub const DEFAULT_LINGER: Duration = Duration::from_millis(100);

/// How long a rewind's seek may take before it fails.
const SEEK_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for a [`KafkaBatchSource`].
#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    /// Comma-separated `host:port` broker list.
    pub brokers: String,

    /// Consumer group to join; acknowledged positions are committed
    /// against it.
    pub group_id: String,

    /// Topic to subscribe to.
    pub topic: String,

    /// Most records a single batch may carry.
    pub max_batch_size: usize,

    /// How long to keep filling a batch after its first record arrives.
    pub linger: Duration,

    /// Additional librdkafka options applied verbatim, for example TLS
    /// material or SASL credentials.
    pub connection_config: HashMap<String, String>,
}

impl KafkaSourceConfig {
    pub fn new(
        brokers: impl Into<String>,
        group_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            topic: topic.into(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            linger: DEFAULT_LINGER,
            connection_config: HashMap::new(),
        }
    }
}

/// [`BatchSource`] reading JSON payloads from a Kafka topic.
///
/// One poll cycle may return records from several partitions; they are
/// split into one [`SourceBatch`] per partition so that acknowledging
/// or rewinding stays partition-precise. Auto-commit is disabled: the
/// only committed positions are the ones the caller acks.
pub struct KafkaBatchSource<R> {
    consumer: Arc<StreamConsumer>,
    topic: String,
    max_batch_size: usize,
    linger: Duration,
    /// Batches cut from earlier poll cycles, delivered before polling
    /// again.
    ready: VecDeque<SourceBatch<R>>,
}

// Needed because rdkafka's StreamConsumer doesn't impl Debug.
impl<R> std::fmt::Debug for KafkaBatchSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBatchSource")
            .field("topic", &self.topic)
            .field("max_batch_size", &self.max_batch_size)
            .field("linger", &self.linger)
            .finish()
    }
}

impl<R> KafkaBatchSource<R>
where
    R: DeserializeOwned + Send + Sync,
{
    /// Connect to the brokers and subscribe to the configured topic.
    pub fn try_new(config: &KafkaSourceConfig) -> Result<Self, QueueError> {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &config.brokers);
        cfg.set("group.id", &config.group_id);
        cfg.set("session.timeout.ms", "6000");
        cfg.set("enable.auto.commit", "false");
        // When the group has no committed position yet, start from the
        // oldest available record rather than silently dropping history.
        cfg.set("auto.offset.reset", "earliest");
        for (key, value) in &config.connection_config {
            cfg.set(key, value);
        }

        let consumer: StreamConsumer = cfg.create()?;
        consumer.subscribe(&[config.topic.as_str()])?;
        info!(
            topic = %config.topic,
            group = %config.group_id,
            "subscribed to kafka topic"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: config.topic.clone(),
            max_batch_size: config.max_batch_size,
            linger: config.linger,
            ready: VecDeque::new(),
        })
    }

    /// Run one poll cycle: wait for a first payload, keep reading until
    /// the linger window closes or the size cap is hit, then cut the
    /// haul into per-partition batches.
    async fn fill(&mut self) -> Result<(), QueueError> {
        let mut partials: BTreeMap<i32, Partial<R>> = BTreeMap::new();
        let mut total = 0_usize;

        let first = self.consumer.recv().await?;
        accumulate(&mut partials, &first);
        total += 1;

        let linger = tokio::time::sleep(self.linger);
        tokio::pin!(linger);
        while total < self.max_batch_size {
            tokio::select! {
                () = &mut linger => break,
                message = self.consumer.recv() => {
                    accumulate(&mut partials, &message?);
                    total += 1;
                }
            }
        }

        for (partition, partial) in partials {
            self.ready.push_back(SourceBatch {
                records: partial.records,
                skipped_decode: partial.skipped_decode,
                partition,
                offset: partial.offset,
                end_offset: partial.end_offset,
            });
        }
        Ok(())
    }
}

/// Per-partition accumulator for one poll cycle.
struct Partial<R> {
    records: Vec<R>,
    skipped_decode: usize,
    offset: i64,
    end_offset: i64,
}

fn accumulate<R>(partials: &mut BTreeMap<i32, Partial<R>>, message: &BorrowedMessage<'_>)
where
    R: DeserializeOwned,
{
    let partition = message.partition();
    let offset = message.offset();
    let partial = partials.entry(partition).or_insert_with(|| Partial {
        records: Vec::new(),
        skipped_decode: 0,
        offset,
        end_offset: offset,
    });
    partial.end_offset = offset + 1;

    match message.payload() {
        Some(payload) => match serde_json::from_slice::<R>(payload) {
            Ok(record) => partial.records.push(record),
            Err(error) => {
                partial.skipped_decode += 1;
                debug!(partition, offset, %error, "dropping undecodable payload");
            }
        },
        None => {
            partial.skipped_decode += 1;
            debug!(partition, offset, "dropping empty payload");
        }
    }
}

#[async_trait]
impl<R> BatchSource for KafkaBatchSource<R>
where
    R: DeserializeOwned + Send + Sync,
{
    type Record = R;

    async fn next_batch(&mut self) -> Result<SourceBatch<R>, QueueError> {
        loop {
            if let Some(batch) = self.ready.pop_front() {
                return Ok(batch);
            }
            self.fill().await?;
        }
    }

    async fn ack(&mut self, batch: &SourceBatch<R>) -> Result<(), QueueError> {
        let mut positions = TopicPartitionList::new();
        positions.add_partition_offset(
            &self.topic,
            batch.partition,
            Offset::Offset(batch.end_offset),
        )?;

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&positions, CommitMode::Sync))
            .await??;
        debug!(
            partition = batch.partition,
            end_offset = batch.end_offset,
            "committed consumer position"
        );
        Ok(())
    }

    async fn rewind(&mut self, batch: &SourceBatch<R>) -> Result<(), QueueError> {
        let consumer = Arc::clone(&self.consumer);
        let topic = self.topic.clone();
        let (partition, offset) = (batch.partition, batch.offset);

        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
        })
        .await??;
        warn!(partition, offset, "rewound partition for redelivery");
        Ok(())
    }
}

pub mod test_utils {
    /// Get the testing Kafka connection string or return early from the
    /// calling test.
    ///
    /// Tests that invoke this run only when both `TEST_INTEGRATION` and
    /// `KAFKA_CONNECT` are set; anything else skips with a note on
    /// stderr.
    #[macro_export]
    macro_rules! maybe_skip_kafka_integration {
        () => {{
            use std::env;
            dotenvy::dotenv().ok();

            match (
                env::var("TEST_INTEGRATION").is_ok(),
                env::var("KAFKA_CONNECT").ok(),
            ) {
                (true, Some(kafka_connection)) => kafka_connection,
                (true, None) => {
                    panic!(
                        "TEST_INTEGRATION is set which requires running integration tests, but \
                         KAFKA_CONNECT is not set. Please run Kafka and set KAFKA_CONNECT to the \
                         broker address (e.g. localhost:9092)."
                    )
                }
                (false, Some(_)) => {
                    eprintln!("skipping Kafka integration test - set TEST_INTEGRATION to run");
                    return;
                }
                (false, None) => {
                    eprintln!(
                        "skipping Kafka integration test - set TEST_INTEGRATION and KAFKA_CONNECT \
                         to run"
                    );
                    return;
                }
            }
        }};
    }
}
