//! Top-level consume loop: pull batches from a [`BatchSource`], run
//! them through the [`BatchProcessor`], and move the source's position
//! to match the outcome.
//!
//! A batch that processes cleanly is acknowledged, junk included: the
//! undecodable and unextractable records it carried are counted and
//! dropped, never retried. A batch that fails is rewound so the whole
//! thing is delivered again. Note that skipping the acknowledgement
//! alone would not retry anything, because the source's in-memory read
//! position has already advanced past the batch.

use crate::{extract::Extract, process::BatchProcessor, write::GroupWriter};
use observability_deps::tracing::{error, info, warn};
use siphon_queue::{BatchSource, SourceBatch};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause after a failed poll before asking the source again.
const POLL_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Drives one record stream through extraction and writing.
#[derive(Debug)]
pub struct Listener<S, E, W> {
    source: S,
    processor: BatchProcessor<E, W>,
    shutdown: CancellationToken,
}

impl<S, E, W> Listener<S, E, W>
where
    S: BatchSource<Record = E::Record>,
    E: Extract,
    W: GroupWriter,
{
    pub fn new(source: S, processor: BatchProcessor<E, W>, shutdown: CancellationToken) -> Self {
        Self {
            source,
            processor,
            shutdown,
        }
    }

    /// Consume until the shutdown token fires. An in-flight batch is
    /// always carried through to its ack or rewind before the loop
    /// stops.
    pub async fn run(mut self) {
        info!("listener started");
        loop {
            let batch = tokio::select! {
                () = self.shutdown.cancelled() => break,
                next = self.source.next_batch() => match next {
                    Ok(batch) => batch,
                    Err(error) => {
                        warn!(%error, "queue poll failed; backing off");
                        tokio::time::sleep(POLL_RETRY_BACKOFF).await;
                        continue;
                    }
                },
            };

            self.dispatch(&batch).await;
        }
        info!("listener stopped");
    }

    async fn dispatch(&mut self, batch: &SourceBatch<E::Record>) {
        match self.processor.process(&batch.records).await {
            Ok(stats) => {
                if batch.skipped_decode > 0 {
                    warn!(
                        skipped = batch.skipped_decode,
                        partition = batch.partition,
                        "dropped payloads that failed to decode"
                    );
                }
                info!(
                    partition = batch.partition,
                    offset = batch.offset,
                    records = stats.records,
                    skipped = stats.skipped,
                    groups = stats.groups,
                    "batch written"
                );
                if let Err(error) = self.source.ack(batch).await {
                    // The records are written; at worst the uncommitted
                    // position redelivers them after a restart.
                    warn!(
                        %error,
                        partition = batch.partition,
                        "failed to commit consumer position"
                    );
                }
            }
            Err(error) => {
                warn!(
                    %error,
                    partition = batch.partition,
                    offset = batch.offset,
                    "batch failed; rewinding for redelivery"
                );
                if let Err(error) = self.source.rewind(batch).await {
                    error!(
                        %error,
                        partition = batch.partition,
                        offset = batch.offset,
                        "rewind failed; unwritten records may be passed over"
                    );
                }
            }
        }
    }
}
