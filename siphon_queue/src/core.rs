use async_trait::async_trait;
use std::fmt::Debug;

/// Opaque error raised by a [`BatchSource`] implementation.
pub type QueueError = Box<dyn std::error::Error + Send + Sync>;

/// A contiguous run of payloads pulled from one partition.
///
/// `records` holds the payloads that decoded; `skipped_decode` counts
/// the ones in the same offset range that did not. Skipped payloads
/// still advance `end_offset`, so acknowledging the batch commits past
/// them and they are never redelivered.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBatch<R> {
    /// Decoded records, in partition order.
    pub records: Vec<R>,
    /// Payloads dropped because they failed to decode.
    pub skipped_decode: usize,
    /// Partition the batch was read from.
    pub partition: i32,
    /// Offset of the first payload in the batch.
    pub offset: i64,
    /// Position to commit once the batch is durable: one past the last
    /// consumed offset.
    pub end_offset: i64,
}

impl<R> SourceBatch<R> {
    /// `true` when the batch carries no decodable records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Source of record batches with explicit position management.
///
/// The consumer's in-memory read position advances as soon as a batch
/// is handed out, so a caller that fails to process one cannot simply
/// skip the commit: it must [`rewind`](Self::rewind) to the batch's
/// first offset to see the records again.
#[async_trait]
pub trait BatchSource: Debug + Send {
    type Record;

    /// Wait for the next batch. Blocks until at least one payload is
    /// available.
    async fn next_batch(&mut self) -> Result<SourceBatch<Self::Record>, QueueError>;

    /// Durably record that `batch` has been consumed.
    async fn ack(&mut self, batch: &SourceBatch<Self::Record>) -> Result<(), QueueError>;

    /// Walk the read position back to the start of `batch` so its
    /// records are delivered again.
    async fn rewind(&mut self, batch: &SourceBatch<Self::Record>) -> Result<(), QueueError>;
}
