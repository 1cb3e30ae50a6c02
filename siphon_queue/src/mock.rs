//! Scripted in-memory [`BatchSource`] for driving consumers in tests.

use crate::core::{BatchSource, QueueError, SourceBatch};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::VecDeque, fmt::Debug, sync::Arc};

#[derive(Debug)]
struct State<R> {
    results: VecDeque<Result<SourceBatch<R>, QueueError>>,
    ack_ret: VecDeque<Result<(), QueueError>>,
    rewind_ret: VecDeque<Result<(), QueueError>>,
    acked: Vec<(i32, i64)>,
    rewound: Vec<(i32, i64)>,
}

/// Yields a scripted sequence of poll results and then blocks forever,
/// recording every position operation for later inspection.
///
/// Wrap it in an [`Arc`] to use it as a [`BatchSource`]; the test keeps
/// one handle for assertions while the consumer owns the other.
#[derive(Debug)]
pub struct MockBatchSource<R> {
    state: Mutex<State<R>>,
}

impl<R> MockBatchSource<R> {
    /// Source that yields `batches` in order.
    pub fn with_batches(batches: impl IntoIterator<Item = SourceBatch<R>>) -> Self {
        Self::with_results(batches.into_iter().map(Ok).collect::<Vec<_>>())
    }

    /// Source that yields the given poll results in order, errors
    /// included.
    pub fn with_results(results: impl Into<VecDeque<Result<SourceBatch<R>, QueueError>>>) -> Self {
        Self {
            state: Mutex::new(State {
                results: results.into(),
                ack_ret: VecDeque::new(),
                rewind_ret: VecDeque::new(),
                acked: Vec::new(),
                rewound: Vec::new(),
            }),
        }
    }

    /// Script the outcomes of upcoming `ack` calls; unscripted calls
    /// succeed.
    pub fn with_ack_results(self, ret: impl Into<VecDeque<Result<(), QueueError>>>) -> Self {
        self.state.lock().ack_ret = ret.into();
        self
    }

    /// Script the outcomes of upcoming `rewind` calls; unscripted calls
    /// succeed.
    pub fn with_rewind_results(self, ret: impl Into<VecDeque<Result<(), QueueError>>>) -> Self {
        self.state.lock().rewind_ret = ret.into();
        self
    }

    /// `(partition, end_offset)` of every acknowledged batch, in order.
    pub fn acked(&self) -> Vec<(i32, i64)> {
        self.state.lock().acked.clone()
    }

    /// `(partition, offset)` of every rewound batch, in order.
    pub fn rewound(&self) -> Vec<(i32, i64)> {
        self.state.lock().rewound.clone()
    }
}

#[async_trait]
impl<R> BatchSource for Arc<MockBatchSource<R>>
where
    R: Debug + Send + Sync,
{
    type Record = R;

    async fn next_batch(&mut self) -> Result<SourceBatch<R>, QueueError> {
        let next = self.state.lock().results.pop_front();
        match next {
            Some(result) => result,
            // Script exhausted: behave like an idle topic.
            None => std::future::pending().await,
        }
    }

    async fn ack(&mut self, batch: &SourceBatch<R>) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.acked.push((batch.partition, batch.end_offset));
        state.ack_ret.pop_front().unwrap_or(Ok(()))
    }

    async fn rewind(&mut self, batch: &SourceBatch<R>) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.rewound.push((batch.partition, batch.offset));
        state.rewind_ret.pop_front().unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn batch(records: Vec<&'static str>, offset: i64) -> SourceBatch<&'static str> {
        let end_offset = offset + records.len() as i64;
        SourceBatch {
            records,
            skipped_decode: 0,
            partition: 0,
            offset,
            end_offset,
        }
    }

    #[tokio::test]
    async fn scripted_batches_pop_in_order() {
        let mock = Arc::new(MockBatchSource::with_batches([
            batch(vec!["a"], 0),
            batch(vec!["b", "c"], 1),
        ]));
        let mut source = Arc::clone(&mock);

        assert_eq!(source.next_batch().await.unwrap().records, vec!["a"]);
        assert_eq!(source.next_batch().await.unwrap().records, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn position_operations_are_recorded() {
        let mock = Arc::new(
            MockBatchSource::with_batches([batch(vec!["a", "b"], 5)])
                .with_ack_results([Err::<(), QueueError>("commit refused".into())]),
        );
        let mut source = Arc::clone(&mock);

        let delivered = source.next_batch().await.unwrap();
        source
            .ack(&delivered)
            .await
            .expect_err("scripted ack failure");
        source.rewind(&delivered).await.unwrap();

        assert_eq!(mock.acked(), vec![(0, 7)]);
        assert_eq!(mock.rewound(), vec![(0, 5)]);
    }
}
