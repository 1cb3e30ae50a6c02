//! Turn one delivered batch of records into grouped line-protocol writes.

use crate::{
    WRITE_PRECISION,
    extract::Extract,
    write::{GroupWriter, WriteError},
};
use observability_deps::tracing::warn;
use siphon_types::RoutingKey;
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

/// Outcome counters for one successfully processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Records delivered in the batch.
    pub records: usize,
    /// Records dropped because extraction rejected them.
    pub skipped: usize,
    /// Routing-key groups written.
    pub groups: usize,
}

/// A batch fails as soon as any of its routing-key groups fails to write.
#[derive(Debug, Error)]
#[error("group '{key}' failed: {source}")]
pub struct BatchError {
    pub key: RoutingKey,
    #[source]
    pub source: WriteError,
}

/// Drives a batch through extraction, grouping, and the writer.
///
/// One processor serves one pipeline; the raw and rollup pipelines are the
/// same processor configured with a different extractor strategy and
/// aggregation-level label.
#[derive(Debug)]
pub struct BatchProcessor<E, W> {
    extractor: E,
    writer: Arc<W>,
    aggregation_level: String,
}

impl<E, W> BatchProcessor<E, W>
where
    E: Extract,
    W: GroupWriter,
{
    pub fn new(extractor: E, writer: Arc<W>, aggregation_level: impl Into<String>) -> Self {
        Self {
            extractor,
            writer,
            aggregation_level: aggregation_level.into(),
        }
    }

    /// Process one delivered batch.
    ///
    /// Records failing extraction are skipped and counted, never fatal. The
    /// surviving lines are grouped by routing key (deterministic key order,
    /// arrival order within a group) and written one group at a time; the
    /// first failing group aborts the batch, leaving later groups unwritten
    /// for the redelivery to pick up. A batch with zero valid records is
    /// vacuously successful — junk must not wedge its partition.
    pub async fn process(&self, records: &[E::Record]) -> Result<BatchStats, BatchError> {
        let mut groups: BTreeMap<RoutingKey, Vec<String>> = BTreeMap::new();
        let mut skipped = 0_usize;

        for record in records {
            match self.extractor.extract(record) {
                Ok(extraction) => groups
                    .entry(extraction.routing_key)
                    .or_default()
                    .push(extraction.point.to_line(WRITE_PRECISION)),
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            // One summary line per batch; a line per record would flood the
            // log on malformed upstream data.
            warn!(
                skipped,
                records = records.len(),
                level = %self.aggregation_level,
                "skipped records that failed extraction"
            );
        }

        for (key, lines) in &groups {
            self.writer
                .write(key, lines, &self.aggregation_level)
                .await
                .map_err(|source| BatchError {
                    key: key.clone(),
                    source,
                })?;
        }

        Ok(BatchStats {
            records: records.len(),
            skipped,
            groups: groups.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{extract::RawExtractor, route::RouteError};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use siphon_types::RawMetric;
    use std::collections::HashSet;

    /// Scripted group writer: fails configured tenants, records the rest.
    #[derive(Debug, Default)]
    struct ScriptedGroupWriter {
        fail_tenants: HashSet<String>,
        written: Mutex<Vec<(RoutingKey, Vec<String>, String)>>,
    }

    impl ScriptedGroupWriter {
        fn failing(tenants: impl IntoIterator<Item = &'static str>) -> Self {
            Self {
                fail_tenants: tenants.into_iter().map(str::to_owned).collect(),
                written: Mutex::new(Vec::new()),
            }
        }

        fn written(&self) -> Vec<(RoutingKey, Vec<String>, String)> {
            self.written.lock().clone()
        }
    }

    #[async_trait]
    impl GroupWriter for ScriptedGroupWriter {
        async fn write(
            &self,
            key: &RoutingKey,
            lines: &[String],
            aggregation_level: &str,
        ) -> Result<(), WriteError> {
            if self.fail_tenants.contains(&key.tenant_id) {
                return Err(WriteError::Route(RouteError::NotFound {
                    tenant_id: key.tenant_id.clone(),
                    level: aggregation_level.to_owned(),
                }));
            }
            self.written.lock().push((
                key.clone(),
                lines.to_vec(),
                aggregation_level.to_owned(),
            ));
            Ok(())
        }
    }

    fn record(account: &str, metric: &str, value: f64) -> RawMetric {
        serde_json::from_value(serde_json::json!({
            "accountType": "CORE",
            "account": account,
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "timestamp": "2019-05-13T00:00:00Z",
            "fvalues": { metric: value }
        }))
        .unwrap()
    }

    fn invalid_record() -> RawMetric {
        serde_json::from_value(serde_json::json!({
            "accountType": "CORE",
            "account": "1",
            "monitoringSystem": "MAAS",
            "timestamp": "2019-05-13T00:00:00Z",
            "fvalues": { "rx": 1.0 }
        }))
        .unwrap()
    }

    fn processor(
        writer: Arc<ScriptedGroupWriter>,
    ) -> BatchProcessor<RawExtractor, ScriptedGroupWriter> {
        BatchProcessor::new(RawExtractor, writer, "full")
    }

    #[tokio::test]
    async fn records_group_by_routing_key_in_arrival_order() {
        let writer = Arc::new(ScriptedGroupWriter::default());
        let records = vec![
            record("1", "rx", 1.0),
            record("2", "rx", 9.0),
            record("1", "rx", 2.0),
        ];

        let stats = processor(Arc::clone(&writer))
            .process(&records)
            .await
            .unwrap();

        assert_eq!(
            stats,
            BatchStats {
                records: 3,
                skipped: 0,
                groups: 2
            }
        );
        let written = writer.written();
        assert_eq!(written.len(), 2);
        // Group order follows routing-key order; lines keep arrival order.
        assert_eq!(written[0].0, RoutingKey::new("CORE-1", "MAAS_net"));
        assert_eq!(
            written[0].1,
            vec![
                "MAAS_net,rx_unit=unavailable rx=1.0 1557705600".to_owned(),
                "MAAS_net,rx_unit=unavailable rx=2.0 1557705600".to_owned(),
            ]
        );
        assert_eq!(written[1].0, RoutingKey::new("CORE-2", "MAAS_net"));
        assert_eq!(written[0].2, "full");
    }

    #[tokio::test]
    async fn invalid_records_are_counted_and_siblings_still_write() {
        let writer = Arc::new(ScriptedGroupWriter::default());
        let records = vec![record("1", "rx", 1.0), invalid_record(), record("1", "rx", 2.0)];

        let stats = processor(Arc::clone(&writer))
            .process(&records)
            .await
            .unwrap();

        assert_eq!(
            stats,
            BatchStats {
                records: 3,
                skipped: 1,
                groups: 1
            }
        );
        assert_eq!(writer.written()[0].1.len(), 2);
    }

    #[tokio::test]
    async fn first_group_failure_short_circuits_the_rest() {
        // Keys iterate deterministically: CORE-1, CORE-2, CORE-3. CORE-2
        // fails; CORE-3 must never be attempted.
        let writer = Arc::new(ScriptedGroupWriter::failing(["CORE-2"]));
        let records = vec![
            record("3", "rx", 3.0),
            record("1", "rx", 1.0),
            record("2", "rx", 2.0),
        ];

        let result = processor(Arc::clone(&writer)).process(&records).await;

        assert_matches!(result, Err(BatchError { key, source: WriteError::Route(_) }) => {
            assert_eq!(key, RoutingKey::new("CORE-2", "MAAS_net"));
        });
        let written = writer.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, RoutingKey::new("CORE-1", "MAAS_net"));
    }

    #[tokio::test]
    async fn batch_of_only_invalid_records_is_vacuously_successful() {
        let writer = Arc::new(ScriptedGroupWriter::default());
        let records = vec![invalid_record(), invalid_record()];

        let stats = processor(Arc::clone(&writer))
            .process(&records)
            .await
            .unwrap();

        assert_eq!(
            stats,
            BatchStats {
                records: 2,
                skipped: 2,
                groups: 0
            }
        );
        assert!(writer.written().is_empty());
    }

    #[tokio::test]
    async fn aggregation_level_reaches_the_writer() {
        let writer = Arc::new(ScriptedGroupWriter::default());
        let records = vec![record("1", "rx", 1.0)];

        BatchProcessor::new(RawExtractor, Arc::clone(&writer), "5m")
            .process(&records)
            .await
            .unwrap();

        assert_eq!(writer.written()[0].2, "5m");
    }
}
