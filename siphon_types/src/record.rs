//! Typed metric records as they arrive off the partitioned log.
//!
//! Deserialization is deliberately lenient: every field is defaulted so a
//! sparse payload still decodes. Semantic validation (non-empty identity
//! fields, required timestamps) happens during dimension extraction, where
//! a bad record can be skipped and counted without poisoning its batch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key under which the tenant's system account id is carried in
/// [`MetricSource::system_metadata`].
pub const METADATA_ACCOUNT_ID: &str = "accountId";

/// Key under which the originating entity id is carried in
/// [`MetricSource::system_metadata`].
pub const METADATA_ENTITY_ID: &str = "entityId";

/// Key under which the monitoring zone is carried in
/// [`MetricSource::system_metadata`].
pub const METADATA_MONITORING_ZONE: &str = "monitoringZone";

/// Key under which upstream enrichment repeats the monitoring system in
/// [`MetricSource::system_metadata`]. Distinct from the record's own
/// `monitoring_system` routing field, which names the measurement instead.
pub const METADATA_MONITORING_SYSTEM: &str = "monitoringSystem";

/// A single observation: one or more metric values taken at one instant for
/// one monitored entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMetric {
    /// Tenant account class, e.g. `CORE`.
    pub account_type: String,
    /// Tenant account identifier.
    pub account: String,
    /// System that produced the observation, e.g. `MAAS`.
    pub monitoring_system: String,
    /// Name of the collection (check) the values belong to.
    pub collection_name: String,
    /// Instant the observation was taken, RFC 3339 (`2019-05-13T00:00:00Z`).
    pub timestamp: Option<String>,
    /// Enrichment metadata added upstream; see the `METADATA_*` keys.
    pub system_metadata: HashMap<String, String>,
    /// What the collection was aimed at (an IP, a URL, ...).
    pub collection_target: Option<String>,
    /// Operator-facing label of the collection.
    pub collection_label: Option<String>,
    /// Operator-facing label of the monitored device, when any.
    pub device_label: Option<String>,
    /// Unit of each metric, keyed by metric name.
    pub units: HashMap<String, String>,
    /// Integer-valued metrics.
    pub ivalues: HashMap<String, i64>,
    /// Float-valued metrics.
    pub fvalues: HashMap<String, f64>,
}

/// Aggregates of one metric over a rollup window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rollup<T> {
    pub min: T,
    pub mean: f64,
    pub max: T,
}

/// Windowed aggregates of the metrics of one collection: min/mean/max per
/// metric over `[start, end)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RollupMetric {
    /// Tenant account class, e.g. `CORE`.
    pub account_type: String,
    /// Tenant account identifier.
    pub account: String,
    /// System that produced the observations, e.g. `MAAS`.
    pub monitoring_system: String,
    /// Name of the collection (check) the values belong to.
    pub collection_name: String,
    /// Inclusive start of the aggregation window, RFC 3339.
    pub start: Option<String>,
    /// Exclusive end of the aggregation window, RFC 3339.
    pub end: Option<String>,
    /// Enrichment metadata added upstream; see the `METADATA_*` keys.
    pub system_metadata: HashMap<String, String>,
    /// What the collection was aimed at (an IP, a URL, ...).
    pub collection_target: Option<String>,
    /// Operator-facing label of the collection.
    pub collection_label: Option<String>,
    /// Operator-facing label of the monitored device, when any.
    pub device_label: Option<String>,
    /// Unit of each metric, keyed by metric name.
    pub units: HashMap<String, String>,
    /// Aggregates of integer-valued metrics.
    pub ivalues: HashMap<String, Rollup<i64>>,
    /// Aggregates of float-valued metrics.
    pub fvalues: HashMap<String, Rollup<f64>>,
}

/// Narrow read surface shared by the raw and rollup record shapes.
///
/// Only the identity and enrichment surface is common; the value maps stay
/// on the concrete types because extraction strategies are typed per record
/// shape.
pub trait MetricSource {
    fn account_type(&self) -> &str;
    fn account(&self) -> &str;
    fn monitoring_system(&self) -> &str;
    fn collection_name(&self) -> &str;
    fn system_metadata(&self) -> &HashMap<String, String>;
    fn units(&self) -> &HashMap<String, String>;
    fn collection_target(&self) -> Option<&str>;
    fn collection_label(&self) -> Option<&str>;
    fn device_label(&self) -> Option<&str>;
}

impl MetricSource for RawMetric {
    fn account_type(&self) -> &str {
        &self.account_type
    }

    fn account(&self) -> &str {
        &self.account
    }

    fn monitoring_system(&self) -> &str {
        &self.monitoring_system
    }

    fn collection_name(&self) -> &str {
        &self.collection_name
    }

    fn system_metadata(&self) -> &HashMap<String, String> {
        &self.system_metadata
    }

    fn units(&self) -> &HashMap<String, String> {
        &self.units
    }

    fn collection_target(&self) -> Option<&str> {
        self.collection_target.as_deref()
    }

    fn collection_label(&self) -> Option<&str> {
        self.collection_label.as_deref()
    }

    fn device_label(&self) -> Option<&str> {
        self.device_label.as_deref()
    }
}

impl MetricSource for RollupMetric {
    fn account_type(&self) -> &str {
        &self.account_type
    }

    fn account(&self) -> &str {
        &self.account
    }

    fn monitoring_system(&self) -> &str {
        &self.monitoring_system
    }

    fn collection_name(&self) -> &str {
        &self.collection_name
    }

    fn system_metadata(&self) -> &HashMap<String, String> {
        &self.system_metadata
    }

    fn units(&self) -> &HashMap<String, String> {
        &self.units
    }

    fn collection_target(&self) -> Option<&str> {
        self.collection_target.as_deref()
    }

    fn collection_label(&self) -> Option<&str> {
        self.collection_label.as_deref()
    }

    fn device_label(&self) -> Option<&str> {
        self.device_label.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn raw_metric_decodes_camel_case_wire_names() {
        let payload = serde_json::json!({
            "accountType": "CORE",
            "account": "1234567",
            "monitoringSystem": "MAAS",
            "collectionName": "agent.filesystem",
            "timestamp": "2019-05-13T00:00:00Z",
            "systemMetadata": { "accountId": "ac1", "entityId": "en1" },
            "collectionTarget": "10.0.0.1",
            "units": { "filesystem.used": "KILOBYTES" },
            "ivalues": { "filesystem.used": 500 }
        });

        let record: RawMetric = serde_json::from_value(payload).unwrap();

        assert_eq!(record.account_type, "CORE");
        assert_eq!(record.monitoring_system, "MAAS");
        assert_eq!(record.timestamp.as_deref(), Some("2019-05-13T00:00:00Z"));
        assert_eq!(
            record.system_metadata.get(METADATA_ACCOUNT_ID),
            Some(&"ac1".to_string())
        );
        assert_eq!(record.ivalues["filesystem.used"], 500);
        assert_eq!(record.units["filesystem.used"], "KILOBYTES");
        assert!(record.fvalues.is_empty());
    }

    #[test]
    fn sparse_payload_decodes_with_defaults() {
        let record: RawMetric = serde_json::from_str("{}").unwrap();

        assert_eq!(record.account, "");
        assert_eq!(record.timestamp, None);
        assert!(record.ivalues.is_empty());
    }

    #[test]
    fn rollup_metric_decodes_aggregate_maps() {
        let payload = serde_json::json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "agent.load",
            "start": "2019-05-13T00:00:00Z",
            "end": "2019-05-13T00:05:00Z",
            "fvalues": {
                "load.1m": { "min": 0.5, "mean": 1.25, "max": 3.0 }
            }
        });

        let record: RollupMetric = serde_json::from_value(payload).unwrap();

        assert_eq!(record.start.as_deref(), Some("2019-05-13T00:00:00Z"));
        assert_eq!(record.end.as_deref(), Some("2019-05-13T00:05:00Z"));
        let agg = record.fvalues["load.1m"];
        assert_eq!(agg.min, 0.5);
        assert_eq!(agg.mean, 1.25);
        assert_eq!(agg.max, 3.0);
    }
}
