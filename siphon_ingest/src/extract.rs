//! Dimension extraction: turn one typed metric record into a line-protocol
//! point plus the routing key that decides which destination receives it.
//!
//! Extraction is strict where routing is concerned and lenient everywhere
//! else. The four identity fields and the record's timing must be present
//! and well formed or the record is rejected (and later counted by the
//! batch processor); every enrichment tag is optional and silently skipped
//! when absent.

use crate::WRITE_PRECISION;
use siphon_line_protocol::{Point, PointBuilder};
use siphon_types::{
    METADATA_ACCOUNT_ID, METADATA_ENTITY_ID, METADATA_MONITORING_SYSTEM,
    METADATA_MONITORING_ZONE, MetricSource, RawMetric, RollupMetric, RoutingKey,
};
use std::time::UNIX_EPOCH;
use thiserror::Error;

/// Canonical tag names, lowercased per the destination schema convention.
const TAG_SYSTEM_ACCOUNT_ID: &str = "systemaccountid";
const TAG_TARGET: &str = "target";
const TAG_MONITORING_SYSTEM: &str = "monitoringsystem";
const TAG_COLLECTION_LABEL: &str = "collectionlabel";
const TAG_ENTITY_SYSTEM_ID: &str = "entitysystemid";
const TAG_DEVICE_LABEL: &str = "devicelabel";
const TAG_MONITORING_ZONE: &str = "monitoringzone";

/// Suffix of the companion tag carrying a field's unit.
const UNIT_TAG_SUFFIX: &str = "_unit";

/// Unit tag value when the units map has no usable entry for a metric.
const UNIT_UNAVAILABLE: &str = "unavailable";

/// Characters replaced with `_` in metric field names. Dots are legal in
/// line protocol but ambiguous in downstream query languages, so they are
/// normalized away along with the protocol delimiters.
const FIELD_NAME_REPLACED: &[char] = &['.', ',', '=', ' '];

/// Characters replaced with `_` in measurement name components. Dots stay:
/// `agent.filesystem` is a meaningful collection name.
const MEASUREMENT_REPLACED: &[char] = &[',', ' '];

/// A record that could not be converted. Always scoped to the single
/// record; the surrounding batch continues.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A field required for routing or timing was missing, blank,
    /// whitespace-ridden, or unparseable.
    #[error("record field '{field}' is missing or invalid")]
    InvalidField { field: &'static str },

    /// The record survived validation but produced no valid point, e.g.
    /// it carried no metric values at all.
    #[error("record produced no valid point: {0}")]
    Point(#[from] siphon_line_protocol::Error),
}

/// Successful extraction of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub routing_key: RoutingKey,
    pub point: Point,
}

/// Strategy turning one concrete record shape into an [`Extraction`].
///
/// The raw and rollup pipelines are the same machinery configured with a
/// different implementation of this trait.
pub trait Extract: std::fmt::Debug + Send + Sync {
    type Record: Send + Sync;

    fn extract(&self, record: &Self::Record) -> Result<Extraction, ExtractError>;
}

/// Extracts single-observation records: one field per metric value.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawExtractor;

impl Extract for RawExtractor {
    type Record = RawMetric;

    fn extract(&self, record: &RawMetric) -> Result<Extraction, ExtractError> {
        let routing_key = routing_key(record)?;
        let timestamp = parse_epoch_seconds(record.timestamp.as_deref(), "timestamp")?;

        let mut builder = dimension_tags(Point::builder(routing_key.measurement.clone()), record);
        for (metric, value) in &record.ivalues {
            builder = metric_field(builder, record, metric, *value as f64);
        }
        for (metric, value) in &record.fvalues {
            builder = metric_field(builder, record, metric, *value);
        }

        let point = builder.timestamp(timestamp, WRITE_PRECISION).build()?;
        Ok(Extraction { routing_key, point })
    }
}

/// Extracts windowed aggregate records: `_min`/`_mean`/`_max` fields per
/// metric plus the window bounds, stamped at the window start.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollupExtractor;

impl Extract for RollupExtractor {
    type Record = RollupMetric;

    fn extract(&self, record: &RollupMetric) -> Result<Extraction, ExtractError> {
        let routing_key = routing_key(record)?;
        let start = parse_epoch_seconds(record.start.as_deref(), "start")?;
        let end = parse_epoch_seconds(record.end.as_deref(), "end")?;

        let mut builder = dimension_tags(Point::builder(routing_key.measurement.clone()), record)
            .field("start", start as f64)
            .field("end", end as f64);
        for (metric, rollup) in &record.ivalues {
            builder = rollup_fields(
                builder,
                record,
                metric,
                rollup.min as f64,
                rollup.mean,
                rollup.max as f64,
            );
        }
        for (metric, rollup) in &record.fvalues {
            builder = rollup_fields(builder, record, metric, rollup.min, rollup.mean, rollup.max);
        }

        let point = builder.timestamp(start, WRITE_PRECISION).build()?;
        Ok(Extraction { routing_key, point })
    }
}

/// Derive the routing key, validating the four identity fields.
fn routing_key<R: MetricSource>(record: &R) -> Result<RoutingKey, ExtractError> {
    let account_type = require("accountType", record.account_type())?;
    let account = require("account", record.account())?;
    let monitoring_system = require("monitoringSystem", record.monitoring_system())?;
    let collection_name = require("collectionName", record.collection_name())?;

    Ok(RoutingKey::new(
        format!("{account_type}-{account}"),
        format!(
            "{}_{}",
            monitoring_system.replace(MEASUREMENT_REPLACED, "_"),
            collection_name.replace(MEASUREMENT_REPLACED, "_"),
        ),
    ))
}

/// Identity fields must be non-empty and contain no whitespace; they feed
/// the tenant id and measurement verbatim.
fn require<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ExtractError> {
    if value.is_empty() || value.contains(char::is_whitespace) {
        return Err(ExtractError::InvalidField { field });
    }
    Ok(value)
}

/// Parse an RFC 3339 instant (`2019-05-13T00:00:00Z`) to epoch seconds.
fn parse_epoch_seconds(value: Option<&str>, field: &'static str) -> Result<i64, ExtractError> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ExtractError::InvalidField { field })?;
    let instant =
        humantime::parse_rfc3339(raw).map_err(|_| ExtractError::InvalidField { field })?;
    let since_epoch = instant
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ExtractError::InvalidField { field })?;
    i64::try_from(since_epoch.as_secs()).map_err(|_| ExtractError::InvalidField { field })
}

/// Attach the canonical dimension tags. Every source is optional; blank or
/// absent values are dropped by the builder.
///
/// The `monitoringsystem` tag reads from enrichment metadata rather than
/// the record's routing field of the same name: the routing field already
/// prefixes the measurement.
fn dimension_tags<R: MetricSource>(builder: PointBuilder, record: &R) -> PointBuilder {
    let metadata = record.system_metadata();
    let meta = |key: &str| metadata.get(key).map(|v| v.trim()).unwrap_or_default();

    builder
        .tag(TAG_SYSTEM_ACCOUNT_ID, meta(METADATA_ACCOUNT_ID))
        .tag(TAG_TARGET, record.collection_target().unwrap_or_default().trim())
        .tag(TAG_MONITORING_SYSTEM, meta(METADATA_MONITORING_SYSTEM))
        .tag(
            TAG_COLLECTION_LABEL,
            record.collection_label().unwrap_or_default().trim(),
        )
        .tag(TAG_ENTITY_SYSTEM_ID, meta(METADATA_ENTITY_ID))
        .tag(TAG_DEVICE_LABEL, record.device_label().unwrap_or_default().trim())
        .tag(TAG_MONITORING_ZONE, meta(METADATA_MONITORING_ZONE))
}

/// Add one metric as a field plus its `{name}_unit` companion tag. All
/// numeric values arrive here already promoted to `f64`; the destination
/// schema carries a single numeric field type.
fn metric_field<R: MetricSource>(
    builder: PointBuilder,
    record: &R,
    metric: &str,
    value: f64,
) -> PointBuilder {
    let name = metric.replace(FIELD_NAME_REPLACED, "_");
    let unit_tag = format!("{name}{UNIT_TAG_SUFFIX}");
    builder.tag(unit_tag, unit_for(record, metric)).field(name, value)
}

/// Add one rolled-up metric: three aggregate fields sharing a single unit
/// companion tag keyed by the base name.
fn rollup_fields<R: MetricSource>(
    builder: PointBuilder,
    record: &R,
    metric: &str,
    min: f64,
    mean: f64,
    max: f64,
) -> PointBuilder {
    let name = metric.replace(FIELD_NAME_REPLACED, "_");
    let unit_tag = format!("{name}{UNIT_TAG_SUFFIX}");
    builder
        .tag(unit_tag, unit_for(record, metric))
        .field(format!("{name}_min"), min)
        .field(format!("{name}_mean"), mean)
        .field(format!("{name}_max"), max)
}

/// The unit recorded for `metric`, or the `unavailable` sentinel. Units are
/// looked up by the metric's wire name, before field-name normalization.
fn unit_for<'a, R: MetricSource>(record: &'a R, metric: &str) -> &'a str {
    record
        .units()
        .get(metric)
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .unwrap_or(UNIT_UNAVAILABLE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn raw_record(payload: serde_json::Value) -> RawMetric {
        serde_json::from_value(payload).unwrap()
    }

    fn rollup_record(payload: serde_json::Value) -> RollupMetric {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn raw_record_end_to_end() {
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "1234567",
            "monitoringSystem": "MAAS",
            "collectionName": "agent.filesystem",
            "timestamp": "2019-05-13T00:00:00Z",
            "ivalues": { "filesystem.used": 500 },
            "units": { "filesystem.used": "KILOBYTES" }
        }));

        let extraction = RawExtractor.extract(&record).unwrap();

        assert_eq!(extraction.routing_key.tenant_id, "CORE-1234567");
        assert_eq!(extraction.routing_key.measurement, "MAAS_agent.filesystem");
        assert_eq!(
            extraction.point.to_line(WRITE_PRECISION),
            "MAAS_agent.filesystem,filesystem_used_unit=KILOBYTES \
             filesystem_used=500.0 1557705600"
        );
    }

    #[test]
    fn all_dimension_tags_are_emitted_and_trimmed() {
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "timestamp": "2019-05-13T00:00:00Z",
            "systemMetadata": {
                "accountId": " ac-1 ",
                "entityId": "en-1",
                "monitoringZone": "mzord",
                "monitoringSystem": "MAAS"
            },
            "collectionTarget": " 10.0.0.1 ",
            "collectionLabel": "uplink",
            "deviceLabel": "edge-router",
            "fvalues": { "rx": 1.5 }
        }));

        let line = RawExtractor
            .extract(&record)
            .unwrap()
            .point
            .to_line(WRITE_PRECISION);

        assert_eq!(
            line,
            "MAAS_net,collectionlabel=uplink,devicelabel=edge-router,\
             entitysystemid=en-1,monitoringsystem=MAAS,monitoringzone=mzord,\
             rx_unit=unavailable,systemaccountid=ac-1,target=10.0.0.1 \
             rx=1.5 1557705600"
        );
    }

    #[test]
    fn monitoringsystem_tag_comes_from_metadata_only() {
        // The routing field is mandatory and prefixes the measurement; the
        // tag appears only when enrichment metadata repeats it.
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "timestamp": "2019-05-13T00:00:00Z",
            "fvalues": { "rx": 1.5 }
        }));

        let line = RawExtractor
            .extract(&record)
            .unwrap()
            .point
            .to_line(WRITE_PRECISION);

        assert!(!line.contains("monitoringsystem="), "line: {line}");
    }

    #[test]
    fn missing_collection_name_fails_the_record() {
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "timestamp": "2019-05-13T00:00:00Z",
            "fvalues": { "rx": 1.5 }
        }));

        assert_matches!(
            RawExtractor.extract(&record),
            Err(ExtractError::InvalidField { field: "collectionName" })
        );
    }

    #[test]
    fn whitespace_in_account_fails_the_record() {
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "12 34",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "timestamp": "2019-05-13T00:00:00Z",
            "fvalues": { "rx": 1.5 }
        }));

        assert_matches!(
            RawExtractor.extract(&record),
            Err(ExtractError::InvalidField { field: "account" })
        );
    }

    #[test]
    fn unparseable_timestamp_fails_the_record() {
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "timestamp": "last tuesday",
            "fvalues": { "rx": 1.5 }
        }));

        assert_matches!(
            RawExtractor.extract(&record),
            Err(ExtractError::InvalidField { field: "timestamp" })
        );
    }

    #[test]
    fn missing_timestamp_fails_the_record() {
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "fvalues": { "rx": 1.5 }
        }));

        assert_matches!(
            RawExtractor.extract(&record),
            Err(ExtractError::InvalidField { field: "timestamp" })
        );
    }

    #[test]
    fn record_without_values_fails_point_validation() {
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "timestamp": "2019-05-13T00:00:00Z"
        }));

        assert_matches!(
            RawExtractor.extract(&record),
            Err(ExtractError::Point(siphon_line_protocol::Error::EmptyFields { .. }))
        );
    }

    #[test]
    fn field_names_are_normalized() {
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "timestamp": "2019-05-13T00:00:00Z",
            "fvalues": { "disk used,now=yes": 1.0 }
        }));

        let line = RawExtractor
            .extract(&record)
            .unwrap()
            .point
            .to_line(WRITE_PRECISION);

        assert_eq!(
            line,
            "MAAS_net,disk_used_now_yes_unit=unavailable disk_used_now_yes=1.0 1557705600"
        );
    }

    #[test]
    fn integer_values_are_promoted_to_double() {
        let record = raw_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "timestamp": "2019-05-13T00:00:00Z",
            "ivalues": { "rx": 3 }
        }));

        let line = RawExtractor
            .extract(&record)
            .unwrap()
            .point
            .to_line(WRITE_PRECISION);

        assert!(line.contains("rx=3.0"), "line: {line}");
        assert!(!line.contains("3i"), "line: {line}");
    }

    #[test]
    fn rollup_record_emits_aggregates_and_window_bounds() {
        let record = rollup_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "agent.load",
            "start": "2019-05-13T00:00:00Z",
            "end": "2019-05-13T00:05:00Z",
            "fvalues": { "load.1m": { "min": 0.5, "mean": 1.25, "max": 3.0 } },
            "units": { "load.1m": "COUNT" }
        }));

        let extraction = RollupExtractor.extract(&record).unwrap();

        assert_eq!(extraction.routing_key.tenant_id, "CORE-42");
        assert_eq!(
            extraction.point.to_line(WRITE_PRECISION),
            "MAAS_agent.load,load_1m_unit=COUNT \
             end=1557705900.0,load_1m_max=3.0,load_1m_mean=1.25,load_1m_min=0.5,\
             start=1557705600.0 1557705600"
        );
    }

    #[test]
    fn rollup_integer_aggregates_are_promoted() {
        let record = rollup_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "start": "2019-05-13T00:00:00Z",
            "end": "2019-05-13T00:05:00Z",
            "ivalues": { "rx": { "min": 1, "mean": 2.5, "max": 4 } }
        }));

        let line = RollupExtractor
            .extract(&record)
            .unwrap()
            .point
            .to_line(WRITE_PRECISION);

        assert!(line.contains("rx_min=1.0"), "line: {line}");
        assert!(line.contains("rx_mean=2.5"), "line: {line}");
        assert!(line.contains("rx_max=4.0"), "line: {line}");
    }

    #[test]
    fn rollup_missing_window_bound_fails_the_record() {
        let record = rollup_record(json!({
            "accountType": "CORE",
            "account": "42",
            "monitoringSystem": "MAAS",
            "collectionName": "net",
            "start": "2019-05-13T00:00:00Z",
            "ivalues": { "rx": { "min": 1, "mean": 2.5, "max": 4 } }
        }));

        assert_matches!(
            RollupExtractor.extract(&record),
            Err(ExtractError::InvalidField { field: "end" })
        );
    }
}
