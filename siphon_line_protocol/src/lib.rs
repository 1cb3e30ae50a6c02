//! Construction and serialization of InfluxDB line protocol points.
//!
//! A [`Point`] is an immutable measurement name, a sorted set of tags, a
//! sorted set of typed fields, and an optional timestamp. Points are
//! assembled with [`PointBuilder`] and rendered with [`Point::to_line`],
//! which produces one line of
//! [line protocol](https://docs.influxdata.com/influxdb/v1.8/write_protocols/line_protocol_tutorial/):
//!
//! ```text
//! measurement[,tag-key=tag-value...] field-key=field-value[,field2-key=field2-value...] [timestamp]
//! ```
//!
//! Tags and fields serialize in lexical key order regardless of insertion
//! order, so a given point always renders to the same line. Special
//! characters in the measurement, tag keys, tag values, and field keys are
//! backslash-escaped; string field values are double-quoted. Replacing
//! characters that are illegal in *names* is deliberately not done here:
//! that is input canonicalization and belongs to the caller.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use thiserror::Error;

/// Characters that must be escaped in tag keys, tag values, and field keys.
const TAG_DELIMITERS: &[char] = &[',', '=', ' '];

/// Characters that must be escaped in the measurement name.
const MEASUREMENT_DELIMITERS: &[char] = &[',', ' '];

/// Characters that must be escaped inside a double-quoted string field value.
const STRING_VALUE_DELIMITERS: &[char] = &['"'];

/// Errors returned by [`PointBuilder::build`].
#[derive(Debug, Error)]
pub enum Error {
    /// The measurement name was empty.
    #[error("point requires a non-empty measurement name")]
    EmptyMeasurement,

    /// No fields were added; a point must carry at least one field.
    #[error("point '{measurement}' requires at least one field")]
    EmptyFields {
        /// Measurement of the rejected point.
        measurement: String,
    },
}

/// Timestamp resolution understood by the `/write` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl Precision {
    /// The value to pass as the `precision` query parameter on a write.
    pub fn query_param(&self) -> &'static str {
        match self {
            Self::Nanoseconds => "ns",
            Self::Microseconds => "us",
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
        }
    }

    fn nanos_per_unit(&self) -> i128 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000_000_000,
        }
    }

    /// Convert `value` from this precision to `to`, truncating towards zero
    /// when moving to a coarser unit and saturating at the `i64` range when
    /// moving to a finer one.
    pub fn convert(&self, value: i64, to: Self) -> i64 {
        let nanos = value as i128 * self.nanos_per_unit();
        let converted = nanos / to.nanos_per_unit();
        converted.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_param())
    }
}

/// A typed field value.
///
/// Integers carry the `i` suffix on the wire and floats always render with
/// at least one fraction digit (`500.0`, not `500`), so the stored type is
/// recoverable from the serialized form.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl FieldValue {
    fn write_to(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I64(v) => write!(f, "{v}i"),
            // The `{:?}` form is locale-invariant, round-trips the value
            // exactly, and always emits a fraction digit for integral
            // floats, which keeps the serialized type unambiguous.
            Self::F64(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => {
                f.write_char('"')?;
                write_escaped(f, v, STRING_VALUE_DELIMITERS)?;
                f.write_char('"')
            }
        }
    }
}

/// An immutable, validated line protocol point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: Option<Timestamp>,
}

/// A timestamp value together with the precision it is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timestamp {
    value: i64,
    precision: Precision,
}

impl Point {
    /// Start building a point for `measurement`.
    pub fn builder(measurement: impl Into<String>) -> PointBuilder {
        PointBuilder::new(measurement)
    }

    /// The measurement this point belongs to.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Render the point as a single line of line protocol, converting the
    /// timestamp (when present) to `precision`.
    pub fn to_line(&self, precision: Precision) -> String {
        Line {
            point: self,
            precision,
        }
        .to_string()
    }
}

/// Borrowed rendering of a [`Point`] at a caller-chosen output precision.
struct Line<'a> {
    point: &'a Point,
    precision: Precision,
}

impl fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.point.measurement, MEASUREMENT_DELIMITERS)?;

        for (key, value) in &self.point.tags {
            f.write_char(',')?;
            write_escaped(f, key, TAG_DELIMITERS)?;
            f.write_char('=')?;
            write_escaped(f, value, TAG_DELIMITERS)?;
        }

        let mut delimiter = ' ';
        for (key, value) in &self.point.fields {
            f.write_char(delimiter)?;
            write_escaped(f, key, TAG_DELIMITERS)?;
            f.write_char('=')?;
            value.write_to(f)?;
            delimiter = ',';
        }

        if let Some(ts) = self.point.timestamp {
            write!(f, " {}", ts.precision.convert(ts.value, self.precision))?;
        }

        Ok(())
    }
}

/// Write `src` escaping a backslash before every delimiter character and
/// before literal backslashes.
fn write_escaped(f: &mut fmt::Formatter<'_>, src: &str, delimiters: &[char]) -> fmt::Result {
    for ch in src.chars() {
        if ch == '\\' || delimiters.contains(&ch) {
            f.write_char('\\')?;
        }
        f.write_char(ch)?;
    }
    Ok(())
}

/// Incrementally assembles a [`Point`].
///
/// Tags and fields may be added in any order; duplicates overwrite. A tag
/// whose key or value is empty is silently discarded, matching the lenient
/// handling expected of enrichment tags that are frequently absent.
#[derive(Debug)]
pub struct PointBuilder {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: Option<Timestamp>,
}

impl PointBuilder {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Add a tag. Ignored entirely when either the key or the value is
    /// empty; a repeated key keeps the latest value.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        if !key.is_empty() && !value.is_empty() {
            self.tags.insert(key, value);
        }
        self
    }

    /// Add a field. A repeated key keeps the latest value.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the timestamp, expressed in `precision` units.
    pub fn timestamp(mut self, value: i64, precision: Precision) -> Self {
        self.timestamp = Some(Timestamp { value, precision });
        self
    }

    /// Validate and produce the point.
    pub fn build(self) -> Result<Point, Error> {
        if self.measurement.is_empty() {
            return Err(Error::EmptyMeasurement);
        }
        if self.fields.is_empty() {
            return Err(Error::EmptyFields {
                measurement: self.measurement,
            });
        }
        Ok(Point {
            measurement: self.measurement,
            tags: self.tags,
            fields: self.fields,
            timestamp: self.timestamp,
        })
    }
}
