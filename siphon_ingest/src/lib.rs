//! Core ingestion pipeline.
//!
//! A batch of typed metric records moves through this crate in three
//! stages:
//!
//! 1. [`extract`]: each record is validated and converted into a
//!    line-protocol [`Point`](siphon_line_protocol::Point) plus the
//!    [`RoutingKey`](siphon_types::RoutingKey) that decides where it goes.
//! 2. [`process`]: serialized lines are grouped by routing key and each
//!    group is handed to the writer; the first failing group fails the
//!    batch.
//! 3. [`write`]: a group is resolved to a concrete destination, its schema
//!    is ensured, and the newline-joined payload is posted with bounded
//!    retries.
//!
//! [`listen`] adapts the pipeline to a [`siphon_queue::BatchSource`],
//! committing the consumer position only for batches that were written.

pub mod backup;
pub mod extract;
pub mod listen;
pub mod process;
pub mod route;
pub mod schema;
pub mod write;

use siphon_line_protocol::Precision;

/// Timestamp precision carried end to end: points serialize second
/// timestamps and the write endpoint is told `precision=s` to match.
pub const WRITE_PRECISION: Precision = Precision::Seconds;
