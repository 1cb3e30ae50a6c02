//! Batched consumption from a partitioned record log.
//!
//! The [`BatchSource`] trait hides the log behind three operations:
//! pull the next batch, acknowledge it (making consumption durable), or
//! rewind so the same batch is delivered again. [`kafka`] provides the
//! production implementation; [`mock`] a scripted in-memory one for
//! driving consumers in tests.

pub mod core;
pub mod kafka;
pub mod mock;

pub use crate::core::{BatchSource, QueueError, SourceBatch};
