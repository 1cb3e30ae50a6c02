//! Best-effort secondary sink for successfully written payloads.

use async_trait::async_trait;
use siphon_types::Destination;
use std::fmt::Debug;

/// Errors from a backup sink, opaque to the pipeline: the writer logs
/// them and moves on.
pub type BackupError = Box<dyn std::error::Error + Send + Sync>;

/// Receives a copy of every payload the writer successfully posted.
///
/// A backup failure never fails ingestion; the destination store, not the
/// backup, is the source of truth.
#[async_trait]
pub trait Backup: Debug + Send + Sync {
    async fn store(&self, payload: &str, destination: &Destination) -> Result<(), BackupError>;
}

/// Discards everything. For deployments without a backup sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackup;

#[async_trait]
impl Backup for NoopBackup {
    async fn store(&self, _payload: &str, _destination: &Destination) -> Result<(), BackupError> {
        Ok(())
    }
}
