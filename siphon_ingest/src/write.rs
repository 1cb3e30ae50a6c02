//! Write one routed group of lines to its destination, with bounded
//! retries.
//!
//! The retry policy is deliberately asymmetric. A transport failure (no
//! HTTP response obtained) is worth retrying: it is usually a network or
//! infrastructure blip. An application-level rejection reproduces on every
//! attempt, so it fails the group immediately. Do not collapse the two
//! into a uniform retry.

pub mod client;

use crate::{
    WRITE_PRECISION,
    backup::{Backup, NoopBackup},
    route::{RouteError, RouteProvider},
    schema::SchemaEnsurer,
};
use async_trait::async_trait;
use client::{ClientError, WriteClient};
use observability_deps::tracing::{debug, error, warn};
use reqwest::StatusCode;
use siphon_types::RoutingKey;
use std::{fmt::Debug, sync::Arc, time::Duration};
use thiserror::Error;

/// Attempt bound per group: the first try plus up to four retries.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// First retry delay; doubles after each failed attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Terminal failure of one group write.
#[derive(Debug, Error)]
pub enum WriteError {
    /// No destination could be resolved; nothing was attempted.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// The destination answered with something other than the expected
    /// success status. Never retried.
    #[error("write to {destination} rejected [{code}]: {message}")]
    Rejected {
        destination: String,
        code: StatusCode,
        message: String,
    },

    /// The request could not be issued at all, e.g. the resolved base URL
    /// does not parse. Never retried.
    #[error("write to {destination} failed: {source}")]
    Request {
        destination: String,
        #[source]
        source: ClientError,
    },

    /// Every allowed transport-level attempt failed.
    #[error("write to {destination} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        destination: String,
        attempts: usize,
        #[source]
        source: ClientError,
    },
}

/// Writes one routing-key group. This is the seam the batch processor
/// drives, so its tests can script group outcomes without a full writer
/// stack behind them.
#[async_trait]
pub trait GroupWriter: Debug + Send + Sync {
    async fn write(
        &self,
        key: &RoutingKey,
        lines: &[String],
        aggregation_level: &str,
    ) -> Result<(), WriteError>;
}

/// The production [`GroupWriter`]: resolve the destination, ensure its
/// schema, post the newline-joined payload, and fan a copy out to the
/// backup sink.
#[derive(Debug)]
pub struct IngestWriter<T> {
    client: T,
    routes: Arc<dyn RouteProvider>,
    schema: SchemaEnsurer<T>,
    backup: Arc<dyn Backup>,
    max_attempts: usize,
    retry_backoff: Duration,
}

impl<T: WriteClient + Clone> IngestWriter<T> {
    pub fn new(client: T, routes: Arc<dyn RouteProvider>) -> Self {
        let schema = SchemaEnsurer::new(client.clone());
        Self {
            client,
            routes,
            schema,
            backup: Arc::new(NoopBackup),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_backup(mut self, backup: Arc<dyn Backup>) -> Self {
        self.backup = backup;
        self
    }

    /// Override the per-group attempt bound. Clamped to at least one.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

#[async_trait]
impl<T: WriteClient + Clone> GroupWriter for IngestWriter<T> {
    async fn write(
        &self,
        key: &RoutingKey,
        lines: &[String],
        aggregation_level: &str,
    ) -> Result<(), WriteError> {
        let destination = self.routes.resolve(key, aggregation_level).await?;
        let payload = lines.join("\n");

        let mut attempts = 0;
        let mut delay = self.retry_backoff;
        loop {
            attempts += 1;
            // Re-run on every attempt: the cache makes repeats free, and a
            // transport failure may mean the destination came back empty.
            self.schema.ensure(&destination).await;

            match self
                .client
                .write(&destination, WRITE_PRECISION, &payload)
                .await
            {
                Ok(()) => break,
                Err(ClientError::Rejected { code, message }) => {
                    error!(
                        destination = %destination,
                        code = %code,
                        payload = %payload,
                        "destination rejected write"
                    );
                    return Err(WriteError::Rejected {
                        destination: destination.to_string(),
                        code,
                        message,
                    });
                }
                Err(source @ ClientError::Invalid(_)) => {
                    error!(
                        destination = %destination,
                        payload = %payload,
                        error = %source,
                        "write request could not be issued"
                    );
                    return Err(WriteError::Request {
                        destination: destination.to_string(),
                        source,
                    });
                }
                Err(error) if attempts < self.max_attempts => {
                    warn!(
                        destination = %destination,
                        attempt = attempts,
                        error = %error,
                        "transport failure writing group, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(source) => {
                    error!(
                        destination = %destination,
                        attempts,
                        payload = %payload,
                        error = %source,
                        "write abandoned after repeated transport failures"
                    );
                    return Err(WriteError::RetriesExhausted {
                        destination: destination.to_string(),
                        attempts,
                        source,
                    });
                }
            }
        }

        debug!(
            key = %key,
            destination = %destination,
            lines = lines.len(),
            "group written"
        );

        if let Err(error) = self.backup.store(&payload, &destination).await {
            warn!(
                destination = %destination,
                error = %error,
                "backup write failed; ignoring"
            );
        }
        Ok(())
    }
}
