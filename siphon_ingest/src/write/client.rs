//! Abstraction over the destination store client, plus a scripted mock.
//!
//! The writer's retry policy hinges on *why* a call failed, so this seam
//! classifies every failure into [`ClientError`]: transport failures are
//! the only retryable class, rejections and malformed requests are
//! terminal.

use async_trait::async_trait;
use reqwest::StatusCode;
use siphon_line_protocol::Precision;
use siphon_types::Destination;
use std::fmt::Debug;
use thiserror::Error;

/// A failed call against the destination store.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never yielded a complete HTTP response. The only
    /// retryable failure class.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The destination answered, but not with the expected success status.
    #[error("destination rejected the request [{code}]: {message}")]
    Rejected { code: StatusCode, message: String },

    /// The request could not even be constructed, e.g. the resolved
    /// destination URL does not parse.
    #[error("invalid request: {0}")]
    Invalid(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<siphon_client::Error> for ClientError {
    fn from(e: siphon_client::Error) -> Self {
        use siphon_client::Error as E;
        match e {
            E::ApiError { code, message } => Self::Rejected { code, message },
            e @ (E::RequestSend { .. } | E::Bytes(_)) => Self::Transport(Box::new(e)),
            e @ (E::RequestUrl(_) | E::ClientBuild(_)) => Self::Invalid(Box::new(e)),
        }
    }
}

/// The two calls the pipeline makes against a destination store: line
/// writes and administrative statements.
#[async_trait]
pub trait WriteClient: Debug + Send + Sync {
    /// Write a line-protocol payload to `destination`.
    async fn write(
        &self,
        destination: &Destination,
        precision: Precision,
        body: &str,
    ) -> Result<(), ClientError>;

    /// Run an administrative statement against the instance at `base_url`.
    async fn query(&self, base_url: &str, statement: &str) -> Result<(), ClientError>;
}

#[async_trait]
impl WriteClient for siphon_client::Client {
    async fn write(
        &self,
        destination: &Destination,
        precision: Precision,
        body: &str,
    ) -> Result<(), ClientError> {
        Ok(Self::write(self, destination, precision, body).await?)
    }

    async fn query(&self, base_url: &str, statement: &str) -> Result<(), ClientError> {
        Ok(Self::query(self, base_url, statement).await?)
    }
}
