//! HTTP client for the InfluxDB v1 write and administrative query APIs.
//!
//! Unlike a client bound to a single server, [`Client`] is bound to nothing
//! but an HTTP connection pool: the instance to talk to arrives with every
//! call, because tenant routing spreads writes across many InfluxDB
//! instances. A write succeeds only on `204 No Content` and an
//! administrative statement only on `200 OK`; any other response surfaces
//! as [`Error::ApiError`] so callers can tell a rejection apart from a
//! transport failure ([`Error::RequestSend`]).

use reqwest::{Method, StatusCode, header};
use secrecy::{ExposeSecret, Secret};
use siphon_line_protocol::Precision;
use siphon_types::Destination;
use std::time::Duration;
use url::Url;

/// Primary error type for the [`Client`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to construct HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to read the response body: {0}")]
    Bytes(#[source] reqwest::Error),

    /// The server answered, but not with the expected success status.
    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    /// No usable HTTP response was obtained at all.
    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }

    /// Whether the failure happened before any HTTP response was obtained.
    ///
    /// Retrying is only reasonable for these; a response from the server,
    /// successful or not, is authoritative.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::RequestSend { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Client for the v1 HTTP surface of any number of InfluxDB instances.
#[derive(Debug, Clone, Default)]
pub struct Client {
    auth_token: Option<Secret<String>>,
    http_client: reqwest::Client,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a static token sent as `Authorization: Token ...` on every
    /// request. InfluxDB v1 accepts `username:password` in this scheme.
    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(Secret::new(auth_token.into()));
        self
    }

    /// Replace the connection pool with one enforcing `timeout` per request.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::ClientBuild)?;
        Ok(self)
    }

    /// Write a line protocol payload to
    /// `POST {base_url}/write?db={database}&rp={retention_policy}&precision=...`.
    ///
    /// Succeeds only on `204 No Content`.
    pub async fn write(
        &self,
        destination: &Destination,
        precision: Precision,
        body: &str,
    ) -> Result<()> {
        let url = Url::parse(&destination.base_url)?.join("/write")?;
        let mut req = self
            .http_client
            .post(url.clone())
            .query(&[
                ("db", destination.database.as_str()),
                ("rp", destination.retention_policy.as_str()),
                ("precision", precision.query_param()),
            ])
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.to_string());
        if let Some(token) = &self.auth_token {
            req = req.header(
                header::AUTHORIZATION,
                format!("Token {}", token.expose_secret()),
            );
        }

        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, url.as_str(), src))?;
        let status = resp.status();
        let content = resp.bytes().await.map_err(Error::Bytes)?;
        match status {
            StatusCode::NO_CONTENT => Ok(()),
            code => Err(Error::ApiError {
                code,
                message: String::from_utf8_lossy(&content).to_string(),
            }),
        }
    }

    /// Run an administrative InfluxQL statement against
    /// `POST {base_url}/query` as a form-urlencoded `q` parameter.
    ///
    /// Succeeds only on `200 OK`; InfluxDB answers 200 for idempotent
    /// `CREATE ...` statements whether or not the object already existed.
    pub async fn query(&self, base_url: &str, statement: &str) -> Result<()> {
        let url = Url::parse(base_url)?.join("/query")?;
        let mut req = self
            .http_client
            .post(url.clone())
            .form(&[("q", statement)]);
        if let Some(token) = &self.auth_token {
            req = req.header(
                header::AUTHORIZATION,
                format!("Token {}", token.expose_secret()),
            );
        }

        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, url.as_str(), src))?;
        let status = resp.status();
        let content = resp.bytes().await.map_err(Error::Bytes)?;
        match status {
            StatusCode::OK => Ok(()),
            code => Err(Error::ApiError {
                code,
                message: String::from_utf8_lossy(&content).to_string(),
            }),
        }
    }
}
