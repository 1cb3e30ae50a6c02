//! CLI config for the InfluxDB write path.

use secrecy::{ExposeSecret, Secret};
use siphon_client::Client;
use siphon_ingest::write::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BACKOFF};
use std::time::Duration;

fn default_max_attempts() -> &'static str {
    let s = DEFAULT_MAX_ATTEMPTS.to_string();
    Box::leak(Box::new(s))
}

fn default_retry_backoff() -> &'static str {
    let s = humantime::format_duration(DEFAULT_RETRY_BACKOFF).to_string();
    Box::leak(Box::new(s))
}

/// CLI config for the InfluxDB write path.
#[derive(Debug, Clone, clap::Parser)]
pub struct WriteConfig {
    /// Attempts per group before a transport failure becomes terminal.
    /// Application-level rejections never retry.
    #[clap(
        long = "write-max-attempts",
        env = "SIPHON_WRITE_MAX_ATTEMPTS",
        default_value = default_max_attempts(),
        action
    )]
    pub max_attempts: usize,

    /// First pause between transport retries; doubles per attempt.
    #[clap(
        long = "write-retry-initial-backoff",
        env = "SIPHON_WRITE_RETRY_INITIAL_BACKOFF",
        default_value = default_retry_backoff(),
        value_parser = humantime::parse_duration,
        action
    )]
    pub retry_initial_backoff: Duration,

    /// Per-request timeout for writes and admin queries.
    #[clap(
        long = "write-timeout",
        env = "SIPHON_WRITE_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration,
        action
    )]
    pub timeout: Duration,

    /// Token sent as `Authorization: Token ...` on every request; v1
    /// servers accept `username:password` in this scheme.
    #[clap(long = "write-auth-token", env = "SIPHON_WRITE_AUTH_TOKEN", action)]
    pub auth_token: Option<Secret<String>>,
}

impl WriteConfig {
    /// HTTP client configured per this block.
    pub fn client(&self) -> Result<Client, siphon_client::Error> {
        let mut client = Client::new();
        if let Some(token) = &self.auth_token {
            client = client.with_auth_token(token.expose_secret().as_str());
        }
        client.with_timeout(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = WriteConfig::try_parse_from(["siphon"]).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_initial_backoff, Duration::from_millis(50));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.auth_token.is_none());
        config.client().unwrap();
    }

    #[test]
    fn test_overrides() {
        let config = WriteConfig::try_parse_from([
            "siphon",
            "--write-max-attempts",
            "3",
            "--write-retry-initial-backoff",
            "1s",
            "--write-timeout",
            "5s",
            "--write-auth-token",
            "siphon:hunter2",
        ])
        .unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_initial_backoff, Duration::from_secs(1));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(
            config.auth_token.as_ref().unwrap().expose_secret(),
            "siphon:hunter2"
        );
        config.client().unwrap();
    }
}
