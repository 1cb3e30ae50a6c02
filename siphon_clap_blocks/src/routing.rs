//! CLI config for tenant route resolution.

use siphon_ingest::route::{
    CachingRouteProvider, HttpRouteProvider, RouteProvider, StaticRouteProvider,
};
use siphon_types::Destination;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error)]
pub enum Error {
    #[error("routing mode 'service' requires --routing-service-url")]
    MissingServiceUrl,

    #[error("routing mode 'static' requires --static-influx-url")]
    MissingInfluxUrl,
}

/// Where tenants' destinations come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RoutingMode {
    /// Ask the routing service per tenant and cache the answer.
    #[default]
    Service,

    /// Send every tenant to one fixed destination. Meant for local
    /// setups and tests.
    Static,
}

/// CLI config for tenant route resolution.
#[derive(Debug, Clone, clap::Parser)]
pub struct RoutingConfig {
    /// Where tenants' destinations come from.
    #[clap(
        long = "routing-mode",
        env = "SIPHON_ROUTING_MODE",
        default_value_t = RoutingMode::default(),
        value_enum,
        action
    )]
    pub mode: RoutingMode,

    /// Base URL of the routing service. `GET {url}/{tenantId}` must
    /// answer with the tenant's routes by aggregation level.
    #[clap(
        long = "routing-service-url",
        env = "SIPHON_ROUTING_SERVICE_URL",
        action
    )]
    pub service_url: Option<String>,

    /// Fixed InfluxDB base URL for static mode.
    #[clap(long = "static-influx-url", env = "SIPHON_STATIC_INFLUX_URL", action)]
    pub influx_url: Option<String>,

    /// Database written in static mode.
    #[clap(
        long = "static-database",
        env = "SIPHON_STATIC_DATABASE",
        default_value = "siphon",
        action
    )]
    pub database: String,

    /// Retention policy written in static mode.
    #[clap(
        long = "static-retention-policy",
        env = "SIPHON_STATIC_RETENTION_POLICY",
        default_value = "rp_5d",
        action
    )]
    pub retention_policy: String,

    /// Duration of the static-mode retention policy, in InfluxDB
    /// duration syntax (for example `5d`).
    #[clap(
        long = "static-retention-duration",
        env = "SIPHON_STATIC_RETENTION_DURATION",
        default_value = "5d",
        action
    )]
    pub retention_duration: String,
}

impl RoutingConfig {
    /// Build the resolver the writers share.
    pub fn route_provider(&self) -> Result<Arc<dyn RouteProvider>, Error> {
        match self.mode {
            RoutingMode::Service => {
                let url = self.service_url.as_deref().ok_or(Error::MissingServiceUrl)?;
                Ok(Arc::new(CachingRouteProvider::new(HttpRouteProvider::new(
                    url,
                ))))
            }
            RoutingMode::Static => {
                let base_url = self.influx_url.clone().ok_or(Error::MissingInfluxUrl)?;
                Ok(Arc::new(StaticRouteProvider::new(Destination {
                    base_url,
                    database: self.database.clone(),
                    retention_policy: self.retention_policy.clone(),
                    retention_policy_duration: self.retention_duration.clone(),
                })))
            }
        }
    }
}
