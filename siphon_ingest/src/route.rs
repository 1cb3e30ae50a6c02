//! Tenant route resolution: which store instance, database, and retention
//! policy a routing key's data belongs to.

use async_trait::async_trait;
use observability_deps::tracing::debug;
use parking_lot::RwLock;
use reqwest::StatusCode;
use siphon_types::{Destination, RoutingKey, TenantRoutes};
use std::collections::HashMap;
use std::fmt::Debug;
use thiserror::Error;

/// A failed route resolution. Terminal for the affected group: retries
/// belong to the writer's transport layer, never here.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The backing lookup has no destination for this tenant and level.
    #[error("no route for tenant '{tenant_id}' at aggregation level '{level}'")]
    NotFound { tenant_id: String, level: String },

    /// The routing service could not be queried or answered abnormally.
    #[error("route lookup for tenant '{tenant_id}' failed: {source}")]
    Lookup {
        tenant_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Maps a routing key and aggregation level to a concrete [`Destination`].
#[async_trait]
pub trait RouteProvider: Debug + Send + Sync {
    async fn resolve(
        &self,
        key: &RoutingKey,
        aggregation_level: &str,
    ) -> Result<Destination, RouteError>;
}

/// Returns one fixed destination for every key. Development and test
/// deployments that write everything to a local instance.
#[derive(Debug, Clone)]
pub struct StaticRouteProvider {
    destination: Destination,
}

impl StaticRouteProvider {
    pub fn new(destination: Destination) -> Self {
        Self { destination }
    }
}

#[async_trait]
impl RouteProvider for StaticRouteProvider {
    async fn resolve(
        &self,
        _key: &RoutingKey,
        _aggregation_level: &str,
    ) -> Result<Destination, RouteError> {
        Ok(self.destination.clone())
    }
}

/// Looks routes up from the external routing service:
/// `GET {service_url}/{tenant_id}` returns the tenant's routes keyed by
/// aggregation level.
#[derive(Debug)]
pub struct HttpRouteProvider {
    service_url: String,
    http_client: reqwest::Client,
}

impl HttpRouteProvider {
    pub fn new(service_url: impl Into<String>) -> Self {
        let mut service_url = service_url.into();
        while service_url.ends_with('/') {
            service_url.pop();
        }
        Self {
            service_url,
            http_client: reqwest::Client::new(),
        }
    }

    fn lookup_error(
        tenant_id: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> RouteError {
        RouteError::Lookup {
            tenant_id: tenant_id.to_owned(),
            source: source.into(),
        }
    }
}

#[async_trait]
impl RouteProvider for HttpRouteProvider {
    async fn resolve(
        &self,
        key: &RoutingKey,
        aggregation_level: &str,
    ) -> Result<Destination, RouteError> {
        let tenant_id = &key.tenant_id;
        let url = format!("{}/{tenant_id}", self.service_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::lookup_error(tenant_id, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RouteError::NotFound {
                tenant_id: tenant_id.clone(),
                level: aggregation_level.to_owned(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::lookup_error(
                tenant_id,
                format!("routing service answered {}", response.status()),
            ));
        }

        let routes: TenantRoutes = response
            .json()
            .await
            .map_err(|e| Self::lookup_error(tenant_id, e))?;

        routes
            .routes
            .get(aggregation_level)
            .map(|entry| entry.to_destination())
            .ok_or_else(|| RouteError::NotFound {
                tenant_id: tenant_id.clone(),
                level: aggregation_level.to_owned(),
            })
    }
}

/// Read-through cache over another provider.
///
/// Successful resolutions are kept for the lifetime of the process, keyed
/// by `(tenant_id, aggregation_level)`; repeated resolves for a cached key
/// never reach the inner provider again. There is no invalidation: a
/// tenant whose destination moves upstream is picked up only by a process
/// restart. Failures are never cached.
#[derive(Debug)]
pub struct CachingRouteProvider<P> {
    inner: P,
    cache: RwLock<HashMap<(String, String), Destination>>,
}

impl<P> CachingRouteProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<P: RouteProvider> RouteProvider for CachingRouteProvider<P> {
    async fn resolve(
        &self,
        key: &RoutingKey,
        aggregation_level: &str,
    ) -> Result<Destination, RouteError> {
        let cache_key = (key.tenant_id.clone(), aggregation_level.to_owned());
        {
            let cache = self.cache.read();
            if let Some(hit) = cache.get(&cache_key) {
                return Ok(hit.clone());
            }
        }

        debug!(tenant_id = %key.tenant_id, level = aggregation_level, "route cache miss");
        let destination = self.inner.resolve(key, aggregation_level).await?;
        // Concurrent misses race to insert the same derived fact;
        // last-writer-wins is fine.
        self.cache
            .write()
            .insert(cache_key, destination.clone());
        Ok(destination)
    }
}
