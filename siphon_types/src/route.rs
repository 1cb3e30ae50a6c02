//! Routing identity and destination types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Aggregation level written by the raw pipeline. Rollup pipelines carry
/// their window label (`5m`, `60m`, ...) from configuration instead.
pub const AGGREGATION_FULL: &str = "full";

/// Identity a group of lines is routed and written under.
///
/// Derived from a record's identity fields: `tenant_id` is
/// `{account_type}-{account}` and `measurement` is
/// `{monitoring_system}_{collection_name}`. Ordering is lexical by tenant
/// then measurement, so iterating a `BTreeMap` keyed by routing keys visits
/// groups deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoutingKey {
    pub tenant_id: String,
    pub measurement: String,
}

impl RoutingKey {
    pub fn new(tenant_id: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            measurement: measurement.into(),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.measurement)
    }
}

/// A concrete place to write a group of lines: one InfluxDB instance plus a
/// database and retention policy inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Base URL of the instance, e.g. `http://influx-a:8086`.
    pub base_url: String,
    pub database: String,
    pub retention_policy: String,
    /// InfluxQL duration literal backing the retention policy, e.g. `5d`.
    pub retention_policy_duration: String,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.base_url, self.database, self.retention_policy
        )
    }
}

/// Route document served by the routing service for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantRoutes {
    /// Destinations keyed by aggregation-level label (`full`, `5m`, ...).
    pub routes: HashMap<String, RouteEntry>,
}

/// One destination entry within [`TenantRoutes`].
///
/// Field names follow the routing service's wire format, which calls the
/// destination base URL `path` and splits the retention policy into its
/// name (`retentionPolicyName`) and duration (`retentionPolicy`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteEntry {
    pub path: String,
    pub database_name: String,
    pub retention_policy_name: String,
    pub retention_policy: String,
}

impl RouteEntry {
    /// Convert the wire entry into the pipeline's [`Destination`].
    pub fn to_destination(&self) -> Destination {
        Destination {
            base_url: self.path.clone(),
            database: self.database_name.clone(),
            retention_policy: self.retention_policy_name.clone(),
            retention_policy_duration: self.retention_policy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn routing_keys_order_by_tenant_then_measurement() {
        let a = RoutingKey::new("CORE-1", "MAAS_agent.load");
        let b = RoutingKey::new("CORE-1", "MAAS_agent.network");
        let c = RoutingKey::new("CORE-2", "MAAS_agent.cpu");

        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.to_string(), "CORE-1/MAAS_agent.load");
    }

    #[test]
    fn tenant_routes_decode_the_service_document() {
        let body = serde_json::json!({
            "routes": {
                "full": {
                    "path": "http://influx-a:8086",
                    "databaseName": "db_1234567",
                    "retentionPolicyName": "rp_5d",
                    "retentionPolicy": "5d"
                },
                "5m": {
                    "path": "http://influx-b:8086",
                    "databaseName": "db_1234567",
                    "retentionPolicyName": "rp_10d",
                    "retentionPolicy": "10d"
                }
            }
        });

        let routes: TenantRoutes = serde_json::from_value(body).unwrap();
        let dest = routes.routes["full"].to_destination();

        assert_eq!(
            dest,
            Destination {
                base_url: "http://influx-a:8086".into(),
                database: "db_1234567".into(),
                retention_policy: "rp_5d".into(),
                retention_policy_duration: "5d".into(),
            }
        );
        assert_eq!(routes.routes["5m"].retention_policy, "10d");
    }
}
