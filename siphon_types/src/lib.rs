//! Shared data types for the siphon ingestion pipeline.
//!
//! This crate holds the wire-facing record shapes consumed off the
//! partitioned log ([`RawMetric`], [`RollupMetric`]), the identity key the
//! pipeline groups and routes by ([`RoutingKey`]), and the routing-service
//! document describing where a tenant's data lives ([`TenantRoutes`],
//! [`Destination`]).

pub mod record;
pub mod route;

pub use record::{
    METADATA_ACCOUNT_ID, METADATA_ENTITY_ID, METADATA_MONITORING_SYSTEM,
    METADATA_MONITORING_ZONE, MetricSource, RawMetric, Rollup, RollupMetric,
};
pub use route::{AGGREGATION_FULL, Destination, RouteEntry, RoutingKey, TenantRoutes};
