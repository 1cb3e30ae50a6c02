//! Destination schema ensuring: create the database and retention policy
//! ahead of the first write, remembering which destinations are covered.

use crate::write::client::WriteClient;
use observability_deps::tracing::{debug, warn};
use parking_lot::RwLock;
use siphon_types::Destination;
use std::collections::HashSet;

/// Issues the idempotent create statements for a destination once per
/// process.
///
/// The cache is purely a hot-path optimization: the statements are safe to
/// repeat (server-side no-op when the objects exist), so a failed attempt
/// is logged, nothing is cached, and the next write attempt tries again.
/// The store's own response to the subsequent data write stays
/// authoritative either way, which is why failures never block a write.
#[derive(Debug)]
pub struct SchemaEnsurer<T> {
    client: T,
    ensured: RwLock<HashSet<(String, String, String)>>,
}

impl<T: WriteClient> SchemaEnsurer<T> {
    pub fn new(client: T) -> Self {
        Self {
            client,
            ensured: RwLock::new(HashSet::new()),
        }
    }

    /// Ensure the database and retention policy behind `destination`
    /// exist. Best-effort: failures are logged, never propagated.
    pub async fn ensure(&self, destination: &Destination) {
        let key = (
            destination.base_url.clone(),
            destination.database.clone(),
            destination.retention_policy.clone(),
        );
        {
            let ensured = self.ensured.read();
            if ensured.contains(&key) {
                return;
            }
        }

        for statement in [
            create_database(destination),
            create_retention_policy(destination),
        ] {
            if let Err(error) = self.client.query(&destination.base_url, &statement).await {
                warn!(
                    destination = %destination,
                    statement = %statement,
                    error = %error,
                    "schema ensure failed; proceeding with the write anyway"
                );
                return;
            }
        }

        debug!(destination = %destination, "destination schema ensured");
        self.ensured.write().insert(key);
    }
}

fn create_database(destination: &Destination) -> String {
    format!(
        r#"CREATE DATABASE "{}" WITH DURATION {} NAME "{}""#,
        destination.database, destination.retention_policy_duration, destination.retention_policy
    )
}

fn create_retention_policy(destination: &Destination) -> String {
    format!(
        r#"CREATE RETENTION POLICY "{}" ON "{}" DURATION {} REPLICATION 1 DEFAULT"#,
        destination.retention_policy, destination.database, destination.retention_policy_duration
    )
}
