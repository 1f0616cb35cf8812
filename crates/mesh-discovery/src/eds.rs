//! The per-cluster endpoint assignment cache.
//!
//! Keyed by cluster name; each entry holds the last computed load
//! assignment and the set of connections watching it. `push_all`
//! recomputes every watched assignment once, then fans out, so the work
//! is shared across connections.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::{debug, warn};

use mesh_model::{ClusterName, LabelsCollection};
use mesh_proto::core::Address;
use mesh_proto::endpoint::{ClusterLoadAssignment, LbEndpoint, LocalityLbEndpoints};

use crate::metrics;
use crate::server::Environment;

/// One cached cluster: its assignment and its watchers.
#[derive(Debug, Default, Clone)]
pub struct EdsCluster {
    /// The last computed assignment.
    pub load_assignment: ClusterLoadAssignment,
    /// Connection ids subscribed to this cluster.
    pub watchers: HashSet<String>,
}

/// Cache of endpoint assignments, keyed by cluster name.
#[derive(Debug, Default)]
pub struct EdsCache {
    clusters: DashMap<String, EdsCluster>,
}

impl EdsCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a cluster, creating the entry if
    /// needed.
    pub fn add_watch(&self, cluster: &str, con_id: &str) {
        let mut entry = self.clusters.entry(cluster.to_string()).or_default();
        entry.watchers.insert(con_id.to_string());
    }

    /// Unsubscribe a connection from a cluster; the entry is dropped
    /// with its last watcher.
    pub fn remove_watch(&self, cluster: &str, con_id: &str) {
        let remove = if let Some(mut entry) = self.clusters.get_mut(cluster) {
            entry.watchers.remove(con_id);
            entry.watchers.is_empty()
        } else {
            false
        };
        if remove {
            self.clusters.remove(cluster);
            debug!(%cluster, "dropped endpoint cache entry with last watcher");
        }
    }

    /// The cached assignment for a cluster, if present.
    #[must_use]
    pub fn get(&self, cluster: &str) -> Option<ClusterLoadAssignment> {
        self.clusters.get(cluster).map(|e| e.load_assignment.clone())
    }

    /// Store a freshly computed assignment.
    pub fn set(&self, cluster: &str, assignment: ClusterLoadAssignment) {
        let mut entry = self.clusters.entry(cluster.to_string()).or_default();
        entry.load_assignment = assignment;
    }

    /// Names of all cached clusters. Copied out so callers never iterate
    /// under the shard locks.
    #[must_use]
    pub fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of the cache for the debug endpoints.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, EdsCluster)> {
        let mut out: Vec<(String, EdsCluster)> = self
            .clusters
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Compute the endpoint assignment of one cluster from the registry.
///
/// The cluster name is parsed back into (hostname, subset, port); the
/// subset's labels come from the destination rule. Unknown names yield
/// an empty assignment rather than an error so a stale watch cannot
/// poison a push.
#[must_use]
pub fn compute_load_assignment(env: &Environment, cluster_name: &str) -> ClusterLoadAssignment {
    let mut assignment = ClusterLoadAssignment {
        cluster_name: cluster_name.to_string(),
        endpoints: vec![],
    };

    let parsed = ClusterName::from(cluster_name.to_string());
    let Ok((_, subset, hostname, port_name)) = parsed.parse_subset_key() else {
        warn!(cluster = %cluster_name, "cannot parse cluster name for endpoint lookup");
        return assignment;
    };

    let labels: LabelsCollection = env.store.subset_labels(subset, &hostname);
    let instances = match env
        .discovery
        .instances(&hostname, &[port_name.to_string()], &labels)
    {
        Ok(instances) => instances,
        Err(err) => {
            warn!(cluster = %cluster_name, error = %err, "registry lookup failed");
            return assignment;
        }
    };

    let mut lb_endpoints: Vec<LbEndpoint> = instances
        .iter()
        .map(|instance| LbEndpoint {
            address: Some(Address::socket(
                instance.endpoint.address.clone(),
                instance.endpoint.port,
            )),
            load_balancing_weight: 1,
        })
        .collect();
    lb_endpoints.sort_by(|a, b| {
        let key = |e: &LbEndpoint| {
            e.address
                .as_ref()
                .and_then(|a| a.socket_address.as_ref())
                .map(|s| (s.address.clone(), s.port_value))
        };
        key(a).cmp(&key(b))
    });

    metrics::set_endpoint_count(cluster_name, lb_endpoints.len());
    if lb_endpoints.is_empty() {
        warn!(cluster = %cluster_name, "cluster has no endpoints");
    }

    if !lb_endpoints.is_empty() {
        assignment.endpoints.push(LocalityLbEndpoints { lb_endpoints });
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_lifecycle() {
        let cache = EdsCache::new();
        cache.add_watch("outbound||a|http", "con-1");
        cache.add_watch("outbound||a|http", "con-2");
        assert_eq!(cache.cluster_names(), vec!["outbound||a|http".to_string()]);

        cache.remove_watch("outbound||a|http", "con-1");
        assert_eq!(cache.cluster_names().len(), 1);

        cache.remove_watch("outbound||a|http", "con-2");
        assert!(cache.cluster_names().is_empty());
    }

    #[test]
    fn set_then_get() {
        let cache = EdsCache::new();
        cache.add_watch("c", "con-1");
        cache.set(
            "c",
            ClusterLoadAssignment {
                cluster_name: "c".into(),
                endpoints: vec![],
            },
        );
        assert_eq!(cache.get("c").unwrap().cluster_name, "c");
        assert!(cache.get("missing").is_none());
    }
}
