//! Metric recording for the discovery server.
//!
//! Gauge vectors cover proxy rejects per resource type, per-cluster
//! endpoint counts, connected clients, and the sizes of the model caches.

use metrics::gauge;
use mesh_proto::ResourceType;

/// Record a proxy's rejection (NACK) of a pushed response.
pub fn record_reject(resource: ResourceType, node: &str, error: &str) {
    let name = match resource {
        ResourceType::Cluster => "mesh_xds_cds_reject",
        ResourceType::Endpoint => "mesh_xds_eds_reject",
        ResourceType::Listener => "mesh_xds_lds_reject",
        ResourceType::Route => "mesh_xds_rds_reject",
    };
    gauge!(name, "node" => node.to_string(), "err" => error.to_string()).increment(1.0);
}

/// Record the endpoint count of a cluster as of the last push. Zero
/// endpoints is an error worth alerting on.
pub fn set_endpoint_count(cluster: &str, count: usize) {
    gauge!("mesh_xds_eds_instances", "cluster" => cluster.to_string()).set(count as f64);
}

/// Record the number of connected discovery clients.
pub fn set_connected_clients(count: usize) {
    gauge!("mesh_xds_clients").set(count as f64);
}

/// Record the number of services known to the control plane.
pub fn set_known_services(count: usize) {
    gauge!("mesh_services").set(count as f64);
}

/// Record the number of virtual services known to the control plane.
pub fn set_known_virtual_services(count: usize) {
    gauge!("mesh_virtual_services").set(count as f64);
}
