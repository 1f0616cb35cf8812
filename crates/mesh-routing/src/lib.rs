//! # mesh-routing
//!
//! The compilation layer of the meshwork control plane: pure functions
//! from the model (services, virtual services, destination rules,
//! gateways, authentication policies) to wire resources (route
//! configurations, clusters, listeners).
//!
//! The route compiler in [`route`] is the core; [`cluster`], [`listener`],
//! [`gateway`], and [`sidecar`] compose its output into per-proxy
//! resource sets, decorated by the [`plugin`] chain.

#![deny(unsafe_code)]

pub mod cluster;
pub mod gateway;
pub mod listener;
pub mod plugin;
pub mod route;
pub mod sidecar;

use std::sync::Arc;

use mesh_model::{MeshConfigStore, Service, ServiceDiscovery};

pub use cluster::{build_inbound_clusters, build_outbound_clusters, ClusterContext};
pub use gateway::{build_gateway_listeners, merge_gateways, MergedGateway};
pub use listener::{build_listener, marshal_filters, ListenerError, ListenerOpts};
pub use plugin::{AuthnPlugin, ListenerClass, MutableListener, Plugin, PluginError, TelemetryPlugin};
pub use route::{
    build_default_http_route, convert_destination_to_cluster, index_services,
    translate_routes, translate_virtual_hosts, GuardedHost, ServiceIndex,
    DEFAULT_ROUTE_OPERATION, DEFAULT_VHOST_PORT,
};
pub use sidecar::{build_sidecar_listeners, build_sidecar_route_config};

/// Shared inputs to the listener and cluster generators.
pub struct GeneratorContext<'a> {
    /// All services, in a deterministic order.
    pub services: &'a [Arc<Service>],
    /// Typed config view.
    pub store: &'a MeshConfigStore,
    /// Registry read model.
    pub discovery: &'a dyn ServiceDiscovery,
    /// The plugin chain applied to every listener.
    pub plugins: &'a [Arc<dyn Plugin>],
}

impl std::fmt::Debug for GeneratorContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorContext")
            .field("services", &self.services.len())
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}
