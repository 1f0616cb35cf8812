//! The discovery server.
//!
//! A single [`DiscoveryServer`] value owns all serving state: the
//! connection table, the sidecar-id index, the endpoint assignment
//! cache, and the model snapshot. Each proxy stream drives the shared
//! per-message state machine in [`DiscoveryServer::handle_request`];
//! change fanout goes through [`DiscoveryServer::push_all`], which
//! signals every connection's push channel after recomputing the shared
//! endpoint assignments once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use fnv::FnvHashMap;
use tracing::{debug, info, warn};

use mesh_model::{
    Config, ConfigKind, ConfigStoreCache, MeshConfigStore, NodeType, Proxy, RegistryController,
    Service, ServiceDiscovery, NAMESPACE_ALL,
};
use mesh_proto::discovery::{DiscoveryRequest, DiscoveryResponse};
use mesh_proto::{to_any, type_urls, ResourceType};
use mesh_routing::{
    build_gateway_listeners, build_inbound_clusters, build_outbound_clusters,
    build_sidecar_listeners, build_sidecar_route_config, AuthnPlugin, ClusterContext,
    GeneratorContext, Plugin, TelemetryPlugin,
};

use crate::config::DiscoveryConfig;
use crate::connection::{PushEvent, XdsConnection};
use crate::eds::{compute_load_assignment, EdsCache};
use crate::error::DiscoveryError;
use crate::metrics;

/// The collaborators the discovery server reads from.
#[derive(Clone)]
pub struct Environment {
    /// Registry read model.
    pub discovery: Arc<dyn ServiceDiscovery>,
    /// Registry event source.
    pub controller: Arc<dyn RegistryController>,
    /// The config store cache.
    pub config: Arc<dyn ConfigStoreCache>,
    /// Typed view over the config store.
    pub store: MeshConfigStore,
}

impl Environment {
    /// Assemble an environment from its collaborators.
    #[must_use]
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        controller: Arc<dyn RegistryController>,
        config: Arc<dyn ConfigStoreCache>,
    ) -> Self {
        let store = MeshConfigStore::new(Arc::clone(&config));
        Self {
            discovery,
            controller,
            config,
            store,
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment").finish_non_exhaustive()
    }
}

/// The aggregated discovery server.
pub struct DiscoveryServer {
    env: Environment,
    config: DiscoveryConfig,
    /// Connections by connection id.
    connections: RwLock<FnvHashMap<String, Arc<XdsConnection>>>,
    /// Connection ids by sidecar id. A map because a restarting proxy's
    /// old stream can outlive its replacement's first request.
    sidecar_index: RwLock<FnvHashMap<String, FnvHashMap<String, Arc<XdsConnection>>>>,
    /// Endpoint assignment cache.
    pub(crate) eds: EdsCache,
    /// Model snapshot: all services, refreshed on change events.
    services: RwLock<Arc<Vec<Arc<Service>>>>,
    /// Monotonic config version, bumped per fanout.
    version: AtomicU64,
    /// Listener plugin chain.
    plugins: Vec<Arc<dyn Plugin>>,
}

impl DiscoveryServer {
    /// Create a server over an environment, with the default plugin
    /// chain (peer authentication, telemetry).
    #[must_use]
    pub fn new(env: Environment, config: DiscoveryConfig) -> Arc<Self> {
        Self::with_plugins(
            env,
            config,
            vec![Arc::new(AuthnPlugin), Arc::new(TelemetryPlugin)],
        )
    }

    /// Create a server with an explicit plugin chain.
    #[must_use]
    pub fn with_plugins(
        env: Environment,
        config: DiscoveryConfig,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Arc<Self> {
        let server = Arc::new(Self {
            env,
            config,
            connections: RwLock::new(FnvHashMap::default()),
            sidecar_index: RwLock::new(FnvHashMap::default()),
            eds: EdsCache::new(),
            services: RwLock::new(Arc::new(Vec::new())),
            version: AtomicU64::new(1),
            plugins,
        });
        server.update_model();
        server
    }

    /// The environment this server reads from.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Refresh the model snapshot from the registry and update the
    /// model-size gauges.
    pub fn update_model(&self) {
        match self.env.discovery.services() {
            Ok(mut services) => {
                services.sort_by(|a, b| a.hostname.cmp(&b.hostname));
                metrics::set_known_services(services.len());
                *self.services.write().expect("services lock poisoned") = Arc::new(services);
            }
            Err(err) => {
                warn!(error = %err, "failed to list services; keeping previous snapshot");
            }
        }
        let virtual_services = self
            .env
            .config
            .list(ConfigKind::VirtualService, NAMESPACE_ALL)
            .len();
        metrics::set_known_virtual_services(virtual_services);
    }

    fn services_snapshot(&self) -> Arc<Vec<Arc<Service>>> {
        Arc::clone(&self.services.read().expect("services lock poisoned"))
    }

    /// Handle one discovery request, returning the responses to send.
    /// An ACK produces no responses; a new subscription or a grown
    /// resource set produces one.
    pub fn handle_request(
        &self,
        con: &Arc<XdsConnection>,
        request: DiscoveryRequest,
    ) -> Result<Vec<DiscoveryResponse>, DiscoveryError> {
        if let Some(node) = &request.node {
            if !node.id.is_empty() && con.proxy().is_none() {
                let proxy = Proxy::parse_node_id(&node.id)?
                    .with_metadata(node.metadata.clone());
                con.set_proxy(proxy);
            }
        }
        let Some(proxy) = con.proxy() else {
            info!(peer = %con.peer_addr, "discovery request without node id");
            return Ok(Vec::new());
        };
        let node_id = proxy.service_node();

        let Some(resource) = ResourceType::from_type_url(&request.type_url) else {
            warn!(type_url = %request.type_url, "unknown watched resource type");
            return Ok(Vec::new());
        };

        let responses = match resource {
            ResourceType::Cluster => self.handle_cds(con, &proxy, &node_id, &request)?,
            ResourceType::Listener => self.handle_lds(con, &proxy, &node_id, &request)?,
            ResourceType::Route => self.handle_rds(con, &proxy, &node_id, &request)?,
            ResourceType::Endpoint => self.handle_eds(con, &node_id, &request)?,
        };

        // Registration happens after the first identified request so the
        // connection is visible to push_all from then on.
        let newly_added = {
            let mut watched = con.watched.lock().expect("watched lock poisoned");
            if watched.added {
                false
            } else {
                watched.added = true;
                true
            }
        };
        if newly_added {
            self.add_con(con);
        }

        Ok(responses)
    }

    fn handle_cds(
        &self,
        con: &Arc<XdsConnection>,
        proxy: &Proxy,
        node_id: &str,
        request: &DiscoveryRequest,
    ) -> Result<Vec<DiscoveryResponse>, DiscoveryError> {
        {
            let mut watched = con.watched.lock().expect("watched lock poisoned");
            if watched.cds_watch {
                if let Some(error) = &request.error_detail {
                    warn!(con = %con.con_id(), error = %error.message, "CDS ACK carries error");
                    metrics::record_reject(ResourceType::Cluster, node_id, &error.message);
                } else if self.config.debug_ads {
                    info!(con = %con.con_id(), version = %request.version_info, "CDS ACK");
                }
                return Ok(Vec::new());
            }
            watched.cds_watch = true;
        }
        if self.config.debug_ads {
            info!(con = %con.con_id(), peer = %con.peer_addr, "CDS subscription");
        }
        Ok(vec![self.build_cds_response(con, proxy)?])
    }

    fn handle_lds(
        &self,
        con: &Arc<XdsConnection>,
        proxy: &Proxy,
        node_id: &str,
        request: &DiscoveryRequest,
    ) -> Result<Vec<DiscoveryResponse>, DiscoveryError> {
        {
            let mut watched = con.watched.lock().expect("watched lock poisoned");
            if watched.lds_watch {
                if let Some(error) = &request.error_detail {
                    warn!(con = %con.con_id(), error = %error.message, "LDS ACK carries error");
                    metrics::record_reject(ResourceType::Listener, node_id, &error.message);
                } else if self.config.debug_ads {
                    info!(con = %con.con_id(), version = %request.version_info, "LDS ACK");
                }
                return Ok(Vec::new());
            }
            watched.lds_watch = true;
        }
        if self.config.debug_ads {
            info!(con = %con.con_id(), peer = %con.peer_addr, "LDS subscription");
        }
        Ok(vec![self.build_lds_response(con, proxy)?])
    }

    fn handle_rds(
        &self,
        con: &Arc<XdsConnection>,
        proxy: &Proxy,
        node_id: &str,
        request: &DiscoveryRequest,
    ) -> Result<Vec<DiscoveryResponse>, DiscoveryError> {
        let routes = request.resource_names.clone();
        {
            let mut watched = con.watched.lock().expect("watched lock poisoned");
            // Same cardinality (or an empty set) is an ACK once a watch
            // exists. A shrinking subscription of equal size is
            // indistinguishable here and is also treated as an ACK.
            if routes.len() == watched.routes.len() || routes.is_empty() {
                if let Some(error) = &request.error_detail {
                    warn!(con = %con.con_id(), error = %error.message, "RDS ACK carries error");
                    metrics::record_reject(ResourceType::Route, node_id, &error.message);
                }
                if !watched.routes.is_empty() {
                    if self.config.debug_ads {
                        info!(
                            con = %con.con_id(),
                            version = %request.version_info,
                            nonce = %request.response_nonce,
                            "RDS ACK"
                        );
                    }
                    return Ok(Vec::new());
                }
            }
            watched.routes = routes;
        }
        if self.config.debug_ads {
            info!(con = %con.con_id(), "RDS subscription");
        }
        Ok(vec![self.build_rds_response(con, proxy)?])
    }

    fn handle_eds(
        &self,
        con: &Arc<XdsConnection>,
        node_id: &str,
        request: &DiscoveryRequest,
    ) -> Result<Vec<DiscoveryResponse>, DiscoveryError> {
        let clusters = request.resource_names.clone();
        {
            let mut watched = con.watched.lock().expect("watched lock poisoned");
            if clusters.len() == watched.clusters.len() || clusters.is_empty() {
                if let Some(error) = &request.error_detail {
                    warn!(con = %con.con_id(), error = %error.message, "EDS ACK carries error");
                    metrics::record_reject(ResourceType::Endpoint, node_id, &error.message);
                }
                if !watched.clusters.is_empty() {
                    if self.config.debug_ads {
                        info!(con = %con.con_id(), "EDS ACK");
                    }
                    return Ok(Vec::new());
                }
            }
            for stale in &watched.clusters {
                if !clusters.contains(stale) {
                    self.eds.remove_watch(stale, con.con_id());
                }
            }
            watched.clusters = clusters.clone();
        }
        for cluster in &clusters {
            self.eds.add_watch(cluster, con.con_id());
        }
        if self.config.debug_ads {
            info!(con = %con.con_id(), clusters = clusters.len(), "EDS subscription");
        }
        Ok(vec![self.build_eds_response(con, &clusters)])
    }

    /// Republish everything the connection watches, in CDS, RDS, EDS,
    /// LDS order.
    pub fn push_connection(
        &self,
        con: &Arc<XdsConnection>,
        _event: &PushEvent,
    ) -> Result<Vec<DiscoveryResponse>, DiscoveryError> {
        let Some(proxy) = con.proxy() else {
            return Ok(Vec::new());
        };
        let (cds, routes, clusters, lds) = {
            let watched = con.watched.lock().expect("watched lock poisoned");
            (
                watched.cds_watch,
                watched.routes.clone(),
                watched.clusters.clone(),
                watched.lds_watch,
            )
        };

        let mut out = Vec::new();
        if cds {
            out.push(self.build_cds_response(con, &proxy)?);
        }
        if !routes.is_empty() {
            out.push(self.build_rds_response(con, &proxy)?);
        }
        if !clusters.is_empty() {
            out.push(self.build_eds_response(con, &clusters));
        }
        if lds {
            out.push(self.build_lds_response(con, &proxy)?);
        }
        Ok(out)
    }

    fn build_cds_response(
        &self,
        con: &Arc<XdsConnection>,
        proxy: &Proxy,
    ) -> Result<DiscoveryResponse, DiscoveryError> {
        let services = self.services_snapshot();
        let ctx = ClusterContext {
            services: &services,
            store: &self.env.store,
            discovery: self.env.discovery.as_ref(),
        };
        let mut clusters = build_outbound_clusters(&ctx);
        let instances = self.env.discovery.get_proxy_service_instances(proxy)?;
        clusters.extend(build_inbound_clusters(&instances));

        let resources = clusters
            .iter()
            .map(|c| to_any(c, type_urls::CLUSTER))
            .collect();
        Ok(self.finish_response(con, ResourceType::Cluster, resources))
    }

    fn build_lds_response(
        &self,
        con: &Arc<XdsConnection>,
        proxy: &Proxy,
    ) -> Result<DiscoveryResponse, DiscoveryError> {
        let services = self.services_snapshot();
        let ctx = GeneratorContext {
            services: &services,
            store: &self.env.store,
            discovery: self.env.discovery.as_ref(),
            plugins: &self.plugins,
        };
        let listeners = match proxy.node_type {
            NodeType::Router => build_gateway_listeners(&ctx, proxy)?,
            NodeType::Sidecar | NodeType::Ingress => build_sidecar_listeners(&ctx, proxy)?,
        };
        let resources = listeners
            .iter()
            .map(|l| to_any(l, type_urls::LISTENER))
            .collect();
        Ok(self.finish_response(con, ResourceType::Listener, resources))
    }

    fn build_rds_response(
        &self,
        con: &Arc<XdsConnection>,
        proxy: &Proxy,
    ) -> Result<DiscoveryResponse, DiscoveryError> {
        let services = self.services_snapshot();
        let ctx = GeneratorContext {
            services: &services,
            store: &self.env.store,
            discovery: self.env.discovery.as_ref(),
            plugins: &self.plugins,
        };
        let routes = {
            let watched = con.watched.lock().expect("watched lock poisoned");
            watched.routes.clone()
        };
        let mut resources = Vec::with_capacity(routes.len());
        for name in &routes {
            let config = build_sidecar_route_config(&ctx, proxy, name)?;
            resources.push(to_any(&config, type_urls::ROUTE));
        }
        Ok(self.finish_response(con, ResourceType::Route, resources))
    }

    fn build_eds_response(
        &self,
        con: &Arc<XdsConnection>,
        clusters: &[String],
    ) -> DiscoveryResponse {
        let mut resources = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let assignment = self.eds.get(cluster).unwrap_or_else(|| {
                let fresh = compute_load_assignment(&self.env, cluster);
                self.eds.set(cluster, fresh.clone());
                fresh
            });
            resources.push(to_any(&assignment, type_urls::ENDPOINT));
        }
        self.finish_response(con, ResourceType::Endpoint, resources)
    }

    fn finish_response(
        &self,
        con: &Arc<XdsConnection>,
        resource: ResourceType,
        resources: Vec<prost_types::Any>,
    ) -> DiscoveryResponse {
        let response = DiscoveryResponse {
            version_info: self.version.load(Ordering::Relaxed).to_string(),
            nonce: nonce(),
            type_url: resource.type_url().to_string(),
            canary: false,
            resources,
        };
        con.record_push(
            resource,
            &response.version_info,
            &response.nonce,
            response.resources.len(),
        );
        if self.config.debug_ads {
            info!(
                con = %con.con_id(),
                resource = %resource,
                version = %response.version_info,
                count = response.resources.len(),
                "push"
            );
        }
        response
    }

    /// Fan a configuration or registry change out to every connection.
    ///
    /// Endpoint assignments are recomputed once, up front; each
    /// connection then republishes in its own stream task.
    pub fn push_all(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
        self.update_model();

        // Shared EDS work first, outside the connection loop.
        for cluster in self.eds.cluster_names() {
            let assignment = compute_load_assignment(&self.env, &cluster);
            self.eds.set(&cluster, assignment);
        }

        // Snapshot under the read lock, signal outside it.
        let connections: Vec<Arc<XdsConnection>> = {
            let table = self.connections.read().expect("connection lock poisoned");
            table.values().cloned().collect()
        };
        debug!(connections = connections.len(), "fanning out push");
        for con in connections {
            con.signal_push(PushEvent::default());
        }
    }

    fn add_con(&self, con: &Arc<XdsConnection>) {
        let con_id = con.con_id().to_string();
        let count = {
            let mut table = self.connections.write().expect("connection lock poisoned");
            table.insert(con_id.clone(), Arc::clone(con));
            table.len()
        };
        if let Some(proxy) = con.proxy() {
            let mut index = self.sidecar_index.write().expect("sidecar lock poisoned");
            index
                .entry(proxy.id)
                .or_default()
                .insert(con_id.clone(), Arc::clone(con));
        }
        metrics::set_connected_clients(count);
        info!(con = %con_id, peer = %con.peer_addr, "connection registered");
    }

    /// Deregister a closed connection and release its endpoint watches.
    pub fn remove_con(&self, con: &Arc<XdsConnection>) {
        let con_id = con.con_id();
        if con_id.is_empty() {
            return;
        }
        {
            let watched = con.watched.lock().expect("watched lock poisoned");
            for cluster in &watched.clusters {
                self.eds.remove_watch(cluster, con_id);
            }
        }
        let count = {
            let mut table = self.connections.write().expect("connection lock poisoned");
            if table.remove(con_id).is_none() {
                debug!(con = %con_id, "removing connection that was never registered");
            }
            table.len()
        };
        if let Some(proxy) = con.proxy() {
            let mut index = self.sidecar_index.write().expect("sidecar lock poisoned");
            if let Some(by_con) = index.get_mut(&proxy.id) {
                by_con.remove(con_id);
                if by_con.is_empty() {
                    index.remove(&proxy.id);
                }
            }
        }
        metrics::set_connected_clients(count);
        info!(con = %con_id, "connection removed");
    }

    /// Snapshot of all connections, for the debug endpoints.
    #[must_use]
    pub fn connection_snapshot(&self) -> Vec<Arc<XdsConnection>> {
        let table = self.connections.read().expect("connection lock poisoned");
        let mut out: Vec<Arc<XdsConnection>> = table.values().cloned().collect();
        out.sort_by(|a, b| a.con_id().cmp(b.con_id()));
        out
    }

    /// All known configs, for the debug endpoints.
    #[must_use]
    pub fn config_snapshot(&self) -> Vec<Config> {
        let mut out = Vec::new();
        for kind in ConfigKind::ALL {
            out.extend(self.env.config.list(kind, NAMESPACE_ALL));
        }
        out
    }

    /// The current model snapshot, for the debug endpoints.
    #[must_use]
    pub fn service_snapshot(&self) -> Arc<Vec<Arc<Service>>> {
        self.services_snapshot()
    }
}

impl std::fmt::Debug for DiscoveryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connections = self.connections.read().expect("connection lock poisoned");
        f.debug_struct("DiscoveryServer")
            .field("connections", &connections.len())
            .field("version", &self.version.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Counter feeding response nonces.
static NONCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique response nonce: a timestamp plus an atomic counter,
/// so concurrent pushes never collide.
fn nonce() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let count = NONCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{timestamp:x}-{count:x}")
}
