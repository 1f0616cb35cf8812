//! # meshwork
//!
//! A service-mesh configuration plane: ingests routing intent (virtual
//! services, destination rules, gateways, service entries,
//! authentication policies) plus a live service registry, and compiles
//! per-proxy configuration served to data planes over the aggregated
//! discovery protocol.
//!
//! This crate is the facade over the workspace:
//!
//! - [`model`] - hostname/label algebra, service and config model,
//!   registry and store interfaces
//! - [`proto`] - the discovery protocol and resource wire types
//! - [`routing`] - the route compiler and listener/cluster generators
//! - [`discovery`] - the streaming discovery server and push coordinator
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meshwork::{serve, ServeOptions};
//! use meshwork::model::{MemConfigStore, MemServiceDiscovery};
//!
//! let registry = Arc::new(MemServiceDiscovery::new());
//! let store = Arc::new(MemConfigStore::new());
//!
//! serve(ServeOptions {
//!     discovery_addr: "[::]:15010".parse()?,
//!     debug_addr: Some("127.0.0.1:15014".parse()?),
//!     registry: registry.clone(),
//!     controller: registry,
//!     config: store,
//! })
//! .await?;
//! ```

#![deny(unsafe_code)]

pub use mesh_discovery as discovery;
pub use mesh_model as model;
pub use mesh_proto as proto;
pub use mesh_routing as routing;

pub use mesh_discovery::{
    AdsService, DiscoveryConfig, DiscoveryServer, Environment, PushCoordinator,
};

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use mesh_model::{ConfigStoreCache, RegistryController, ServiceDiscovery};

/// Everything needed to stand up the configuration plane.
pub struct ServeOptions {
    /// Address the discovery gRPC endpoint binds to.
    pub discovery_addr: SocketAddr,
    /// Address the debug HTTP endpoints bind to, if enabled.
    pub debug_addr: Option<SocketAddr>,
    /// Registry read model.
    pub registry: Arc<dyn ServiceDiscovery>,
    /// Registry event source.
    pub controller: Arc<dyn RegistryController>,
    /// Config store cache.
    pub config: Arc<dyn ConfigStoreCache>,
}

impl std::fmt::Debug for ServeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeOptions")
            .field("discovery_addr", &self.discovery_addr)
            .field("debug_addr", &self.debug_addr)
            .finish_non_exhaustive()
    }
}

/// Wire the discovery server, push coordinator, and debug endpoints, and
/// serve until the process exits.
pub async fn serve(options: ServeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env = Environment::new(options.registry, options.controller, options.config);
    let server = DiscoveryServer::new(env, DiscoveryConfig::from_env());

    let coordinator = PushCoordinator::start(Arc::clone(&server));
    coordinator.wire_events(&server);

    if let Some(debug_addr) = options.debug_addr {
        let debug_server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(err) = mesh_discovery::debug::serve(debug_addr, debug_server).await {
                tracing::error!(error = %err, "debug server exited");
            }
        });
    }

    info!(addr = %options.discovery_addr, "discovery server listening");
    tonic::transport::Server::builder()
        .add_service(AdsService::new(server).into_service())
        .serve(options.discovery_addr)
        .await?;
    Ok(())
}
