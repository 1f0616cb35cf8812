//! The listener plugin chain.
//!
//! Listeners are built as scaffolds with empty filter chains; plugins
//! append HTTP and network filters before the chains are marshaled into
//! the final listener. A failing plugin omits only the listener it was
//! working on.

use mesh_model::{MeshConfigStore, Proxy, ServiceInstance};
use mesh_proto::listener::{filter_names, Filter, HttpFilter, Listener};

/// The protocol class of the listener under construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerClass {
    /// HTTP-family listener (HTTP/1.1, HTTP/2, gRPC, terminated HTTPS).
    Http,
    /// Plain TCP listener.
    Tcp,
}

/// Inputs handed to each plugin.
pub struct PluginParams<'a> {
    /// Protocol class of the listener.
    pub class: ListenerClass,
    /// The proxy the listener is built for.
    pub proxy: &'a Proxy,
    /// Workload instances co-located with the proxy.
    pub instances: &'a [ServiceInstance],
    /// Typed config view.
    pub store: &'a MeshConfigStore,
}

/// Filters accumulated for one filter chain; marshaled into the listener
/// after the plugin chain runs.
#[derive(Clone, Debug, Default)]
pub struct FilterChainScaffold {
    /// HTTP filters, appended into the connection manager.
    pub http_filters: Vec<HttpFilter>,
    /// Network filters, appended before the terminal filter.
    pub network_filters: Vec<Filter>,
}

/// A listener under construction: the scaffold plus one filter
/// accumulator per chain.
#[derive(Debug)]
pub struct MutableListener {
    /// The listener scaffold; chains exist but carry no filters yet.
    pub listener: Listener,
    /// One accumulator per filter chain.
    pub chains: Vec<FilterChainScaffold>,
}

impl MutableListener {
    /// Wrap a scaffold listener.
    #[must_use]
    pub fn new(listener: Listener) -> Self {
        let chains = vec![FilterChainScaffold::default(); listener.filter_chains.len()];
        Self { listener, chains }
    }
}

/// Error raised by a plugin; the listener being built is omitted.
#[derive(Debug, thiserror::Error)]
#[error("plugin {plugin}: {reason}")]
pub struct PluginError {
    /// The failing plugin.
    pub plugin: &'static str,
    /// What went wrong.
    pub reason: String,
}

/// A listener decorator.
pub trait Plugin: Send + Sync {
    /// Plugin name, for logs.
    fn name(&self) -> &'static str;

    /// Called once per listener, after the scaffold is built. Plugins
    /// append filters to the chains; they must not remove or reorder
    /// filters added by earlier plugins.
    fn on_listener(
        &self,
        params: &PluginParams<'_>,
        mutable: &mut MutableListener,
    ) -> Result<(), PluginError>;
}

/// Appends the peer-authentication filter to HTTP chains when an
/// authentication policy applies to any of the proxy's workloads.
#[derive(Debug, Default)]
pub struct AuthnPlugin;

impl Plugin for AuthnPlugin {
    fn name(&self) -> &'static str {
        "authn"
    }

    fn on_listener(
        &self,
        params: &PluginParams<'_>,
        mutable: &mut MutableListener,
    ) -> Result<(), PluginError> {
        if params.class != ListenerClass::Http {
            return Ok(());
        }
        let applies = params.instances.iter().any(|instance| {
            params
                .store
                .authentication_policy_by_destination(
                    &instance.service.hostname,
                    &instance.endpoint.service_port,
                )
                .is_some()
        });
        if !applies {
            return Ok(());
        }
        for chain in &mut mutable.chains {
            chain.http_filters.push(HttpFilter {
                name: filter_names::AUTHN.into(),
                config: None,
            });
        }
        Ok(())
    }
}

/// Appends the telemetry-report filter to every chain.
#[derive(Debug, Default)]
pub struct TelemetryPlugin;

impl Plugin for TelemetryPlugin {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn on_listener(
        &self,
        params: &PluginParams<'_>,
        mutable: &mut MutableListener,
    ) -> Result<(), PluginError> {
        if params.class != ListenerClass::Http {
            return Ok(());
        }
        for chain in &mut mutable.chains {
            chain.http_filters.push(HttpFilter {
                name: filter_names::TELEMETRY.into(),
                config: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_model::specs::{AuthenticationPolicy, PeerAuthenticationMethod};
    use mesh_model::{
        Config, ConfigMeta, ConfigSpec, ConfigStore as _, Labels, MemConfigStore,
        NetworkEndpoint, Port, Protocol, Service,
    };
    use mesh_proto::listener::FilterChain;
    use std::sync::Arc;

    fn scaffold() -> MutableListener {
        MutableListener::new(Listener {
            name: "test".into(),
            address: None,
            filter_chains: vec![FilterChain::default()],
        })
    }

    fn params<'a>(
        store: &'a MeshConfigStore,
        proxy: &'a Proxy,
        instances: &'a [ServiceInstance],
    ) -> PluginParams<'a> {
        PluginParams {
            class: ListenerClass::Http,
            proxy,
            instances,
            store,
        }
    }

    #[test]
    fn authn_appends_only_with_policy() {
        let mem = Arc::new(MemConfigStore::new());
        let store = MeshConfigStore::new(mem.clone());
        let proxy = Proxy::parse_node_id("sidecar.10.0.0.1.app.cluster.local").unwrap();
        let service = Arc::new(Service::new(
            "reviews.default.svc.cluster.local",
            vec![Port::new("http", 9080, Protocol::Http)],
        ));
        let instances = vec![ServiceInstance {
            service,
            endpoint: NetworkEndpoint {
                address: "10.0.0.1".into(),
                port: 9080,
                service_port: Port::new("http", 9080, Protocol::Http),
            },
            labels: Labels::new(),
        }];

        // Without a policy nothing is appended.
        let mut mutable = scaffold();
        AuthnPlugin
            .on_listener(&params(&store, &proxy, &instances), &mut mutable)
            .unwrap();
        assert!(mutable.chains[0].http_filters.is_empty());

        // With a namespace-scope policy the filter appears on each chain.
        mem.create(Config::new(
            ConfigMeta::new("default-policy", "default"),
            ConfigSpec::AuthenticationPolicy(AuthenticationPolicy {
                targets: vec![],
                peers: vec![PeerAuthenticationMethod::Mtls {
                    excluded_hosts: vec![],
                }],
            }),
        ))
        .unwrap();

        let mut mutable = scaffold();
        AuthnPlugin
            .on_listener(&params(&store, &proxy, &instances), &mut mutable)
            .unwrap();
        assert_eq!(mutable.chains[0].http_filters.len(), 1);
        assert_eq!(mutable.chains[0].http_filters[0].name, filter_names::AUTHN);
    }

    #[test]
    fn telemetry_skips_tcp() {
        let mem = Arc::new(MemConfigStore::new());
        let store = MeshConfigStore::new(mem);
        let proxy = Proxy::parse_node_id("sidecar.10.0.0.1.app.cluster.local").unwrap();
        let mut mutable = scaffold();
        let mut p = params(&store, &proxy, &[]);
        p.class = ListenerClass::Tcp;
        TelemetryPlugin.on_listener(&p, &mut mutable).unwrap();
        assert!(mutable.chains[0].http_filters.is_empty());
    }
}
