//! Sidecar listener and route-configuration assembly.
//!
//! Sidecars get inbound listeners bound to their workload endpoints and
//! outbound listeners per HTTP service port, the latter subscribing to a
//! per-port route configuration over RDS. The route configurations are
//! compiled on demand by [`build_sidecar_route_config`], one virtual host
//! per [`GuardedHost`] the route compiler emits at that port.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, warn};

use mesh_model::{
    ClusterName, Hostname, LabelsCollection, ModelError, Protocol, Proxy, TrafficDirection,
    MESH_GATEWAY,
};
use mesh_proto::listener::{Filter, HttpDirection, Listener, TcpProxy};
use mesh_proto::route::{RouteConfiguration, TlsRequirementType, VirtualHost};
use mesh_proto::{to_any, type_urls};

use crate::listener::{
    build_listener, marshal_filters, FilterChainOpts, HttpChainOpts, ListenerOpts,
    WILDCARD_ADDRESS,
};
use crate::plugin::{ListenerClass, MutableListener, PluginParams};
use crate::route::{
    build_default_http_route, index_services, translate_virtual_hosts, GuardedHost,
};
use crate::GeneratorContext;

/// Build all listeners for a sidecar proxy: inbound listeners for the
/// workload's own endpoints and outbound listeners for the mesh.
pub fn build_sidecar_listeners(
    ctx: &GeneratorContext<'_>,
    proxy: &Proxy,
) -> Result<Vec<Listener>, ModelError> {
    let instances = ctx.discovery.get_proxy_service_instances(proxy)?;

    let mut listeners = Vec::new();
    listeners.extend(build_inbound_listeners(ctx, proxy, &instances));
    listeners.extend(build_outbound_listeners(ctx, proxy, &instances));
    Ok(listeners)
}

/// One inbound listener per workload endpoint port, forwarding to the
/// matching inbound cluster.
fn build_inbound_listeners(
    ctx: &GeneratorContext<'_>,
    proxy: &Proxy,
    instances: &[mesh_model::ServiceInstance],
) -> Vec<Listener> {
    let mut seen_ports = BTreeSet::new();
    let mut listeners = Vec::new();

    for instance in instances {
        let endpoint_port = instance.endpoint.port;
        if !seen_ports.insert(endpoint_port) {
            continue;
        }
        let protocol = instance.endpoint.service_port.protocol;
        let cluster = ClusterName::subset_key(
            TrafficDirection::Inbound,
            "",
            &instance.service.hostname,
            &instance.endpoint.service_port.name,
        );

        let (class, chain) = if protocol.is_http() {
            let route_config = RouteConfiguration {
                name: format!("inbound|{endpoint_port}"),
                virtual_hosts: vec![VirtualHost {
                    name: format!("inbound|{}", instance.service.hostname),
                    domains: vec!["*".into()],
                    routes: vec![build_default_http_route(cluster)],
                    require_tls: TlsRequirementType::None as i32,
                }],
                validate_clusters: false,
            };
            (
                ListenerClass::Http,
                FilterChainOpts {
                    http: Some(HttpChainOpts {
                        route_config: Some(route_config),
                        rds_route_name: String::new(),
                        use_remote_address: false,
                        direction: HttpDirection::Ingress,
                    }),
                    ..Default::default()
                },
            )
        } else {
            let tcp = TcpProxy {
                stat_prefix: cluster.as_str().to_string(),
                cluster: cluster.as_str().to_string(),
            };
            (
                ListenerClass::Tcp,
                FilterChainOpts {
                    network_filters: vec![Filter {
                        name: mesh_proto::listener::filter_names::TCP_PROXY.into(),
                        typed_config: Some(to_any(&tcp, type_urls::TCP_PROXY)),
                    }],
                    ..Default::default()
                },
            )
        };

        let opts = ListenerOpts {
            bind_address: instance.endpoint.address.clone(),
            port: endpoint_port,
            protocol,
            filter_chain_opts: vec![chain],
        };
        if let Some(listener) = run_pipeline(ctx, proxy, instances, class, opts) {
            listeners.push(listener);
        }
    }
    listeners
}

/// Outbound listeners: one wildcard HTTP listener per distinct HTTP
/// service port (subscribing to the per-port route config over RDS), and
/// one TCP listener per addressable TCP service port.
fn build_outbound_listeners(
    ctx: &GeneratorContext<'_>,
    proxy: &Proxy,
    instances: &[mesh_model::ServiceInstance],
) -> Vec<Listener> {
    let mut http_ports = BTreeSet::new();
    let mut tcp_services: BTreeMap<(u16, Hostname), (ClusterName, String)> = BTreeMap::new();

    for service in ctx.services {
        for port in service.ports.iter() {
            if port.protocol.is_http() {
                http_ports.insert(port.port);
            } else if !service.address.is_empty() {
                let cluster = ClusterName::subset_key(
                    TrafficDirection::Outbound,
                    "",
                    &service.hostname,
                    &port.name,
                );
                tcp_services.insert(
                    (port.port, service.hostname.clone()),
                    (cluster, service.address.clone()),
                );
            }
        }
    }

    let mut listeners = Vec::new();

    for port in http_ports {
        let opts = ListenerOpts {
            bind_address: WILDCARD_ADDRESS.into(),
            port,
            protocol: Protocol::Http,
            filter_chain_opts: vec![FilterChainOpts {
                http: Some(HttpChainOpts {
                    route_config: None,
                    rds_route_name: port.to_string(),
                    use_remote_address: false,
                    direction: HttpDirection::Egress,
                }),
                ..Default::default()
            }],
        };
        if let Some(listener) = run_pipeline(ctx, proxy, instances, ListenerClass::Http, opts) {
            listeners.push(listener);
        }
    }

    for ((port, _hostname), (cluster, address)) in tcp_services {
        let tcp = TcpProxy {
            stat_prefix: cluster.as_str().to_string(),
            cluster: cluster.as_str().to_string(),
        };
        let opts = ListenerOpts {
            bind_address: address,
            port,
            protocol: Protocol::Tcp,
            filter_chain_opts: vec![FilterChainOpts {
                network_filters: vec![Filter {
                    name: mesh_proto::listener::filter_names::TCP_PROXY.into(),
                    typed_config: Some(to_any(&tcp, type_urls::TCP_PROXY)),
                }],
                ..Default::default()
            }],
        };
        if let Some(listener) = run_pipeline(ctx, proxy, instances, ListenerClass::Tcp, opts) {
            listeners.push(listener);
        }
    }

    listeners
}

/// Run the scaffold → plugins → marshal pipeline for one listener,
/// returning `None` (and logging) when any step rejects it.
fn run_pipeline(
    ctx: &GeneratorContext<'_>,
    proxy: &Proxy,
    instances: &[mesh_model::ServiceInstance],
    class: ListenerClass,
    opts: ListenerOpts,
) -> Option<Listener> {
    let mut mutable = MutableListener::new(build_listener(&opts));
    let params = PluginParams {
        class,
        proxy,
        instances,
        store: ctx.store,
    };
    for plugin in ctx.plugins {
        if let Err(err) = plugin.on_listener(&params, &mut mutable) {
            warn!(listener = %mutable.listener.name, error = %err, "omitting listener");
            return None;
        }
    }
    if let Err(err) = marshal_filters(&mut mutable.listener, &opts, &mutable.chains) {
        warn!(error = %err, "omitting listener");
        return None;
    }
    Some(mutable.listener)
}

/// Compile the outbound route configuration a sidecar requested by name.
/// Route configurations are named by port; an unparsable name yields an
/// empty configuration.
pub fn build_sidecar_route_config(
    ctx: &GeneratorContext<'_>,
    proxy: &Proxy,
    route_name: &str,
) -> Result<RouteConfiguration, ModelError> {
    let Ok(port) = route_name.parse::<u16>() else {
        debug!(route = %route_name, "route configuration name is not a port");
        return Ok(RouteConfiguration {
            name: route_name.to_string(),
            virtual_hosts: vec![],
            validate_clusters: false,
        });
    };

    let instances = ctx.discovery.get_proxy_service_instances(proxy)?;
    let proxy_labels: LabelsCollection = instances.iter().map(|i| i.labels.clone()).collect();

    let mesh_gateways: HashSet<String> = [MESH_GATEWAY.to_string()].into();
    let configs = ctx.store.virtual_services(&mesh_gateways);
    let services = index_services(ctx.services);

    let guarded = translate_virtual_hosts(&configs, &services, &proxy_labels, &mesh_gateways);

    let mut virtual_hosts = Vec::new();
    for host in guarded {
        if host.port != port {
            continue;
        }
        virtual_hosts.push(guarded_to_virtual_host(&host));
    }

    virtual_hosts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(RouteConfiguration {
        name: route_name.to_string(),
        virtual_hosts,
        validate_clusters: false,
    })
}

/// Map a guarded host onto a wire virtual host. Domains cover each
/// matched service hostname (with and without the port) and every
/// literal host.
fn guarded_to_virtual_host(host: &GuardedHost) -> VirtualHost {
    let mut domains = Vec::new();
    for service in &host.services {
        domains.push(service.hostname.as_str().to_string());
        domains.push(format!("{}:{}", service.hostname, host.port));
    }
    domains.extend(host.hosts.iter().cloned());

    let name = host
        .services
        .first()
        .map(|s| s.hostname.as_str().to_string())
        .or_else(|| host.hosts.first().cloned())
        .unwrap_or_else(|| "catch-all".to_string());

    VirtualHost {
        name: format!("{name}:{}", host.port),
        domains,
        routes: host.routes.clone(),
        require_tls: TlsRequirementType::None as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Plugin, TelemetryPlugin};
    use mesh_model::specs::{Destination, DestinationWeight, HttpRoute, VirtualService};
    use mesh_model::{
        Config, ConfigMeta, ConfigSpec, ConfigStore as _, Labels, MemConfigStore,
        MemServiceDiscovery, MeshConfigStore, NetworkEndpoint, Port, Service, ServiceInstance,
    };
    use std::sync::Arc;

    const REVIEWS: &str = "reviews.default.svc.cluster.local";
    const RATINGS: &str = "ratings.default.svc.cluster.local";

    struct Fixture {
        store: Arc<MemConfigStore>,
        discovery: Arc<MemServiceDiscovery>,
        services: Vec<Arc<Service>>,
        plugins: Vec<Arc<dyn Plugin>>,
    }

    impl Fixture {
        fn new() -> Self {
            let discovery = Arc::new(MemServiceDiscovery::new());
            let reviews = discovery.add_service(Service::new(
                REVIEWS,
                vec![Port::new("http", 9080, Protocol::Http)],
            ));
            let ratings = discovery.add_service(Service::new(
                RATINGS,
                vec![Port::new("http", 9080, Protocol::Http)],
            ));
            discovery.add_instance(ServiceInstance {
                service: Arc::clone(&reviews),
                endpoint: NetworkEndpoint {
                    address: "10.0.0.1".into(),
                    port: 9080,
                    service_port: Port::new("http", 9080, Protocol::Http),
                },
                labels: Labels::new().with("app", "reviews"),
            });

            Self {
                store: Arc::new(MemConfigStore::new()),
                discovery,
                services: vec![reviews, ratings],
                plugins: vec![Arc::new(TelemetryPlugin)],
            }
        }

        fn with_ctx<T>(&self, f: impl FnOnce(&GeneratorContext<'_>) -> T) -> T {
            let typed = MeshConfigStore::new(self.store.clone());
            let ctx = GeneratorContext {
                services: &self.services,
                store: &typed,
                discovery: self.discovery.as_ref(),
                plugins: &self.plugins,
            };
            f(&ctx)
        }

        fn proxy(&self) -> Proxy {
            Proxy::parse_node_id("sidecar.10.0.0.1.reviews-v1.cluster.local").unwrap()
        }
    }

    #[test]
    fn sidecar_gets_inbound_and_outbound_listeners() {
        let fixture = Fixture::new();
        let listeners = fixture
            .with_ctx(|ctx| build_sidecar_listeners(ctx, &fixture.proxy()))
            .unwrap();

        // One inbound listener on the workload address, one outbound
        // wildcard listener for the shared HTTP port.
        assert_eq!(listeners.len(), 2);
        assert!(listeners.iter().any(|l| l.name == "http_10.0.0.1_9080"));
        assert!(listeners.iter().any(|l| l.name == "http_0.0.0.0_9080"));
    }

    #[test]
    fn route_config_covers_all_services_on_port() {
        let fixture = Fixture::new();
        let config = fixture
            .with_ctx(|ctx| build_sidecar_route_config(ctx, &fixture.proxy(), "9080"))
            .unwrap();

        assert_eq!(config.name, "9080");
        // Both services get a default virtual host.
        assert_eq!(config.virtual_hosts.len(), 2);
        let names: Vec<&str> = config
            .virtual_hosts
            .iter()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![format!("{RATINGS}:9080"), format!("{REVIEWS}:9080")]
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
        );
        // Domains carry both bare and port-qualified forms.
        assert!(config.virtual_hosts[0]
            .domains
            .contains(&format!("{RATINGS}:9080")));
    }

    #[test]
    fn route_config_applies_virtual_service() {
        let fixture = Fixture::new();
        fixture
            .store
            .create(Config::new(
                ConfigMeta::new("reviews-route", "default").with_domain("cluster.local"),
                ConfigSpec::VirtualService(VirtualService {
                    hosts: vec!["reviews".into()],
                    http: vec![HttpRoute {
                        route: vec![DestinationWeight {
                            destination: Destination {
                                host: "reviews".into(),
                                subset: "v2".into(),
                                port: None,
                            },
                            weight: 0,
                        }],
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            ))
            .unwrap();

        let config = fixture
            .with_ctx(|ctx| build_sidecar_route_config(ctx, &fixture.proxy(), "9080"))
            .unwrap();

        let reviews_vhost = config
            .virtual_hosts
            .iter()
            .find(|v| v.name.starts_with(REVIEWS))
            .expect("reviews vhost");
        // The explicit rule replaced the default route.
        let decorated = reviews_vhost.routes[0].decorator.as_ref().unwrap();
        assert_eq!(decorated.operation, "reviews-route");
    }

    #[test]
    fn unparsable_route_name_yields_empty_config() {
        let fixture = Fixture::new();
        let config = fixture
            .with_ctx(|ctx| build_sidecar_route_config(ctx, &fixture.proxy(), "not-a-port"))
            .unwrap();
        assert!(config.virtual_hosts.is_empty());
    }
}
