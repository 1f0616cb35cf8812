//! Gateway merging and gateway listener assembly.
//!
//! Gateways selected by a router workload's labels are merged by port;
//! each (port, servers) group becomes one listener whose filter chains
//! come from the route compiler (HTTP family) or from L4 match resolution
//! (TCP). Listeners that fail a plugin or marshal step are omitted
//! individually so one bad server cannot take down the rest.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use mesh_model::specs::{
    Destination, GatewayServer, L4MatchAttributes, PortSelector, ServerTlsMode,
};
use mesh_model::{
    resolve_shortname_to_fqdn, ClusterName, Config, ConfigSpec, Hostname, LabelsCollection,
    ModelError, Protocol, Proxy, TrafficDirection,
};
use mesh_proto::listener::{
    DownstreamTlsContext, Filter, HttpDirection, Listener, TcpProxy,
};
use mesh_proto::route::{RouteConfiguration, TlsRequirementType, VirtualHost};
use mesh_proto::core::{
    CertificateValidationContext, CommonTlsContext, DataSource, TlsCertificate,
};
use mesh_proto::{to_any, type_urls};

use crate::listener::{
    build_listener, marshal_filters, FilterChainOpts, HttpChainOpts, ListenerOpts,
    WILDCARD_ADDRESS,
};
use crate::plugin::{ListenerClass, MutableListener, PluginParams};
use crate::route::{index_services, translate_routes};
use crate::GeneratorContext;

/// Gateways bound to one workload, merged by port.
#[derive(Debug, Default)]
pub struct MergedGateway {
    /// Fully qualified names of the merged gateway configs.
    pub names: HashSet<String>,
    /// Servers grouped by port number. All servers on one port share a
    /// protocol; later conflicting servers are dropped.
    pub servers: BTreeMap<u16, Vec<GatewayServer>>,
}

/// Merge gateway configs by port.
#[must_use]
pub fn merge_gateways(configs: &[Config]) -> MergedGateway {
    let mut merged = MergedGateway::default();
    for config in configs {
        let ConfigSpec::Gateway(gateway) = &config.spec else {
            continue;
        };
        merged.names.insert(
            resolve_shortname_to_fqdn(&config.meta.name, &config.meta)
                .as_str()
                .to_string(),
        );
        for server in &gateway.servers {
            let existing = merged.servers.entry(server.port.number).or_default();
            if let Some(first) = existing.first() {
                if !first.port.protocol.eq_ignore_ascii_case(&server.port.protocol) {
                    warn!(
                        gateway = %config.meta.name,
                        port = server.port.number,
                        protocol = %server.port.protocol,
                        "conflicting protocol on merged gateway port; dropping server"
                    );
                    continue;
                }
            }
            existing.push(server.clone());
        }
    }
    merged
}

/// Build the listeners for a router/gateway workload.
pub fn build_gateway_listeners(
    ctx: &GeneratorContext<'_>,
    proxy: &Proxy,
) -> Result<Vec<Listener>, ModelError> {
    let instances = ctx.discovery.get_proxy_service_instances(proxy)?;
    let workload_labels: LabelsCollection =
        instances.iter().map(|i| i.labels.clone()).collect();

    let gateways = ctx.store.gateways(&workload_labels);
    if gateways.is_empty() {
        debug!(proxy = %proxy.id, "no gateways bound to workload");
        return Ok(Vec::new());
    }
    let merged = merge_gateways(&gateways);

    let mut listeners = Vec::new();
    for (&port, servers) in &merged.servers {
        let protocol = Protocol::parse(&servers[0].port.protocol);
        let filter_chain_opts = match protocol {
            Protocol::Http | Protocol::Http2 | Protocol::Grpc | Protocol::Https => {
                gateway_http_chain_opts(ctx, servers, &merged.names)
            }
            _ => gateway_tcp_chain_opts(ctx, servers, &merged.names),
        };
        if filter_chain_opts.is_empty() {
            debug!(port, "no usable filter chains for gateway port");
            continue;
        }

        let mut opts = ListenerOpts {
            bind_address: WILDCARD_ADDRESS.into(),
            port,
            protocol,
            filter_chain_opts,
        };
        // One filter chain means at most one certificate, so SNI carries
        // no information.
        if opts.filter_chain_opts.len() == 1 {
            if let Some(tls) = &mut opts.filter_chain_opts[0].tls_context {
                tls.require_sni = false;
            }
        }

        let class = if protocol.is_http() || protocol == Protocol::Https {
            ListenerClass::Http
        } else {
            ListenerClass::Tcp
        };
        let mut mutable = MutableListener::new(build_listener(&opts));
        let params = PluginParams {
            class,
            proxy,
            instances: &instances,
            store: ctx.store,
        };

        let mut omitted = false;
        for plugin in ctx.plugins {
            if let Err(err) = plugin.on_listener(&params, &mut mutable) {
                warn!(listener = %mutable.listener.name, error = %err, "omitting listener");
                omitted = true;
                break;
            }
        }
        if omitted {
            continue;
        }

        if let Err(err) = marshal_filters(&mut mutable.listener, &opts, &mutable.chains) {
            warn!(error = %err, "omitting listener");
            continue;
        }
        listeners.push(mutable.listener);
    }
    Ok(listeners)
}

/// Filter chains for an HTTP-family gateway port: one chain per server,
/// each with its own route configuration compiled from the virtual
/// services bound to the merged gateways.
fn gateway_http_chain_opts(
    ctx: &GeneratorContext<'_>,
    servers: &[GatewayServer],
    gateway_names: &HashSet<String>,
) -> Vec<FilterChainOpts> {
    let mut out = Vec::with_capacity(servers.len());
    for (index, server) in servers.iter().enumerate() {
        let Some(mut route_config) = build_gateway_route_config(ctx, server, gateway_names)
        else {
            debug!(
                port = server.port.number,
                chain = index,
                "omitting gateway chain with no routes"
            );
            continue;
        };
        if server.tls.as_ref().is_some_and(|tls| tls.https_redirect) {
            for vhost in &mut route_config.virtual_hosts {
                vhost.require_tls = TlsRequirementType::ExternalOnly as i32;
            }
        }
        out.push(FilterChainOpts {
            sni_hosts: server.hosts.clone(),
            tls_context: gateway_tls_context(server),
            http: Some(HttpChainOpts {
                route_config: Some(route_config),
                rds_route_name: String::new(),
                use_remote_address: true,
                // Viewed as from gateway to internal services.
                direction: HttpDirection::Egress,
            }),
            network_filters: Vec::new(),
        });
    }
    out
}

/// The route configuration of one gateway server: a virtual host per
/// bound virtual service that yields routes at the server's port.
fn build_gateway_route_config(
    ctx: &GeneratorContext<'_>,
    server: &GatewayServer,
    gateway_names: &HashSet<String>,
) -> Option<RouteConfiguration> {
    let port = server.port.number;
    let services = index_services(ctx.services);
    let virtual_services = ctx.store.virtual_services(gateway_names);

    let mut virtual_hosts = Vec::with_capacity(virtual_services.len());
    for config in &virtual_services {
        let routes = translate_routes(
            config,
            &services,
            port,
            &LabelsCollection::new(),
            gateway_names,
        );
        if routes.is_empty() {
            debug!(
                virtual_service = %config.meta.name,
                port,
                "no gateway routes for virtual service"
            );
            continue;
        }
        let ConfigSpec::VirtualService(rule) = &config.spec else {
            continue;
        };
        virtual_hosts.push(VirtualHost {
            name: format!("{}:{}", config.meta.name, port),
            domains: rule.hosts.clone(),
            routes,
            require_tls: TlsRequirementType::None as i32,
        });
    }

    if virtual_hosts.is_empty() {
        return None;
    }
    virtual_hosts.sort_by(|a, b| a.name.cmp(&b.name));
    Some(RouteConfiguration {
        name: port.to_string(),
        virtual_hosts,
        validate_clusters: false,
    })
}

/// The downstream TLS context of a gateway server; passthrough servers
/// terminate nothing.
fn gateway_tls_context(server: &GatewayServer) -> Option<DownstreamTlsContext> {
    let tls = server.tls.as_ref()?;
    if tls.mode == ServerTlsMode::Passthrough {
        return None;
    }
    Some(DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_certificates: vec![TlsCertificate {
                certificate_chain: Some(DataSource::file(tls.server_certificate.clone())),
                private_key: Some(DataSource::file(tls.private_key.clone())),
            }],
            validation_context: Some(CertificateValidationContext {
                trusted_ca: Some(DataSource::file(tls.ca_certificates.clone())),
                verify_subject_alt_name: tls.subject_alt_names.clone(),
            }),
            alpn_protocols: vec!["h2".into(), "http/1.1".into()],
        }),
        require_sni: true,
    })
}

/// Filter chains for a TCP gateway port: network filters per destination
/// host, de-duplicated by host.
fn gateway_tcp_chain_opts(
    ctx: &GeneratorContext<'_>,
    servers: &[GatewayServer],
    gateway_names: &HashSet<String>,
) -> Vec<FilterChainOpts> {
    let mut out = Vec::new();
    for server in servers {
        let network_filters = gateway_network_filters(ctx, server, gateway_names);
        if network_filters.is_empty() {
            continue;
        }
        out.push(FilterChainOpts {
            sni_hosts: server.hosts.clone(),
            tls_context: gateway_tls_context(server),
            http: None,
            network_filters,
        });
    }
    out
}

/// Network filters for one TCP server: a TCP proxy per destination drawn
/// from the virtual services that match the server's hosts and L4
/// predicates.
fn gateway_network_filters(
    ctx: &GeneratorContext<'_>,
    server: &GatewayServer,
    gateway_names: &HashSet<String>,
) -> Vec<Filter> {
    let destinations = tcp_downstream_destinations(ctx, server, gateway_names);

    // De-dupe by destination host; the last declaration wins.
    let mut by_host: BTreeMap<String, Destination> = BTreeMap::new();
    for destination in destinations {
        by_host.insert(destination.host.clone(), destination);
    }

    let mut filters = Vec::with_capacity(by_host.len());
    for (host, destination) in by_host {
        match ctx.discovery.get_service(&Hostname::new(host.clone())) {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                debug!(%host, "no upstream service for TCP destination");
                continue;
            }
        }
        let port_name = match &destination.port {
            Some(PortSelector::Name(name)) => name.clone(),
            _ => String::new(),
        };
        let cluster = ClusterName::subset_key(
            TrafficDirection::Outbound,
            &destination.subset,
            &Hostname::new(host),
            &port_name,
        );
        let proxy = TcpProxy {
            stat_prefix: cluster.as_str().to_string(),
            cluster: cluster.as_str().to_string(),
        };
        filters.push(Filter {
            name: mesh_proto::listener::filter_names::TCP_PROXY.into(),
            typed_config: Some(to_any(&proxy, type_urls::TCP_PROXY)),
        });
    }
    filters
}

/// Destinations of the TCP rules in virtual services matching the
/// server's hosts and L4 predicates.
fn tcp_downstream_destinations(
    ctx: &GeneratorContext<'_>,
    server: &GatewayServer,
    gateway_names: &HashSet<String>,
) -> Vec<Destination> {
    let server_hosts: HashSet<&str> = server.hosts.iter().map(String::as_str).collect();

    let mut out = Vec::new();
    for config in ctx.store.virtual_services(gateway_names) {
        let ConfigSpec::VirtualService(rule) = &config.spec else {
            continue;
        };
        if !rule.hosts.iter().any(|h| server_hosts.contains(h.as_str())) {
            continue;
        }
        for tcp in &rule.tcp {
            if l4_match(&tcp.matches, server, gateway_names) {
                out.extend(tcp.route.iter().map(|w| w.destination.clone()));
            }
        }
    }
    out
}

/// Evaluate a rule's L4 predicates against a server. Predicates in the
/// list are OR'd; the fields within one predicate are AND'd. An empty
/// list matches.
fn l4_match(
    predicates: &[L4MatchAttributes],
    server: &GatewayServer,
    gateway_names: &HashSet<String>,
) -> bool {
    if predicates.is_empty() {
        return true;
    }
    predicates.iter().any(|predicate| {
        let port_match = match predicate.port {
            Some(port) => port == server.port.number,
            None => true,
        };
        let gateway_match = predicate.gateways.is_empty()
            || predicate.gateways.iter().any(|g| gateway_names.contains(g));
        port_match && gateway_match
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{AuthnPlugin, Plugin, TelemetryPlugin};
    use mesh_model::specs::{
        DestinationWeight, Gateway as GatewaySpec, HttpRoute, ServerPort, ServerTlsSettings,
        TcpRoute, VirtualService,
    };
    use mesh_model::{
        ConfigMeta, ConfigStore as _, Labels, MemConfigStore, MemServiceDiscovery,
        MeshConfigStore, NetworkEndpoint, Port, Service, ServiceInstance,
    };
    use std::sync::Arc;

    const SHOP: &str = "shop.default.svc.cluster.local";

    struct Fixture {
        store: Arc<MemConfigStore>,
        discovery: Arc<MemServiceDiscovery>,
        services: Vec<Arc<Service>>,
        plugins: Vec<Arc<dyn Plugin>>,
    }

    impl Fixture {
        fn new() -> Self {
            let discovery = Arc::new(MemServiceDiscovery::new());
            let svc = discovery.add_service(Service::new(
                SHOP,
                vec![
                    Port::new("http", 8080, Protocol::Http),
                    Port::new("tcp", 9000, Protocol::Tcp),
                ],
            ));
            // The router workload itself.
            let gw_svc = discovery.add_service(Service::new(
                "gateway.default.svc.cluster.local",
                vec![Port::new("http", 80, Protocol::Http)],
            ));
            discovery.add_instance(ServiceInstance {
                service: gw_svc,
                endpoint: NetworkEndpoint {
                    address: "172.16.0.8".into(),
                    port: 80,
                    service_port: Port::new("http", 80, Protocol::Http),
                },
                labels: Labels::new().with("app", "my-gateway"),
            });

            Self {
                store: Arc::new(MemConfigStore::new()),
                discovery,
                services: vec![svc],
                plugins: vec![Arc::new(AuthnPlugin), Arc::new(TelemetryPlugin)],
            }
        }

        fn add_gateway(&self, name: &str, server: GatewayServer) {
            self.store
                .create(Config::new(
                    ConfigMeta::new(name, "default").with_domain("cluster.local"),
                    ConfigSpec::Gateway(GatewaySpec {
                        servers: vec![server],
                        selector: Labels::new().with("app", "my-gateway"),
                    }),
                ))
                .unwrap();
        }

        fn add_virtual_service(&self, name: &str, gateways: &[&str], spec: VirtualService) {
            let mut spec = spec;
            spec.gateways = gateways.iter().map(|s| s.to_string()).collect();
            self.store
                .create(Config::new(
                    ConfigMeta::new(name, "default").with_domain("cluster.local"),
                    ConfigSpec::VirtualService(spec),
                ))
                .unwrap();
        }

        fn listeners(&self) -> Vec<Listener> {
            let typed = MeshConfigStore::new(self.store.clone());
            let ctx = GeneratorContext {
                services: &self.services,
                store: &typed,
                discovery: self.discovery.as_ref(),
                plugins: &self.plugins,
            };
            let proxy =
                Proxy::parse_node_id("router.172.16.0.8.gateway.cluster.local").unwrap();
            build_gateway_listeners(&ctx, &proxy).unwrap()
        }
    }

    fn http_server(port: u16) -> GatewayServer {
        GatewayServer {
            port: ServerPort {
                number: port,
                name: format!("http-{port}"),
                protocol: "HTTP".into(),
            },
            hosts: vec!["shop.example.com".into()],
            tls: None,
        }
    }

    fn shop_route() -> VirtualService {
        VirtualService {
            hosts: vec!["shop.example.com".into(), SHOP.into()],
            http: vec![HttpRoute {
                route: vec![DestinationWeight {
                    destination: Destination {
                        host: SHOP.into(),
                        ..Default::default()
                    },
                    weight: 0,
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn merge_groups_servers_by_port() {
        let meta = |name: &str| ConfigMeta::new(name, "default").with_domain("cluster.local");
        let gw = |name: &str, port: u16, protocol: &str| {
            Config::new(
                meta(name),
                ConfigSpec::Gateway(GatewaySpec {
                    servers: vec![GatewayServer {
                        port: ServerPort {
                            number: port,
                            name: format!("{protocol}-{port}"),
                            protocol: protocol.into(),
                        },
                        hosts: vec!["*".into()],
                        tls: None,
                    }],
                    selector: Labels::new(),
                }),
            )
        };

        let merged = merge_gateways(&[
            gw("a", 80, "HTTP"),
            gw("b", 80, "HTTP"),
            gw("c", 80, "TCP"), // conflicting protocol, dropped
            gw("d", 9000, "TCP"),
        ]);

        assert_eq!(merged.servers[&80].len(), 2);
        assert_eq!(merged.servers[&9000].len(), 1);
        assert!(merged
            .names
            .contains("a.default.svc.cluster.local"));
    }

    #[test]
    fn http_gateway_builds_inline_routes() {
        let fixture = Fixture::new();
        fixture.add_gateway("my-gateway", http_server(80));
        fixture.add_virtual_service("shop", &["my-gateway"], shop_route());

        let listeners = fixture.listeners();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].name, "http_0.0.0.0_80");
        assert_eq!(listeners[0].filter_chains.len(), 1);
        // HCM terminal filter carries the compiled route config.
        assert_eq!(listeners[0].filter_chains[0].filters.len(), 1);
    }

    #[test]
    fn gateway_without_routes_is_omitted() {
        let fixture = Fixture::new();
        fixture.add_gateway("my-gateway", http_server(80));
        // No virtual service bound to the gateway.
        assert!(fixture.listeners().is_empty());
    }

    #[test]
    fn https_redirect_marks_vhosts() {
        let fixture = Fixture::new();
        let mut server = http_server(443);
        server.port.protocol = "HTTPS".into();
        server.tls = Some(ServerTlsSettings {
            https_redirect: true,
            server_certificate: "/etc/certs/server.pem".into(),
            private_key: "/etc/certs/key.pem".into(),
            ..Default::default()
        });
        fixture.add_gateway("my-gateway", server);
        fixture.add_virtual_service("shop", &["my-gateway"], shop_route());

        let typed = MeshConfigStore::new(fixture.store.clone());
        let ctx = GeneratorContext {
            services: &fixture.services,
            store: &typed,
            discovery: fixture.discovery.as_ref(),
            plugins: &fixture.plugins,
        };
        let names: HashSet<String> =
            ["my-gateway.default.svc.cluster.local".to_string()].into();
        let mut server = http_server(443);
        server.tls = Some(ServerTlsSettings {
            https_redirect: true,
            ..Default::default()
        });
        let chains = gateway_http_chain_opts(&ctx, &[server], &names);
        assert_eq!(chains.len(), 1);
        let route_config = chains[0]
            .http
            .as_ref()
            .unwrap()
            .route_config
            .as_ref()
            .unwrap();
        assert!(route_config
            .virtual_hosts
            .iter()
            .all(|vh| vh.require_tls == TlsRequirementType::ExternalOnly as i32));
    }

    #[test]
    fn single_chain_does_not_require_sni() {
        let fixture = Fixture::new();
        let mut server = http_server(443);
        server.port.protocol = "HTTPS".into();
        server.tls = Some(ServerTlsSettings {
            server_certificate: "/etc/certs/server.pem".into(),
            private_key: "/etc/certs/key.pem".into(),
            ca_certificates: "/etc/certs/root.pem".into(),
            ..Default::default()
        });
        fixture.add_gateway("my-gateway", server);
        fixture.add_virtual_service("shop", &["my-gateway"], shop_route());

        let listeners = fixture.listeners();
        assert_eq!(listeners.len(), 1);
        let tls = listeners[0].filter_chains[0].tls_context.as_ref().unwrap();
        assert!(!tls.require_sni);
    }

    #[test]
    fn tcp_gateway_dedupes_by_host() {
        let fixture = Fixture::new();
        let server = GatewayServer {
            port: ServerPort {
                number: 9000,
                name: "tcp".into(),
                protocol: "TCP".into(),
            },
            hosts: vec![SHOP.into()],
            tls: None,
        };
        fixture.add_gateway("my-gateway", server);

        let tcp_dest = |subset: &str| DestinationWeight {
            destination: Destination {
                host: SHOP.into(),
                subset: subset.into(),
                port: Some(PortSelector::Name("tcp".into())),
            },
            weight: 0,
        };
        fixture.add_virtual_service(
            "shop-tcp",
            &["my-gateway"],
            VirtualService {
                hosts: vec![SHOP.into()],
                tcp: vec![TcpRoute {
                    matches: vec![L4MatchAttributes {
                        port: Some(9000),
                        gateways: vec![],
                    }],
                    // Two routes to the same host collapse to one filter.
                    route: vec![tcp_dest("v1"), tcp_dest("v2")],
                }],
                http: vec![HttpRoute {
                    route: vec![DestinationWeight {
                        destination: Destination {
                            host: SHOP.into(),
                            ..Default::default()
                        },
                        weight: 0,
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let listeners = fixture.listeners();
        let tcp_listener = listeners
            .iter()
            .find(|l| l.name.starts_with("tcp"))
            .expect("tcp listener");
        assert_eq!(tcp_listener.filter_chains[0].filters.len(), 1);
    }

    #[test]
    fn l4_predicates() {
        let server = GatewayServer {
            port: ServerPort {
                number: 9000,
                name: "tcp".into(),
                protocol: "TCP".into(),
            },
            hosts: vec![],
            tls: None,
        };
        let names: HashSet<String> = ["gw".to_string()].into();

        assert!(l4_match(&[], &server, &names));
        assert!(l4_match(
            &[L4MatchAttributes {
                port: Some(9000),
                gateways: vec![]
            }],
            &server,
            &names
        ));
        assert!(!l4_match(
            &[L4MatchAttributes {
                port: Some(9001),
                gateways: vec![]
            }],
            &server,
            &names
        ));
        assert!(l4_match(
            &[L4MatchAttributes {
                port: None,
                gateways: vec!["gw".into()]
            }],
            &server,
            &names
        ));
        assert!(!l4_match(
            &[L4MatchAttributes {
                port: Some(9000),
                gateways: vec!["other".into()]
            }],
            &server,
            &names
        ));
    }
}
