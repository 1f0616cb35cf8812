//! The route compiler.
//!
//! A pure function from virtual-service configs, a service index, proxy
//! labels, and a gateway-name set to an ordered list of [`GuardedHost`]s.
//! Destinations resolve to subset-keyed cluster names; hosts or ports
//! that cannot be resolved fall back to the blackhole cluster rather than
//! failing the rule. All intermediate collections are ordered so repeated
//! compilations of identical inputs produce byte-identical output.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use metrics::gauge;
use tracing::debug;

use mesh_model::specs::{
    CorsPolicy, Destination, HttpMatchRequest, HttpRetry, HttpRoute, PortSelector, StringMatch,
    VirtualService,
};
use mesh_model::{
    ClusterName, Config, ConfigSpec, Hostname, LabelsCollection, Service, TrafficDirection,
};
use mesh_proto::core::{HeaderValue, HeaderValueOption};
use mesh_proto::route::{
    route, route_action, route_match, ClusterWeight, Decorator, HeaderMatcher, RedirectAction,
    RetryPolicy, Route, RouteAction, RouteMatch, WeightedCluster,
};

/// Operation name attached to synthesized catch-all routes.
pub const DEFAULT_ROUTE_OPERATION: &str = "default-route";

/// Port assigned to virtual hosts whose virtual service matches no
/// registered service. A convention, not a contract.
pub const DEFAULT_VHOST_PORT: u16 = 80;

/// Pseudo-header carrying the request method.
pub const HEADER_METHOD: &str = ":method";
/// Pseudo-header carrying the request authority.
pub const HEADER_AUTHORITY: &str = ":authority";
/// Pseudo-header carrying the request scheme.
pub const HEADER_SCHEME: &str = ":scheme";

/// Retry conditions applied to every retry policy.
const RETRY_ON: &str = "5xx,connect-failure,refused-stream";

/// A context-dependent virtual host entry with guarded routes.
#[derive(Clone, Debug)]
pub struct GuardedHost {
    /// The capture port (service port).
    pub port: u16,
    /// Services matching the virtual host.
    pub services: Vec<Arc<Service>>,
    /// Literal host names with no matching registered service.
    pub hosts: Vec<String>,
    /// Routes of the virtual host, in rule order.
    pub routes: Vec<Route>,
}

/// An index of services by fully qualified hostname. Ordered so that
/// iteration, and therefore compiled output, is deterministic.
pub type ServiceIndex = BTreeMap<Hostname, Arc<Service>>;

/// Build a [`ServiceIndex`] from a service list.
#[must_use]
pub fn index_services(services: &[Arc<Service>]) -> ServiceIndex {
    services
        .iter()
        .map(|s| (s.hostname.clone(), Arc::clone(s)))
        .collect()
}

/// Create the entire routing table from virtual-service configs.
///
/// Emits one [`GuardedHost`] per (virtual service, HTTP port) pair, then
/// appends a default catch-all host for every registered service that no
/// virtual service covers.
#[must_use]
pub fn translate_virtual_hosts(
    service_configs: &[Config],
    services: &ServiceIndex,
    proxy_labels: &LabelsCollection,
    gateway_names: &HashSet<String>,
) -> Vec<GuardedHost> {
    let mut out = Vec::new();

    for config in service_configs {
        out.extend(translate_virtual_host(
            config,
            services,
            proxy_labels,
            gateway_names,
        ));
    }

    // Services not claimed by any virtual service get a default route.
    let mut missing: BTreeMap<&Hostname, &Arc<Service>> = services.iter().collect();
    for host in &out {
        for service in &host.services {
            missing.remove(&service.hostname);
        }
    }

    for service in missing.into_values() {
        for port in service.ports.iter() {
            if !port.protocol.is_http() {
                continue;
            }
            let cluster = ClusterName::subset_key(
                TrafficDirection::Outbound,
                "",
                &service.hostname,
                &port.name,
            );
            out.push(GuardedHost {
                port: port.port,
                services: vec![Arc::clone(service)],
                hosts: vec![],
                routes: vec![build_default_http_route(cluster)],
            });
        }
    }

    out
}

/// Split a virtual service's hosts into literal names and registered
/// services.
fn match_service_hosts(
    rule: &VirtualService,
    services: &ServiceIndex,
) -> (Vec<String>, Vec<Arc<Service>>) {
    let mut hosts = Vec::new();
    let mut matched = Vec::new();
    for host in &rule.hosts {
        match services.get(&Hostname::new(host.clone())) {
            Some(svc) => matched.push(Arc::clone(svc)),
            None => hosts.push(host.clone()),
        }
    }
    (hosts, matched)
}

/// Create the virtual hosts corresponding to one virtual service, one per
/// HTTP port its matched services listen on.
fn translate_virtual_host(
    config: &Config,
    services: &ServiceIndex,
    proxy_labels: &LabelsCollection,
    gateway_names: &HashSet<String>,
) -> Vec<GuardedHost> {
    let ConfigSpec::VirtualService(rule) = &config.spec else {
        return Vec::new();
    };

    let (hosts, matched) = match_service_hosts(rule, services);
    let mut service_by_port: BTreeMap<u16, Vec<Arc<Service>>> = BTreeMap::new();
    for svc in &matched {
        for port in svc.ports.iter() {
            if port.protocol.is_http() {
                service_by_port
                    .entry(port.port)
                    .or_default()
                    .push(Arc::clone(svc));
            }
        }
    }

    // No matched services means no port information; fall back to 80.
    if service_by_port.is_empty() {
        service_by_port.insert(DEFAULT_VHOST_PORT, Vec::new());
    }

    let mut out = Vec::new();
    for (port, port_services) in service_by_port {
        let routes = translate_routes(config, services, port, proxy_labels, gateway_names);
        if routes.is_empty() {
            debug!(
                virtual_service = %config.meta.name,
                port,
                "no routes matched; omitting virtual host"
            );
            continue;
        }
        out.push(GuardedHost {
            port,
            services: port_services,
            hosts: hosts.clone(),
            routes,
        });
    }
    out
}

/// Resolve a destination to a cluster name, or the blackhole cluster if
/// the host or port cannot be found in the index.
#[must_use]
pub fn convert_destination_to_cluster(
    destination: &Destination,
    rule_name: &str,
    services: &ServiceIndex,
    default_port: u16,
) -> ClusterName {
    let Some(svc) = services.get(&Hostname::new(destination.host.clone())) else {
        // Virtual hosts on the synthetic port-80 fallback are expected to
        // miss; don't count those against the config.
        if default_port != DEFAULT_VHOST_PORT {
            gauge!(
                "mesh_route_no_cluster_missing_service",
                "service" => destination.host.clone(),
                "rule" => rule_name.to_string()
            )
            .increment(1.0);
            debug!(
                host = %destination.host,
                rule = %rule_name,
                port = default_port,
                "destination host not in service index; using blackhole cluster"
            );
        }
        return ClusterName::blackhole();
    };

    let mut svc_port = svc.ports.get_by_port(default_port);
    if let Some(selector) = &destination.port {
        svc_port = match selector {
            PortSelector::Name(name) => svc.ports.get(name),
            PortSelector::Number(number) => svc.ports.get_by_port(*number),
        };
    }

    let Some(svc_port) = svc_port else {
        if default_port != DEFAULT_VHOST_PORT {
            gauge!(
                "mesh_route_no_cluster_missing_port",
                "service" => destination.host.clone(),
                "rule" => rule_name.to_string()
            )
            .increment(1.0);
        }
        debug!(
            host = %destination.host,
            rule = %rule_name,
            "destination port not declared; using blackhole cluster"
        );
        return ClusterName::blackhole();
    };

    ClusterName::subset_key(
        TrafficDirection::Outbound,
        &destination.subset,
        &svc.hostname,
        &svc_port.name,
    )
}

/// Create virtual host routes from one virtual service at one port.
///
/// Rules are walked in declaration order. A rule with no match clauses
/// yields a single catch-all route and ends the walk; later rules can
/// never be reached behind it. Within a rule, unmatched clauses are
/// silently skipped.
#[must_use]
pub fn translate_routes(
    config: &Config,
    services: &ServiceIndex,
    port: u16,
    proxy_labels: &LabelsCollection,
    gateway_names: &HashSet<String>,
) -> Vec<Route> {
    let ConfigSpec::VirtualService(rule) = &config.spec else {
        return Vec::new();
    };
    let operation = config.meta.name.as_str();

    let mut out = Vec::new();
    for http in &rule.http {
        if http.matches.is_empty() {
            if let Some(r) =
                translate_route(http, None, port, operation, services, proxy_labels, gateway_names)
            {
                out.push(r);
            }
            // Catch-all: any rule after this one is unreachable.
            break;
        }
        for clause in &http.matches {
            if let Some(r) = translate_route(
                http,
                Some(clause),
                port,
                operation,
                services,
                proxy_labels,
                gateway_names,
            ) {
                out.push(r);
            }
        }
    }
    out
}

/// Check the source predicate of a match clause: either one of its
/// gateways is in the active set, or the proxy labels are a superset of
/// its source labels. An absent clause matches.
fn source_match_http(
    clause: Option<&HttpMatchRequest>,
    proxy_labels: &LabelsCollection,
    gateway_names: &HashSet<String>,
) -> bool {
    let Some(clause) = clause else {
        return true;
    };
    if !clause.gateways.is_empty() {
        clause.gateways.iter().any(|g| gateway_names.contains(g))
    } else {
        proxy_labels.is_superset_of(&clause.source_labels)
    }
}

/// Translate one (rule, match clause) pair into a route, or nothing when
/// the clause does not apply to this proxy or port.
fn translate_route(
    http: &HttpRoute,
    clause: Option<&HttpMatchRequest>,
    port: u16,
    operation: &str,
    services: &ServiceIndex,
    proxy_labels: &LabelsCollection,
    gateway_names: &HashSet<String>,
) -> Option<Route> {
    if !source_match_http(clause, proxy_labels, gateway_names) {
        return None;
    }
    if let Some(pinned) = clause.and_then(|c| c.port) {
        if pinned != port {
            return None;
        }
    }

    let mut out = Route {
        r#match: Some(translate_route_match(clause)),
        decorator: Some(Decorator {
            operation: operation.to_string(),
        }),
        action: None,
    };

    if let Some(redirect) = &http.redirect {
        out.action = Some(route::Action::Redirect(RedirectAction {
            host_redirect: redirect.authority.clone(),
            path_redirect: redirect.uri.clone(),
        }));
        return Some(out);
    }

    let mut action = RouteAction {
        cors: translate_cors_policy(http.cors_policy.as_ref()),
        retry_policy: translate_retry_policy(http.retries.as_ref()),
        use_websocket: http.websocket_upgrade,
        timeout: http.timeout.map(mesh_proto::duration),
        ..Default::default()
    };

    if let Some(rewrite) = &http.rewrite {
        action.prefix_rewrite = rewrite.uri.clone();
        action.host_rewrite = rewrite.authority.clone();
    }

    for (key, value) in &http.append_headers {
        action.request_headers_to_add.push(HeaderValueOption {
            header: Some(HeaderValue {
                key: key.clone(),
                value: value.clone(),
            }),
        });
    }

    if let Some(mirror) = &http.mirror {
        let cluster = convert_destination_to_cluster(mirror, operation, services, port);
        action.request_mirror_policy = Some(mesh_proto::route::RequestMirrorPolicy {
            cluster: cluster.as_str().to_string(),
        });
    }

    let mut weighted = Vec::with_capacity(http.route.len());
    for dst in &http.route {
        // A lone destination with weight 0 receives all traffic.
        let weight = if dst.weight == 0 { 100 } else { dst.weight };
        let cluster =
            convert_destination_to_cluster(&dst.destination, operation, services, port);
        weighted.push(ClusterWeight {
            name: cluster.as_str().to_string(),
            weight,
        });
    }

    // A single destination collapses to a direct cluster reference.
    action.cluster_specifier = if weighted.len() == 1 {
        Some(route_action::ClusterSpecifier::Cluster(
            weighted.remove(0).name,
        ))
    } else {
        Some(route_action::ClusterSpecifier::WeightedClusters(
            WeightedCluster { clusters: weighted },
        ))
    };

    out.action = Some(route::Action::Route(action));
    Some(out)
}

/// Translate a match clause into a route match. The path defaults to the
/// `/` prefix; header matchers are sorted by name then value so output is
/// order-stable.
fn translate_route_match(clause: Option<&HttpMatchRequest>) -> RouteMatch {
    let mut out = RouteMatch {
        headers: Vec::new(),
        path_specifier: Some(route_match::PathSpecifier::Prefix("/".to_string())),
    };
    let Some(clause) = clause else {
        return out;
    };

    for (name, string_match) in &clause.headers {
        out.headers.push(translate_header_match(name, string_match));
    }

    if let Some(uri) = &clause.uri {
        out.path_specifier = Some(match uri {
            StringMatch::Exact(path) => route_match::PathSpecifier::Path(path.clone()),
            StringMatch::Prefix(prefix) => route_match::PathSpecifier::Prefix(prefix.clone()),
            StringMatch::Regex(regex) => route_match::PathSpecifier::Regex(regex.clone()),
        });
    }

    if let Some(method) = &clause.method {
        out.headers.push(translate_header_match(HEADER_METHOD, method));
    }
    if let Some(authority) = &clause.authority {
        out.headers
            .push(translate_header_match(HEADER_AUTHORITY, authority));
    }
    if let Some(scheme) = &clause.scheme {
        out.headers.push(translate_header_match(HEADER_SCHEME, scheme));
    }

    out.headers.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.value.cmp(&b.value))
    });

    out
}

/// Translate a string predicate on one header. Prefix matches become
/// anchored regexes so the data plane's ECMAScript engine evaluates them
/// consistently.
fn translate_header_match(name: &str, string_match: &StringMatch) -> HeaderMatcher {
    match string_match {
        StringMatch::Exact(value) => HeaderMatcher {
            name: name.to_string(),
            value: value.clone(),
            regex: false,
        },
        StringMatch::Prefix(prefix) => HeaderMatcher {
            name: name.to_string(),
            value: format!("^{}.*", regex::escape(prefix)),
            regex: true,
        },
        StringMatch::Regex(value) => HeaderMatcher {
            name: name.to_string(),
            value: value.clone(),
            regex: true,
        },
    }
}

/// Translate a retry policy; retries require a positive attempt count.
fn translate_retry_policy(retries: Option<&HttpRetry>) -> Option<RetryPolicy> {
    let retries = retries?;
    if retries.attempts == 0 {
        return None;
    }
    Some(RetryPolicy {
        retry_on: RETRY_ON.to_string(),
        num_retries: retries.attempts,
        per_try_timeout: retries.per_try_timeout.map(mesh_proto::duration),
    })
}

/// Translate a CORS policy.
fn translate_cors_policy(cors: Option<&CorsPolicy>) -> Option<mesh_proto::route::CorsPolicy> {
    let cors = cors?;
    Some(mesh_proto::route::CorsPolicy {
        allow_origin: cors.allow_origin.clone(),
        allow_methods: cors.allow_methods.join(","),
        allow_headers: cors.allow_headers.join(","),
        expose_headers: cors.expose_headers.join(","),
        max_age: cors
            .max_age
            .map(|d| d.as_secs().to_string())
            .unwrap_or_default(),
        allow_credentials: cors.allow_credentials.unwrap_or_default(),
        enabled: true,
    })
}

/// Build the catch-all route targeting a service's default cluster.
#[must_use]
pub fn build_default_http_route(cluster: ClusterName) -> Route {
    Route {
        r#match: Some(translate_route_match(None)),
        decorator: Some(Decorator {
            operation: DEFAULT_ROUTE_OPERATION.to_string(),
        }),
        action: Some(route::Action::Route(RouteAction {
            cluster_specifier: Some(route_action::ClusterSpecifier::Cluster(
                cluster.as_str().to_string(),
            )),
            ..Default::default()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_model::specs::{DestinationWeight, HttpRedirect};
    use mesh_model::{ConfigMeta, Labels, Port, Protocol};
    use std::time::Duration;

    fn service(host: &str) -> Arc<Service> {
        Arc::new(Service::new(
            host,
            vec![
                Port::new("http", 9080, Protocol::Http),
                Port::new("tcp", 9090, Protocol::Tcp),
            ],
        ))
    }

    fn index(hosts: &[&str]) -> ServiceIndex {
        index_services(&hosts.iter().map(|h| service(h)).collect::<Vec<_>>())
    }

    fn vs_config(name: &str, spec: VirtualService) -> Config {
        Config::new(
            ConfigMeta::new(name, "default"),
            ConfigSpec::VirtualService(spec),
        )
    }

    fn weighted(host: &str, subset: &str, weight: u32) -> DestinationWeight {
        DestinationWeight {
            destination: Destination {
                host: host.into(),
                subset: subset.into(),
                port: None,
            },
            weight,
        }
    }

    fn mesh_gateways() -> HashSet<String> {
        ["mesh".to_string()].into()
    }

    const REVIEWS: &str = "reviews.default.svc.cluster.local";

    #[test]
    fn default_route_for_uncovered_service() {
        let services = index(&[REVIEWS]);
        let hosts =
            translate_virtual_hosts(&[], &services, &LabelsCollection::new(), &mesh_gateways());

        // One vhost for the single HTTP port; the TCP port is skipped.
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].port, 9080);
        assert_eq!(hosts[0].routes.len(), 1);

        let route = &hosts[0].routes[0];
        assert_eq!(
            route.decorator.as_ref().unwrap().operation,
            DEFAULT_ROUTE_OPERATION
        );
        let Some(route::Action::Route(action)) = &route.action else {
            panic!("expected a forwarding action");
        };
        let Some(route_action::ClusterSpecifier::Cluster(cluster)) = &action.cluster_specifier
        else {
            panic!("expected a direct cluster");
        };
        assert_eq!(cluster, &format!("outbound||{REVIEWS}|http"));
    }

    #[test]
    fn covered_service_gets_no_default_route() {
        let services = index(&[REVIEWS]);
        let config = vs_config(
            "reviews",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![HttpRoute {
                    route: vec![weighted(REVIEWS, "", 0)],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let hosts = translate_virtual_hosts(
            &[config],
            &services,
            &LabelsCollection::new(),
            &mesh_gateways(),
        );
        assert_eq!(hosts.len(), 1);
        assert_ne!(
            hosts[0].routes[0].decorator.as_ref().unwrap().operation,
            DEFAULT_ROUTE_OPERATION
        );
    }

    #[test]
    fn blackhole_when_every_host_unresolved() {
        let services = index(&[REVIEWS]);
        let config = vs_config(
            "ghost",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![HttpRoute {
                    route: vec![
                        weighted("ghost.default.svc.cluster.local", "", 50),
                        weighted("phantom.default.svc.cluster.local", "", 50),
                    ],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let routes = translate_routes(
            &config,
            &services,
            9080,
            &LabelsCollection::new(),
            &mesh_gateways(),
        );
        assert_eq!(routes.len(), 1);
        let Some(route::Action::Route(action)) = &routes[0].action else {
            panic!("expected a forwarding action");
        };
        let Some(route_action::ClusterSpecifier::WeightedClusters(wc)) = &action.cluster_specifier
        else {
            panic!("expected weighted clusters");
        };
        assert!(wc
            .clusters
            .iter()
            .all(|c| c.name == mesh_model::BLACKHOLE_CLUSTER));
    }

    #[test]
    fn zero_weight_single_destination_normalized() {
        let services = index(&[REVIEWS]);
        let config = vs_config(
            "reviews",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![HttpRoute {
                    route: vec![weighted(REVIEWS, "v1", 0)],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let routes = translate_routes(
            &config,
            &services,
            9080,
            &LabelsCollection::new(),
            &mesh_gateways(),
        );
        let Some(route::Action::Route(action)) = &routes[0].action else {
            panic!("expected a forwarding action");
        };
        // Single destination collapses to a direct cluster reference.
        let Some(route_action::ClusterSpecifier::Cluster(cluster)) = &action.cluster_specifier
        else {
            panic!("expected a direct cluster");
        };
        assert_eq!(cluster, &format!("outbound|v1|{REVIEWS}|http"));
    }

    #[test]
    fn weighted_split_preserved() {
        let services = index(&[REVIEWS]);
        let config = vs_config(
            "reviews",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![HttpRoute {
                    route: vec![weighted(REVIEWS, "v1", 75), weighted(REVIEWS, "v2", 25)],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let routes = translate_routes(
            &config,
            &services,
            9080,
            &LabelsCollection::new(),
            &mesh_gateways(),
        );
        let Some(route::Action::Route(action)) = &routes[0].action else {
            panic!("expected a forwarding action");
        };
        let Some(route_action::ClusterSpecifier::WeightedClusters(wc)) = &action.cluster_specifier
        else {
            panic!("expected weighted clusters");
        };
        assert_eq!(wc.clusters.len(), 2);
        assert_eq!(wc.clusters[0].weight, 75);
        assert_eq!(wc.clusters[1].weight, 25);
    }

    #[test]
    fn catch_all_rule_short_circuits() {
        let services = index(&[REVIEWS]);
        let config = vs_config(
            "reviews",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![
                    HttpRoute {
                        route: vec![weighted(REVIEWS, "v1", 0)],
                        ..Default::default()
                    },
                    // Unreachable behind the catch-all above.
                    HttpRoute {
                        route: vec![weighted(REVIEWS, "v2", 0)],
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
        );

        let routes = translate_routes(
            &config,
            &services,
            9080,
            &LabelsCollection::new(),
            &mesh_gateways(),
        );
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn header_match_and_sorting() {
        let clause = HttpMatchRequest {
            headers: BTreeMap::from([
                ("version".to_string(), StringMatch::Exact("v2".into())),
                ("foo".to_string(), StringMatch::Regex("^bar.*$".into())),
            ]),
            method: Some(StringMatch::Exact("GET".into())),
            ..Default::default()
        };
        let m = translate_route_match(Some(&clause));

        let names: Vec<&str> = m.headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec![HEADER_METHOD, "foo", "version"]);
        assert!(m.headers[1].regex);
        assert!(!m.headers[2].regex);
    }

    #[test]
    fn prefix_header_match_becomes_anchored_regex() {
        let matcher = translate_header_match("x-user", &StringMatch::Prefix("test.user".into()));
        assert!(matcher.regex);
        assert_eq!(matcher.value, "^test\\.user.*");
    }

    #[test]
    fn port_predicate_filters_clause() {
        let services = index(&[REVIEWS]);
        let config = vs_config(
            "reviews",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![HttpRoute {
                    matches: vec![HttpMatchRequest {
                        port: Some(7070),
                        ..Default::default()
                    }],
                    route: vec![weighted(REVIEWS, "", 0)],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let routes = translate_routes(
            &config,
            &services,
            9080,
            &LabelsCollection::new(),
            &mesh_gateways(),
        );
        assert!(routes.is_empty());
    }

    #[test]
    fn source_labels_gate_routes() {
        let services = index(&[REVIEWS]);
        let config = vs_config(
            "reviews",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![HttpRoute {
                    matches: vec![HttpMatchRequest {
                        source_labels: Labels::new().with("app", "frontend"),
                        ..Default::default()
                    }],
                    route: vec![weighted(REVIEWS, "", 0)],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let frontend: LabelsCollection = vec![Labels::new().with("app", "frontend")].into();
        let backend: LabelsCollection = vec![Labels::new().with("app", "backend")].into();

        let matched = translate_routes(&config, &services, 9080, &frontend, &mesh_gateways());
        assert_eq!(matched.len(), 1);
        let unmatched = translate_routes(&config, &services, 9080, &backend, &mesh_gateways());
        assert!(unmatched.is_empty());
    }

    #[test]
    fn redirect_takes_precedence() {
        let services = index(&[REVIEWS]);
        let config = vs_config(
            "redirect",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![HttpRoute {
                    redirect: Some(HttpRedirect {
                        uri: "/new/path".into(),
                        authority: "b".into(),
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let routes = translate_routes(
            &config,
            &services,
            9080,
            &LabelsCollection::new(),
            &mesh_gateways(),
        );
        let Some(route::Action::Redirect(redirect)) = &routes[0].action else {
            panic!("expected a redirect action");
        };
        assert_eq!(redirect.host_redirect, "b");
        assert_eq!(redirect.path_redirect, "/new/path");
    }

    #[test]
    fn retry_requires_positive_attempts() {
        assert!(translate_retry_policy(Some(&HttpRetry {
            attempts: 0,
            per_try_timeout: None,
        }))
        .is_none());

        let policy = translate_retry_policy(Some(&HttpRetry {
            attempts: 3,
            per_try_timeout: Some(Duration::from_secs(2)),
        }))
        .expect("policy");
        assert_eq!(policy.num_retries, 3);
        assert_eq!(policy.retry_on, RETRY_ON);
        assert_eq!(policy.per_try_timeout.unwrap().seconds, 2);
    }

    #[test]
    fn mirror_resolves_to_cluster() {
        let services = index(&[REVIEWS]);
        let config = vs_config(
            "mirror",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![HttpRoute {
                    route: vec![weighted(REVIEWS, "", 0)],
                    mirror: Some(Destination {
                        host: REVIEWS.into(),
                        subset: "v2".into(),
                        port: None,
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let routes = translate_routes(
            &config,
            &services,
            9080,
            &LabelsCollection::new(),
            &mesh_gateways(),
        );
        let Some(route::Action::Route(action)) = &routes[0].action else {
            panic!("expected a forwarding action");
        };
        assert_eq!(
            action.request_mirror_policy.as_ref().unwrap().cluster,
            format!("outbound|v2|{REVIEWS}|http")
        );
    }

    #[test]
    fn destination_port_selector() {
        let services = index(&[REVIEWS]);
        let by_name = Destination {
            host: REVIEWS.into(),
            subset: String::new(),
            port: Some(PortSelector::Name("http".into())),
        };
        let by_number = Destination {
            host: REVIEWS.into(),
            subset: String::new(),
            port: Some(PortSelector::Number(9080)),
        };
        let unknown = Destination {
            host: REVIEWS.into(),
            subset: String::new(),
            port: Some(PortSelector::Number(1)),
        };

        assert_eq!(
            convert_destination_to_cluster(&by_name, "r", &services, 9080).as_str(),
            format!("outbound||{REVIEWS}|http")
        );
        assert_eq!(
            convert_destination_to_cluster(&by_number, "r", &services, 9080).as_str(),
            format!("outbound||{REVIEWS}|http")
        );
        assert!(convert_destination_to_cluster(&unknown, "r", &services, 9080).is_blackhole());
    }

    #[test]
    fn compilation_is_deterministic() {
        let services = index(&[
            REVIEWS,
            "ratings.default.svc.cluster.local",
            "details.default.svc.cluster.local",
        ]);
        let configs = vec![vs_config(
            "reviews",
            VirtualService {
                hosts: vec![REVIEWS.into()],
                http: vec![HttpRoute {
                    route: vec![weighted(REVIEWS, "v1", 60), weighted(REVIEWS, "v2", 40)],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )];

        let labels = LabelsCollection::new();
        let run = || {
            translate_virtual_hosts(&configs, &services, &labels, &mesh_gateways())
                .iter()
                .flat_map(|h| {
                    h.routes.iter().map(|r| format!("{}:{:?}", h.port, r))
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
