//! The cluster generator.
//!
//! Composes upstream cluster specs from the service index and destination
//! rules: discovery type from the service's resolution mode, load
//! balancing and circuit breaking from the rule's traffic policy, one
//! extra cluster per declared subset, and an upstream mTLS context when
//! the consolidated authentication policy requires it.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use mesh_model::specs::{
    ClientTlsMode, DestinationRule as DestinationRuleSpec, SimpleLb, TrafficPolicy,
};
use mesh_model::{
    ClusterName, ConfigSpec, MeshConfigStore, Port, Resolution, Service, ServiceDiscovery,
    ServiceInstance, TrafficDirection,
};
use mesh_proto::cluster::{
    CircuitBreakerThresholds, CircuitBreakers, Cluster, DiscoveryType, LbPolicy, OutlierDetection,
    UpstreamTlsContext,
};
use mesh_proto::core::{
    Address, CertificateValidationContext, CommonTlsContext, DataSource, TlsCertificate,
};

/// Connect timeout applied when no traffic policy overrides it.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Paths where the sidecar's mesh certificates are mounted.
const CERT_CHAIN: &str = "/etc/certs/cert-chain.pem";
const PRIVATE_KEY: &str = "/etc/certs/key.pem";
const ROOT_CERT: &str = "/etc/certs/root-cert.pem";

/// Inputs to cluster generation.
pub struct ClusterContext<'a> {
    /// All services, in a deterministic order.
    pub services: &'a [Arc<Service>],
    /// Typed config view for destination rules and auth policies.
    pub store: &'a MeshConfigStore,
    /// Registry, for service accounts used as TLS SANs.
    pub discovery: &'a dyn ServiceDiscovery,
}

/// Build the outbound cluster set: one cluster per (service, port) plus
/// one per declared subset.
#[must_use]
pub fn build_outbound_clusters(ctx: &ClusterContext<'_>) -> Vec<Cluster> {
    let mut out = Vec::new();

    for service in ctx.services {
        let rule = ctx.store.destination_rule(&service.hostname);
        let rule_spec = rule.as_ref().and_then(|c| match &c.spec {
            ConfigSpec::DestinationRule(dr) => Some(dr),
            _ => None,
        });

        for port in service.ports.iter() {
            let name = ClusterName::subset_key(
                TrafficDirection::Outbound,
                "",
                &service.hostname,
                &port.name,
            );
            let mut cluster = base_cluster(name, service, port);
            apply_traffic_policy(
                &mut cluster,
                rule_spec.and_then(|r| r.traffic_policy.as_ref()),
            );
            apply_mesh_tls(&mut cluster, ctx, service, port);
            out.push(cluster);

            if let Some(rule_spec) = rule_spec {
                out.extend(subset_clusters(ctx, service, port, rule_spec));
            }
        }
    }

    trace!(count = out.len(), "built outbound clusters");
    out
}

/// Build the inbound cluster set for a proxy's own workload instances.
/// Inbound clusters point at the local workload and never use TLS.
#[must_use]
pub fn build_inbound_clusters(instances: &[ServiceInstance]) -> Vec<Cluster> {
    let mut out: Vec<Cluster> = Vec::new();
    for instance in instances {
        let name = ClusterName::subset_key(
            TrafficDirection::Inbound,
            "",
            &instance.service.hostname,
            &instance.endpoint.service_port.name,
        );
        if out.iter().any(|c| c.name == name.as_str()) {
            continue;
        }
        out.push(Cluster {
            name: name.as_str().to_string(),
            r#type: DiscoveryType::Static as i32,
            connect_timeout: Some(mesh_proto::duration(DEFAULT_CONNECT_TIMEOUT)),
            lb_policy: LbPolicy::RoundRobin as i32,
            hosts: vec![Address::socket("127.0.0.1", instance.endpoint.port)],
            ..Default::default()
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

/// One cluster per subset declared by the destination rule, with the
/// subset's policy overriding the rule-level one.
fn subset_clusters(
    ctx: &ClusterContext<'_>,
    service: &Arc<Service>,
    port: &Port,
    rule: &DestinationRuleSpec,
) -> Vec<Cluster> {
    let mut out = Vec::new();
    for subset in &rule.subsets {
        let name = ClusterName::subset_key(
            TrafficDirection::Outbound,
            &subset.name,
            &service.hostname,
            &port.name,
        );
        let mut cluster = base_cluster(name, service, port);
        let policy = subset
            .traffic_policy
            .as_ref()
            .or(rule.traffic_policy.as_ref());
        apply_traffic_policy(&mut cluster, policy);
        apply_mesh_tls(&mut cluster, ctx, service, port);
        out.push(cluster);
    }
    out
}

/// The cluster skeleton shared by edge and subset clusters: name,
/// discovery type, and default endpoints.
fn base_cluster(name: ClusterName, service: &Service, port: &Port) -> Cluster {
    let mut cluster = Cluster {
        name: name.as_str().to_string(),
        connect_timeout: Some(mesh_proto::duration(DEFAULT_CONNECT_TIMEOUT)),
        ..Default::default()
    };
    match service.resolution {
        Resolution::ClientSideLb => {
            cluster.r#type = DiscoveryType::Eds as i32;
        }
        Resolution::DnsLb => {
            cluster.r#type = DiscoveryType::StrictDns as i32;
            cluster.hosts = vec![Address::socket(service.hostname.as_str(), port.port)];
        }
        Resolution::Passthrough => {
            cluster.r#type = DiscoveryType::OriginalDst as i32;
            cluster.lb_policy = LbPolicy::OriginalDstLb as i32;
        }
    }
    cluster
}

/// Apply a destination rule's traffic policy to a cluster.
fn apply_traffic_policy(cluster: &mut Cluster, policy: Option<&TrafficPolicy>) {
    let Some(policy) = policy else {
        return;
    };

    if cluster.lb() != LbPolicy::OriginalDstLb {
        if let Some(lb) = policy.load_balancer {
            cluster.lb_policy = match lb {
                SimpleLb::RoundRobin => LbPolicy::RoundRobin,
                SimpleLb::LeastRequest => LbPolicy::LeastRequest,
                SimpleLb::Random => LbPolicy::Random,
            } as i32;
        }
    }

    if let Some(pool) = &policy.connection_pool {
        if let Some(timeout) = pool.connect_timeout {
            cluster.connect_timeout = Some(mesh_proto::duration(timeout));
        }
        cluster.circuit_breakers = Some(CircuitBreakers {
            thresholds: vec![CircuitBreakerThresholds {
                max_connections: pool.max_connections.unwrap_or_default(),
                max_pending_requests: pool.max_pending_requests.unwrap_or_default(),
                max_requests: pool.max_requests.unwrap_or_default(),
                max_retries: pool.max_retries.unwrap_or_default(),
            }],
        });
    }

    if let Some(outlier) = &policy.outlier_detection {
        cluster.outlier_detection = Some(OutlierDetection {
            consecutive_errors: outlier.consecutive_errors,
            interval: outlier.interval.map(mesh_proto::duration),
            base_ejection_time: outlier.base_ejection_time.map(mesh_proto::duration),
            max_ejection_percent: outlier.max_ejection_percent.unwrap_or_default(),
        });
    }

    if let Some(tls) = &policy.tls {
        match tls.mode {
            ClientTlsMode::Disable => {}
            // Plain TLS validates the upstream but presents no client
            // certificate.
            ClientTlsMode::Simple => {
                let mut context = mesh_tls_context(tls.subject_alt_names.clone());
                if let Some(common) = &mut context.common_tls_context {
                    common.tls_certificates.clear();
                }
                cluster.tls_context = Some(context);
            }
            ClientTlsMode::Mutual => {
                cluster.tls_context = Some(mesh_tls_context(tls.subject_alt_names.clone()));
            }
        }
    }
}

/// Attach the mesh mTLS context when the consolidated authentication
/// policy for the destination requires it. External destinations and
/// explicitly excluded hosts are left alone; an explicit TLS setting from
/// the destination rule wins.
fn apply_mesh_tls(
    cluster: &mut Cluster,
    ctx: &ClusterContext<'_>,
    service: &Service,
    port: &Port,
) {
    if cluster.tls_context.is_some() || service.mesh_external {
        return;
    }
    let Some(config) = ctx
        .store
        .authentication_policy_by_destination(&service.hostname, port)
    else {
        return;
    };
    let ConfigSpec::AuthenticationPolicy(policy) = &config.spec else {
        return;
    };
    if !policy.requires_tls(service.hostname.as_str()) {
        return;
    }

    let accounts = ctx
        .discovery
        .get_service_accounts(&service.hostname, &[port.name.clone()]);
    cluster.tls_context = Some(mesh_tls_context(accounts));
}

/// The client TLS context built from the sidecar's mesh certificates.
fn mesh_tls_context(subject_alt_names: Vec<String>) -> UpstreamTlsContext {
    UpstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_certificates: vec![TlsCertificate {
                certificate_chain: Some(DataSource::file(CERT_CHAIN)),
                private_key: Some(DataSource::file(PRIVATE_KEY)),
            }],
            validation_context: Some(CertificateValidationContext {
                trusted_ca: Some(DataSource::file(ROOT_CERT)),
                verify_subject_alt_name: subject_alt_names,
            }),
            alpn_protocols: vec![],
        }),
        sni: String::new(),
    }
}

/// Convenience re-export used by the generators and tests.
pub use mesh_model::specs::ConnectionPoolSettings;

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_model::specs::{
        AuthenticationPolicy, OutlierDetection as OutlierSpec, PeerAuthenticationMethod, Subset,
    };
    use mesh_model::{
        Config, ConfigMeta, ConfigStore as _, Hostname, Labels, MemConfigStore,
        MemServiceDiscovery, NetworkEndpoint, PortList, Protocol,
    };

    const REVIEWS: &str = "reviews.default.svc.cluster.local";

    fn service(host: &str, resolution: Resolution) -> Arc<Service> {
        Arc::new(Service {
            hostname: Hostname::new(host),
            address: String::new(),
            ports: PortList::new(vec![Port::new("http", 9080, Protocol::Http)]),
            resolution,
            mesh_external: false,
            service_accounts: vec![],
        })
    }

    fn meta(name: &str) -> ConfigMeta {
        ConfigMeta::new(name, "default").with_domain("cluster.local")
    }

    struct Fixture {
        store: Arc<MemConfigStore>,
        discovery: Arc<MemServiceDiscovery>,
        services: Vec<Arc<Service>>,
    }

    impl Fixture {
        fn new(services: Vec<Arc<Service>>) -> Self {
            Self {
                store: Arc::new(MemConfigStore::new()),
                discovery: Arc::new(MemServiceDiscovery::new()),
                services,
            }
        }

        fn build(&self) -> Vec<Cluster> {
            let typed = MeshConfigStore::new(self.store.clone());
            let ctx = ClusterContext {
                services: &self.services,
                store: &typed,
                discovery: self.discovery.as_ref(),
            };
            build_outbound_clusters(&ctx)
        }
    }

    #[test]
    fn resolution_maps_to_discovery_type() {
        let fixture = Fixture::new(vec![
            service(REVIEWS, Resolution::ClientSideLb),
            service("external.example.com", Resolution::DnsLb),
            service("passthrough.example.com", Resolution::Passthrough),
        ]);
        let clusters = fixture.build();
        assert_eq!(clusters.len(), 3);

        let by_name = |needle: &str| {
            clusters
                .iter()
                .find(|c| c.name.contains(needle))
                .expect("cluster")
        };
        assert_eq!(by_name(REVIEWS).discovery_type(), DiscoveryType::Eds);
        assert_eq!(
            by_name("external").discovery_type(),
            DiscoveryType::StrictDns
        );
        assert_eq!(
            by_name("passthrough").discovery_type(),
            DiscoveryType::OriginalDst
        );
        assert_eq!(by_name("passthrough").lb(), LbPolicy::OriginalDstLb);
    }

    #[test]
    fn destination_rule_policy_applied() {
        let fixture = Fixture::new(vec![service(REVIEWS, Resolution::ClientSideLb)]);
        fixture
            .store
            .create(Config::new(
                meta("reviews"),
                ConfigSpec::DestinationRule(DestinationRuleSpec {
                    host: "reviews".into(),
                    traffic_policy: Some(TrafficPolicy {
                        load_balancer: Some(SimpleLb::LeastRequest),
                        connection_pool: Some(ConnectionPoolSettings {
                            max_connections: Some(100),
                            max_pending_requests: Some(10),
                            connect_timeout: Some(Duration::from_secs(2)),
                            ..Default::default()
                        }),
                        outlier_detection: Some(OutlierSpec {
                            consecutive_errors: 5,
                            interval: Some(Duration::from_secs(30)),
                            base_ejection_time: None,
                            max_ejection_percent: Some(50),
                        }),
                        tls: None,
                    }),
                    subsets: vec![Subset {
                        name: "v1".into(),
                        labels: Labels::new().with("version", "v1"),
                        traffic_policy: None,
                    }],
                }),
            ))
            .unwrap();

        let clusters = fixture.build();
        // Edge cluster plus one subset cluster.
        assert_eq!(clusters.len(), 2);

        let edge = &clusters[0];
        assert_eq!(edge.lb(), LbPolicy::LeastRequest);
        assert_eq!(edge.connect_timeout.as_ref().unwrap().seconds, 2);
        let thresholds = &edge.circuit_breakers.as_ref().unwrap().thresholds[0];
        assert_eq!(thresholds.max_connections, 100);
        assert_eq!(thresholds.max_pending_requests, 10);
        assert_eq!(
            edge.outlier_detection.as_ref().unwrap().max_ejection_percent,
            50
        );

        let subset = &clusters[1];
        assert_eq!(subset.name, format!("outbound|v1|{REVIEWS}|http"));
        // Subset inherits the rule-level policy.
        assert_eq!(subset.lb(), LbPolicy::LeastRequest);
    }

    #[test]
    fn auth_policy_attaches_mtls() {
        let fixture = Fixture::new(vec![service(REVIEWS, Resolution::ClientSideLb)]);
        fixture.discovery.set_service_accounts(
            Hostname::new(REVIEWS),
            vec!["spiffe://cluster.local/ns/default/sa/reviews".into()],
        );
        fixture
            .store
            .create(Config::new(
                meta("require-tls"),
                ConfigSpec::AuthenticationPolicy(AuthenticationPolicy {
                    targets: vec![],
                    peers: vec![PeerAuthenticationMethod::Mtls {
                        excluded_hosts: vec![],
                    }],
                }),
            ))
            .unwrap();

        let clusters = fixture.build();
        let tls = clusters[0].tls_context.as_ref().expect("tls context");
        let validation = tls
            .common_tls_context
            .as_ref()
            .unwrap()
            .validation_context
            .as_ref()
            .unwrap();
        assert_eq!(
            validation.verify_subject_alt_name,
            vec!["spiffe://cluster.local/ns/default/sa/reviews".to_string()]
        );
    }

    #[test]
    fn excluded_host_skips_mtls() {
        let fixture = Fixture::new(vec![service(REVIEWS, Resolution::ClientSideLb)]);
        fixture
            .store
            .create(Config::new(
                meta("require-tls"),
                ConfigSpec::AuthenticationPolicy(AuthenticationPolicy {
                    targets: vec![],
                    peers: vec![PeerAuthenticationMethod::Mtls {
                        excluded_hosts: vec![REVIEWS.into()],
                    }],
                }),
            ))
            .unwrap();

        let clusters = fixture.build();
        assert!(clusters[0].tls_context.is_none());
    }

    #[test]
    fn inbound_clusters_point_home() {
        let svc = service(REVIEWS, Resolution::ClientSideLb);
        let instance = ServiceInstance {
            service: Arc::clone(&svc),
            endpoint: NetworkEndpoint {
                address: "10.0.0.5".into(),
                port: 8080,
                service_port: Port::new("http", 9080, Protocol::Http),
            },
            labels: Labels::new(),
        };

        let clusters = build_inbound_clusters(&[instance.clone(), instance]);
        // De-duplicated by cluster name.
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, format!("inbound||{REVIEWS}|http"));
        let address = clusters[0].hosts[0].socket_address.as_ref().unwrap();
        assert_eq!(address.address, "127.0.0.1");
        assert_eq!(address.port_value, 8080);
    }
}
