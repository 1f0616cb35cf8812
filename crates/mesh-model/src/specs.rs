//! Configuration payload types.
//!
//! These are the validated spec bodies carried by [`crate::config::Config`]
//! objects: routing intent (virtual services), upstream policy (destination
//! rules), ingress/egress exposure (gateways), out-of-registry destinations
//! (service entries), authentication policies, and the HTTP API / quota
//! binding specs resolved against service identity.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::labels::Labels;

/// A string predicate used in route matches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMatch {
    /// Exact string equality.
    Exact(String),
    /// Prefix match.
    Prefix(String),
    /// ECMAScript-style regular expression match.
    Regex(String),
}

/// Selects a service port by name or by number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortSelector {
    /// Select by port name.
    Name(String),
    /// Select by port number.
    Number(u16),
}

/// A routing destination: a host, an optional subset, an optional port.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Destination host; a short name until the typed store resolves it.
    pub host: String,
    /// Named subset of the host, empty for the whole service.
    #[serde(default)]
    pub subset: String,
    /// Pinned port, if the host exposes more than one.
    #[serde(default)]
    pub port: Option<PortSelector>,
}

/// A destination with a relative weight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationWeight {
    /// Where the traffic goes.
    pub destination: Destination,
    /// Relative weight; a single destination with weight 0 is treated as
    /// receiving all traffic.
    #[serde(default)]
    pub weight: u32,
}

/// Match conditions for one HTTP route rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMatchRequest {
    /// URI predicate.
    #[serde(default)]
    pub uri: Option<StringMatch>,
    /// `:scheme` predicate.
    #[serde(default)]
    pub scheme: Option<StringMatch>,
    /// `:method` predicate.
    #[serde(default)]
    pub method: Option<StringMatch>,
    /// `:authority` predicate.
    #[serde(default)]
    pub authority: Option<StringMatch>,
    /// Header predicates, keyed by header name.
    #[serde(default)]
    pub headers: BTreeMap<String, StringMatch>,
    /// Pinned destination port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Source workload labels that must be present on the proxy.
    #[serde(default)]
    pub source_labels: Labels,
    /// Gateways this rule applies on.
    #[serde(default)]
    pub gateways: Vec<String>,
}

/// An HTTP redirect action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRedirect {
    /// Replacement path.
    #[serde(default)]
    pub uri: String,
    /// Replacement authority.
    #[serde(default)]
    pub authority: String,
}

/// An HTTP rewrite applied before forwarding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRewrite {
    /// Replacement path prefix.
    #[serde(default)]
    pub uri: String,
    /// Replacement authority.
    #[serde(default)]
    pub authority: String,
}

/// Retry policy for an HTTP route.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRetry {
    /// Number of retry attempts; 0 disables retries.
    #[serde(default)]
    pub attempts: u32,
    /// Timeout per attempt.
    #[serde(default, with = "duration_secs")]
    pub per_try_timeout: Option<Duration>,
}

/// Cross-origin resource sharing policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsPolicy {
    /// Origins allowed to make requests.
    #[serde(default)]
    pub allow_origin: Vec<String>,
    /// Allowed methods.
    #[serde(default)]
    pub allow_methods: Vec<String>,
    /// Allowed headers.
    #[serde(default)]
    pub allow_headers: Vec<String>,
    /// Headers exposed to the browser.
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// How long preflight results may be cached.
    #[serde(default, with = "duration_secs")]
    pub max_age: Option<Duration>,
    /// Whether credentials are allowed.
    #[serde(default)]
    pub allow_credentials: Option<bool>,
}

/// One HTTP routing rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoute {
    /// Match clauses; empty means catch-all.
    #[serde(default, rename = "match")]
    pub matches: Vec<HttpMatchRequest>,
    /// Weighted destinations; ignored when `redirect` is set.
    #[serde(default)]
    pub route: Vec<DestinationWeight>,
    /// Redirect action; takes precedence over `route`.
    #[serde(default)]
    pub redirect: Option<HttpRedirect>,
    /// Rewrite applied before forwarding.
    #[serde(default)]
    pub rewrite: Option<HttpRewrite>,
    /// Allow websocket upgrades on this route.
    #[serde(default)]
    pub websocket_upgrade: bool,
    /// Total request timeout.
    #[serde(default, with = "duration_secs")]
    pub timeout: Option<Duration>,
    /// Retry policy.
    #[serde(default)]
    pub retries: Option<HttpRetry>,
    /// Mirror traffic to this destination as well.
    #[serde(default)]
    pub mirror: Option<Destination>,
    /// Headers appended to matched requests.
    #[serde(default)]
    pub append_headers: BTreeMap<String, String>,
    /// CORS policy.
    #[serde(default)]
    pub cors_policy: Option<CorsPolicy>,
}

/// L4 match conditions; predicates in a list are OR'd, fields within one
/// predicate are AND'd.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L4MatchAttributes {
    /// Pinned destination port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Gateways this predicate applies on.
    #[serde(default)]
    pub gateways: Vec<String>,
}

/// One TCP routing rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpRoute {
    /// Match predicates; empty matches everything.
    #[serde(default, rename = "match")]
    pub matches: Vec<L4MatchAttributes>,
    /// Weighted destinations.
    #[serde(default)]
    pub route: Vec<DestinationWeight>,
}

/// Declarative routing intent for a set of hosts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualService {
    /// Hosts the rules apply to; short names are resolved by the typed
    /// store before compilation.
    pub hosts: Vec<String>,
    /// Gateways the rules are exposed on; empty binds to the built-in
    /// mesh gateway.
    #[serde(default)]
    pub gateways: Vec<String>,
    /// HTTP rules in priority order.
    #[serde(default)]
    pub http: Vec<HttpRoute>,
    /// TCP rules in priority order.
    #[serde(default)]
    pub tcp: Vec<TcpRoute>,
}

/// Simple load-balancer algorithms for upstream pools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleLb {
    /// Round-robin over healthy endpoints.
    #[default]
    RoundRobin,
    /// Pick the endpoint with the fewest outstanding requests.
    LeastRequest,
    /// Pick a random healthy endpoint.
    Random,
}

/// Connection-pool limits applied to an upstream cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPoolSettings {
    /// Maximum TCP connections to the upstream.
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// Maximum queued HTTP requests.
    #[serde(default)]
    pub max_pending_requests: Option<u32>,
    /// Maximum in-flight HTTP requests.
    #[serde(default)]
    pub max_requests: Option<u32>,
    /// Maximum concurrent retries.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// TCP connect timeout.
    #[serde(default, with = "duration_secs")]
    pub connect_timeout: Option<Duration>,
}

/// Passive health checking: eject hosts that keep failing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlierDetection {
    /// Consecutive errors before ejection.
    #[serde(default)]
    pub consecutive_errors: u32,
    /// Analysis sweep interval.
    #[serde(default, with = "duration_secs")]
    pub interval: Option<Duration>,
    /// Minimum ejection duration.
    #[serde(default, with = "duration_secs")]
    pub base_ejection_time: Option<Duration>,
    /// Maximum percent of hosts ejected at once.
    #[serde(default)]
    pub max_ejection_percent: Option<u32>,
}

/// Client TLS modes for upstream connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientTlsMode {
    /// Do not originate TLS.
    #[default]
    Disable,
    /// Originate plain TLS.
    Simple,
    /// Originate mutual TLS with mesh certificates.
    Mutual,
}

/// Client TLS settings for an upstream cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTlsSettings {
    /// TLS mode.
    #[serde(default)]
    pub mode: ClientTlsMode,
    /// Expected subject alternative names of the upstream.
    #[serde(default)]
    pub subject_alt_names: Vec<String>,
}

/// Upstream traffic policy applied by a destination rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficPolicy {
    /// Load-balancer algorithm.
    #[serde(default)]
    pub load_balancer: Option<SimpleLb>,
    /// Connection-pool limits.
    #[serde(default)]
    pub connection_pool: Option<ConnectionPoolSettings>,
    /// Outlier detection.
    #[serde(default)]
    pub outlier_detection: Option<OutlierDetection>,
    /// Client TLS settings.
    #[serde(default)]
    pub tls: Option<ClientTlsSettings>,
}

/// A labeled partition of a service's endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
    /// Subset name, referenced from route destinations.
    pub name: String,
    /// Labels selecting the subset's endpoints.
    #[serde(default)]
    pub labels: Labels,
    /// Subset-level policy overriding the rule-level one.
    #[serde(default)]
    pub traffic_policy: Option<TrafficPolicy>,
}

/// Upstream policy for a host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRule {
    /// Host the rule applies to; may be a short name or wildcard.
    pub host: String,
    /// Policy for the whole host.
    #[serde(default)]
    pub traffic_policy: Option<TrafficPolicy>,
    /// Named subsets.
    #[serde(default)]
    pub subsets: Vec<Subset>,
}

/// TLS modes for gateway servers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerTlsMode {
    /// Terminate TLS with the configured certificate.
    #[default]
    Simple,
    /// Terminate mutual TLS, verifying client certificates.
    Mutual,
    /// Pass TLS through to the backend by SNI.
    Passthrough,
}

/// TLS configuration of one gateway server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTlsSettings {
    /// Redirect plaintext HTTP to HTTPS.
    #[serde(default)]
    pub https_redirect: bool,
    /// TLS mode.
    #[serde(default)]
    pub mode: ServerTlsMode,
    /// Path to the server certificate chain.
    #[serde(default)]
    pub server_certificate: String,
    /// Path to the private key.
    #[serde(default)]
    pub private_key: String,
    /// Path to the CA bundle for client verification.
    #[serde(default)]
    pub ca_certificates: String,
    /// Accepted client SANs.
    #[serde(default)]
    pub subject_alt_names: Vec<String>,
}

/// The port a gateway server listens on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPort {
    /// Port number.
    pub number: u16,
    /// Port name, unique within the gateway.
    #[serde(default)]
    pub name: String,
    /// Protocol served on the port.
    #[serde(default)]
    pub protocol: String,
}

/// One exposed server of a gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayServer {
    /// Listening port.
    pub port: ServerPort,
    /// Hosts exposed on the port.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// TLS termination settings.
    #[serde(default)]
    pub tls: Option<ServerTlsSettings>,
}

/// L4/L7 exposure applied to a selected workload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    /// Servers exposed by the gateway.
    pub servers: Vec<GatewayServer>,
    /// Workload labels the gateway binds to; empty binds to any workload
    /// that asks for it.
    #[serde(default)]
    pub selector: Labels,
}

/// Where a service entry's endpoints live relative to the mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryLocation {
    /// Part of the mesh.
    #[default]
    MeshInternal,
    /// External to the mesh.
    MeshExternal,
}

/// Endpoint discovery modes for service entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryResolution {
    /// No resolution; traffic passes through to the original address.
    #[default]
    None,
    /// Static endpoints listed in the entry.
    Static,
    /// Resolve the hosts via DNS.
    Dns,
}

/// A declared port of a service entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPort {
    /// Port number.
    pub number: u16,
    /// Port name.
    #[serde(default)]
    pub name: String,
    /// Protocol served.
    #[serde(default)]
    pub protocol: String,
}

/// One static endpoint of a service entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryEndpoint {
    /// Endpoint address.
    pub address: String,
    /// Per-port-name overrides of the target port.
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
    /// Endpoint labels.
    #[serde(default)]
    pub labels: Labels,
}

/// Registration of an out-of-registry destination.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Hosts the entry registers.
    pub hosts: Vec<String>,
    /// Virtual addresses; plain IPs or CIDR blocks.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Declared ports.
    #[serde(default)]
    pub ports: Vec<EntryPort>,
    /// Mesh-internal or external.
    #[serde(default)]
    pub location: EntryLocation,
    /// Endpoint discovery mode.
    #[serde(default)]
    pub resolution: EntryResolution,
    /// Static endpoints.
    #[serde(default)]
    pub endpoints: Vec<EntryEndpoint>,
}

/// A peer authentication method; today only mutual TLS.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerAuthenticationMethod {
    /// Require mesh mutual TLS from peers.
    Mtls {
        /// Hosts excluded from the requirement.
        #[serde(default)]
        excluded_hosts: Vec<String>,
    },
}

/// Selects the workloads an authentication policy applies to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTarget {
    /// Short name of the target service.
    pub name: String,
    /// Restrict the policy to these ports; empty covers all ports.
    #[serde(default)]
    pub ports: Vec<PortSelector>,
}

/// End-user and peer authentication requirements for a destination.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationPolicy {
    /// Targets; empty applies the policy at namespace scope.
    #[serde(default)]
    pub targets: Vec<PolicyTarget>,
    /// Accepted peer authentication methods.
    #[serde(default)]
    pub peers: Vec<PeerAuthenticationMethod>,
}

impl AuthenticationPolicy {
    /// True if the policy requires mutual TLS from peers and `host` is not
    /// on the exclusion list.
    #[must_use]
    pub fn requires_tls(&self, host: &str) -> bool {
        self.peers.iter().any(|peer| match peer {
            PeerAuthenticationMethod::Mtls { excluded_hosts } => {
                !excluded_hosts.iter().any(|h| h == host)
            }
        })
    }
}

/// A reference to a named object in a namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    /// Object name.
    pub name: String,
    /// Object namespace; empty falls back to the binding's namespace.
    #[serde(default)]
    pub namespace: String,
}

/// A service reference used by binding specs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    /// Service short name.
    pub name: String,
    /// Service namespace.
    #[serde(default)]
    pub namespace: String,
    /// Fully qualified service name; takes precedence over `name`.
    #[serde(default)]
    pub service: String,
    /// Service domain suffix.
    #[serde(default)]
    pub domain: String,
}

/// Description of an HTTP API surface, attached to services via bindings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpApiSpec {
    /// API attribute patterns; opaque to the control plane.
    #[serde(default)]
    pub patterns: Vec<BTreeMap<String, String>>,
}

/// Binds [`HttpApiSpec`]s to services.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpApiSpecBinding {
    /// Services the specs apply to.
    #[serde(default)]
    pub services: Vec<ServiceRef>,
    /// The bound specs.
    #[serde(default)]
    pub api_specs: Vec<NamedRef>,
}

/// A quota to charge against matching requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSpec {
    /// Quota rules; opaque to the control plane.
    #[serde(default)]
    pub rules: Vec<BTreeMap<String, String>>,
}

/// Binds [`QuotaSpec`]s to services.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSpecBinding {
    /// Services the specs apply to.
    #[serde(default)]
    pub services: Vec<ServiceRef>,
    /// The bound specs.
    #[serde(default)]
    pub quota_specs: Vec<NamedRef>,
}

/// Serde helper for optional durations rendered as seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        d.map(|d| d.as_secs_f64()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.map(Duration::from_secs_f64))
    }
}
