//! Route configuration resources served over RDS.

use crate::core::HeaderValueOption;

/// A named collection of virtual hosts.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteConfiguration {
    /// Route configuration name; sidecar outbound configs are named by
    /// port.
    #[prost(string, tag = "1")]
    pub name: String,
    /// The virtual hosts in this configuration.
    #[prost(message, repeated, tag = "2")]
    pub virtual_hosts: Vec<VirtualHost>,
    /// Whether the proxy should cross-check route clusters against CDS.
    #[prost(bool, tag = "3")]
    pub validate_clusters: bool,
}

/// TLS requirements a virtual host imposes on downstream connections.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
)]
#[repr(i32)]
pub enum TlsRequirementType {
    /// No TLS requirement.
    None = 0,
    /// External requests must use TLS; internal ones may not.
    ExternalOnly = 1,
    /// All requests must use TLS.
    All = 2,
}

/// One virtual host: a set of domains and the routes applied to them.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VirtualHost {
    /// Virtual host name, unique within the route configuration.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Domains matched against `:authority`.
    #[prost(string, repeated, tag = "2")]
    pub domains: Vec<String>,
    /// Routes, evaluated in order.
    #[prost(message, repeated, tag = "3")]
    pub routes: Vec<Route>,
    /// Downstream TLS requirement.
    #[prost(enumeration = "TlsRequirementType", tag = "4")]
    pub require_tls: i32,
}

/// A guarded route: a match plus an action.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Route {
    /// The match condition.
    #[prost(message, optional, tag = "1")]
    pub r#match: Option<RouteMatch>,
    /// Tracing decoration.
    #[prost(message, optional, tag = "4")]
    pub decorator: Option<Decorator>,
    /// What to do with matched requests.
    #[prost(oneof = "route::Action", tags = "2, 3")]
    pub action: Option<route::Action>,
}

/// Nested types of [`Route`].
pub mod route {
    /// The action applied to matched requests.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Action {
        /// Forward to a cluster.
        #[prost(message, tag = "2")]
        Route(super::RouteAction),
        /// Redirect the request.
        #[prost(message, tag = "3")]
        Redirect(super::RedirectAction),
    }
}

/// Match condition of a route.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteMatch {
    /// Header predicates, in sorted order.
    #[prost(message, repeated, tag = "4")]
    pub headers: Vec<HeaderMatcher>,
    /// Path predicate.
    #[prost(oneof = "route_match::PathSpecifier", tags = "1, 2, 3")]
    pub path_specifier: Option<route_match::PathSpecifier>,
}

/// Nested types of [`RouteMatch`].
pub mod route_match {
    /// How the request path is matched.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PathSpecifier {
        /// Prefix match.
        #[prost(string, tag = "1")]
        Prefix(String),
        /// Exact path match.
        #[prost(string, tag = "2")]
        Path(String),
        /// Regular expression match.
        #[prost(string, tag = "3")]
        Regex(String),
    }
}

/// A single header predicate.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderMatcher {
    /// Header name; pseudo-headers use the `:name` form.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Expected value, or a regular expression when `regex` is set.
    #[prost(string, tag = "2")]
    pub value: String,
    /// Interpret `value` as a regular expression.
    #[prost(bool, tag = "3")]
    pub regex: bool,
}

/// Tracing decoration attached to a route.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Decorator {
    /// Operation name recorded on spans.
    #[prost(string, tag = "1")]
    pub operation: String,
}

/// An HTTP redirect.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RedirectAction {
    /// Replacement authority.
    #[prost(string, tag = "1")]
    pub host_redirect: String,
    /// Replacement path.
    #[prost(string, tag = "2")]
    pub path_redirect: String,
}

/// Retry policy of a route action.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RetryPolicy {
    /// Retry conditions, comma separated.
    #[prost(string, tag = "1")]
    pub retry_on: String,
    /// Number of retry attempts.
    #[prost(uint32, tag = "2")]
    pub num_retries: u32,
    /// Timeout per attempt.
    #[prost(message, optional, tag = "3")]
    pub per_try_timeout: Option<prost_types::Duration>,
}

/// Cross-origin policy of a route action.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CorsPolicy {
    /// Allowed origins.
    #[prost(string, repeated, tag = "1")]
    pub allow_origin: Vec<String>,
    /// Allowed methods, comma separated.
    #[prost(string, tag = "2")]
    pub allow_methods: String,
    /// Allowed headers, comma separated.
    #[prost(string, tag = "3")]
    pub allow_headers: String,
    /// Exposed headers, comma separated.
    #[prost(string, tag = "4")]
    pub expose_headers: String,
    /// Preflight cache lifetime, in seconds.
    #[prost(string, tag = "5")]
    pub max_age: String,
    /// Whether credentials are allowed.
    #[prost(bool, tag = "6")]
    pub allow_credentials: bool,
    /// Whether the policy is in effect.
    #[prost(bool, tag = "7")]
    pub enabled: bool,
}

/// One weighted member of a cluster set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusterWeight {
    /// Target cluster name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Relative weight.
    #[prost(uint32, tag = "2")]
    pub weight: u32,
}

/// A weighted set of clusters.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WeightedCluster {
    /// The member clusters.
    #[prost(message, repeated, tag = "1")]
    pub clusters: Vec<ClusterWeight>,
}

/// Mirrors matched requests to another cluster.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestMirrorPolicy {
    /// Cluster receiving the shadow traffic.
    #[prost(string, tag = "1")]
    pub cluster: String,
}

/// Forwarding action of a route.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteAction {
    /// Path prefix rewrite applied before forwarding.
    #[prost(string, tag = "3")]
    pub prefix_rewrite: String,
    /// Authority rewrite applied before forwarding.
    #[prost(string, tag = "4")]
    pub host_rewrite: String,
    /// Total request timeout.
    #[prost(message, optional, tag = "5")]
    pub timeout: Option<prost_types::Duration>,
    /// Retry policy.
    #[prost(message, optional, tag = "6")]
    pub retry_policy: Option<RetryPolicy>,
    /// Cross-origin policy.
    #[prost(message, optional, tag = "7")]
    pub cors: Option<CorsPolicy>,
    /// Allow websocket upgrades.
    #[prost(bool, tag = "8")]
    pub use_websocket: bool,
    /// Shadow traffic policy.
    #[prost(message, optional, tag = "9")]
    pub request_mirror_policy: Option<RequestMirrorPolicy>,
    /// Headers appended to forwarded requests.
    #[prost(message, repeated, tag = "10")]
    pub request_headers_to_add: Vec<HeaderValueOption>,
    /// Where matched traffic goes.
    #[prost(oneof = "route_action::ClusterSpecifier", tags = "1, 2")]
    pub cluster_specifier: Option<route_action::ClusterSpecifier>,
}

/// Nested types of [`RouteAction`].
pub mod route_action {
    /// The target cluster or weighted cluster set.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum ClusterSpecifier {
        /// A single cluster.
        #[prost(string, tag = "1")]
        Cluster(String),
        /// A weighted set of clusters.
        #[prost(message, tag = "2")]
        WeightedClusters(super::WeightedCluster),
    }
}
