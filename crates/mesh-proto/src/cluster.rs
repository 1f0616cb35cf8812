//! Upstream cluster resources served over CDS.

use crate::core::{Address, CommonTlsContext};

/// How the proxy discovers a cluster's endpoints.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
)]
#[repr(i32)]
pub enum DiscoveryType {
    /// Endpoints are listed statically in the cluster.
    Static = 0,
    /// Endpoints are resolved via DNS.
    StrictDns = 1,
    /// Endpoints are pushed over EDS.
    Eds = 2,
    /// Forward to the connection's original destination.
    OriginalDst = 3,
}

/// Load-balancing algorithms the proxy applies over endpoints.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
)]
#[repr(i32)]
pub enum LbPolicy {
    /// Round-robin over healthy endpoints.
    RoundRobin = 0,
    /// Pick the endpoint with the fewest outstanding requests.
    LeastRequest = 1,
    /// Pick a random healthy endpoint.
    Random = 2,
    /// Forward to the original destination.
    OriginalDstLb = 3,
}

/// Circuit-breaker thresholds.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CircuitBreakerThresholds {
    /// Maximum TCP connections.
    #[prost(uint32, tag = "1")]
    pub max_connections: u32,
    /// Maximum queued requests.
    #[prost(uint32, tag = "2")]
    pub max_pending_requests: u32,
    /// Maximum in-flight requests.
    #[prost(uint32, tag = "3")]
    pub max_requests: u32,
    /// Maximum concurrent retries.
    #[prost(uint32, tag = "4")]
    pub max_retries: u32,
}

/// Circuit-breaker settings of a cluster.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CircuitBreakers {
    /// Per-priority thresholds; this control plane emits one entry.
    #[prost(message, repeated, tag = "1")]
    pub thresholds: Vec<CircuitBreakerThresholds>,
}

/// Passive health checking: ejection of consistently failing hosts.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutlierDetection {
    /// Consecutive errors before ejection.
    #[prost(uint32, tag = "1")]
    pub consecutive_errors: u32,
    /// Analysis sweep interval.
    #[prost(message, optional, tag = "2")]
    pub interval: Option<prost_types::Duration>,
    /// Minimum ejection duration.
    #[prost(message, optional, tag = "3")]
    pub base_ejection_time: Option<prost_types::Duration>,
    /// Maximum percent of hosts ejected at once.
    #[prost(uint32, tag = "4")]
    pub max_ejection_percent: u32,
}

/// Client TLS context applied to upstream connections.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpstreamTlsContext {
    /// Shared TLS settings.
    #[prost(message, optional, tag = "1")]
    pub common_tls_context: Option<CommonTlsContext>,
    /// SNI sent to the upstream.
    #[prost(string, tag = "2")]
    pub sni: String,
}

/// A named upstream pool.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Cluster {
    /// Cluster name; subset-keyed for mesh destinations.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Endpoint discovery mode.
    #[prost(enumeration = "DiscoveryType", tag = "2")]
    pub r#type: i32,
    /// TCP connect timeout.
    #[prost(message, optional, tag = "3")]
    pub connect_timeout: Option<prost_types::Duration>,
    /// Load-balancing algorithm.
    #[prost(enumeration = "LbPolicy", tag = "4")]
    pub lb_policy: i32,
    /// Static or DNS endpoints; empty for EDS clusters.
    #[prost(message, repeated, tag = "5")]
    pub hosts: Vec<Address>,
    /// Circuit breakers.
    #[prost(message, optional, tag = "6")]
    pub circuit_breakers: Option<CircuitBreakers>,
    /// Outlier detection.
    #[prost(message, optional, tag = "7")]
    pub outlier_detection: Option<OutlierDetection>,
    /// Client TLS context.
    #[prost(message, optional, tag = "8")]
    pub tls_context: Option<UpstreamTlsContext>,
}

impl Cluster {
    /// The discovery type, defaulting unknown values to `Static`.
    #[must_use]
    pub fn discovery_type(&self) -> DiscoveryType {
        DiscoveryType::try_from(self.r#type).unwrap_or_default()
    }

    /// The LB policy, defaulting unknown values to round-robin.
    #[must_use]
    pub fn lb(&self) -> LbPolicy {
        LbPolicy::try_from(self.lb_policy).unwrap_or_default()
    }
}
