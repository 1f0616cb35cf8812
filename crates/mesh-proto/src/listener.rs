//! Listener resources served over LDS.

use crate::core::{Address, CommonTlsContext};

/// Traffic direction of an HTTP connection manager, for stats and
/// telemetry attribution.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
)]
#[repr(i32)]
pub enum HttpDirection {
    /// Traffic entering the workload.
    Ingress = 0,
    /// Traffic leaving the workload or gateway.
    Egress = 1,
}

/// A named HTTP-level filter in the connection manager's chain.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpFilter {
    /// Filter name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Opaque filter configuration.
    #[prost(message, optional, tag = "2")]
    pub config: Option<prost_types::Any>,
}

/// The HTTP connection manager network filter.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpConnectionManager {
    /// Stats prefix for this listener.
    #[prost(string, tag = "1")]
    pub stat_prefix: String,
    /// Use the peer address rather than headers for downstream identity.
    #[prost(bool, tag = "4")]
    pub use_remote_address: bool,
    /// Traffic direction.
    #[prost(enumeration = "HttpDirection", tag = "5")]
    pub direction: i32,
    /// HTTP filters applied to each request.
    #[prost(message, repeated, tag = "6")]
    pub http_filters: Vec<HttpFilter>,
    /// Where routes come from.
    #[prost(oneof = "http_connection_manager::RouteSpecifier", tags = "2, 3")]
    pub route_specifier: Option<http_connection_manager::RouteSpecifier>,
}

/// Nested types of [`HttpConnectionManager`].
pub mod http_connection_manager {
    /// Route source of a connection manager.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum RouteSpecifier {
        /// Fetch a named route configuration over RDS.
        #[prost(message, tag = "2")]
        Rds(super::Rds),
        /// An inline route configuration.
        #[prost(message, tag = "3")]
        RouteConfig(super::super::route::RouteConfiguration),
    }
}

/// RDS subscription settings.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Rds {
    /// Name of the route configuration to fetch.
    #[prost(string, tag = "1")]
    pub route_config_name: String,
}

/// The TCP proxy network filter.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TcpProxy {
    /// Stats prefix for this filter.
    #[prost(string, tag = "1")]
    pub stat_prefix: String,
    /// Upstream cluster.
    #[prost(string, tag = "2")]
    pub cluster: String,
}

/// A network-level filter.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Filter {
    /// Filter name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Typed filter configuration, packed as `Any`.
    #[prost(message, optional, tag = "2")]
    pub typed_config: Option<prost_types::Any>,
}

/// Server TLS context applied to downstream connections.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DownstreamTlsContext {
    /// Shared TLS settings.
    #[prost(message, optional, tag = "1")]
    pub common_tls_context: Option<CommonTlsContext>,
    /// Require clients to send SNI.
    #[prost(bool, tag = "2")]
    pub require_sni: bool,
}

/// Criteria selecting a filter chain for a connection.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FilterChainMatch {
    /// SNI names the chain serves; empty matches any.
    #[prost(string, repeated, tag = "1")]
    pub sni_domains: Vec<String>,
}

/// One filter chain of a listener.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FilterChain {
    /// Chain selection criteria.
    #[prost(message, optional, tag = "1")]
    pub filter_chain_match: Option<FilterChainMatch>,
    /// Server TLS context.
    #[prost(message, optional, tag = "2")]
    pub tls_context: Option<DownstreamTlsContext>,
    /// Network filters, terminated by an HTTP connection manager or TCP
    /// proxy.
    #[prost(message, repeated, tag = "3")]
    pub filters: Vec<Filter>,
}

/// A listening socket and its filter chains.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Listener {
    /// Listener name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Bind address.
    #[prost(message, optional, tag = "2")]
    pub address: Option<Address>,
    /// Filter chains, selected per connection.
    #[prost(message, repeated, tag = "3")]
    pub filter_chains: Vec<FilterChain>,
}

/// Well-known filter names used by the generators.
pub mod filter_names {
    /// The HTTP connection manager network filter.
    pub const HTTP_CONNECTION_MANAGER: &str = "envoy.http_connection_manager";
    /// The TCP proxy network filter.
    pub const TCP_PROXY: &str = "envoy.tcp_proxy";
    /// The router HTTP filter, always last in the chain.
    pub const ROUTER: &str = "envoy.router";
    /// The CORS HTTP filter.
    pub const CORS: &str = "envoy.cors";
    /// The peer authentication HTTP filter.
    pub const AUTHN: &str = "mesh.authn";
    /// The telemetry-report HTTP filter.
    pub const TELEMETRY: &str = "mesh.telemetry";
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn hcm_round_trips_through_any() {
        let hcm = HttpConnectionManager {
            stat_prefix: "http.80".into(),
            use_remote_address: true,
            direction: HttpDirection::Egress as i32,
            http_filters: vec![HttpFilter {
                name: filter_names::ROUTER.into(),
                config: None,
            }],
            route_specifier: Some(http_connection_manager::RouteSpecifier::RouteConfig(
                crate::route::RouteConfiguration {
                    name: "80".into(),
                    virtual_hosts: vec![],
                    validate_clusters: false,
                },
            )),
        };

        let any = crate::to_any(&hcm, crate::type_urls::HTTP_CONNECTION_MANAGER);
        let decoded = HttpConnectionManager::decode(any.value.as_slice()).unwrap();
        assert_eq!(decoded, hcm);
    }
}
