//! # mesh-proto
//!
//! The wire surface of the meshwork control plane: discovery protocol
//! messages, the four resource families (clusters, listeners, routes,
//! endpoints), and the aggregated discovery gRPC service.
//!
//! The message set is maintained by hand with stable tags rather than
//! generated from a vendored proto tree; it carries exactly the fields
//! this control plane emits. The service module in [`discovery`] follows
//! the shape `tonic-build` would generate so servers compose with tonic
//! the usual way.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)] // wire structs carry field-level docs only

pub mod cluster;
pub mod core;
pub mod discovery;
pub mod endpoint;
pub mod listener;
pub mod route;
pub mod rpc;

pub use prost::Message;
pub use prost_types::Any;

/// Type URLs identifying each resource family on the wire.
pub mod type_urls {
    /// Clusters (CDS).
    pub const CLUSTER: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
    /// Endpoint assignments (EDS).
    pub const ENDPOINT: &str =
        "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
    /// Listeners (LDS).
    pub const LISTENER: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
    /// Route configurations (RDS).
    pub const ROUTE: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
    /// The HTTP connection manager filter config.
    pub const HTTP_CONNECTION_MANAGER: &str =
        "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
    /// The TCP proxy filter config.
    pub const TCP_PROXY: &str =
        "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
}

/// The four resource families multiplexed on an aggregated stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Upstream clusters.
    Cluster,
    /// Listening sockets.
    Listener,
    /// Route configurations.
    Route,
    /// Endpoint assignments.
    Endpoint,
}

impl ResourceType {
    /// The wire type URL of this family.
    #[must_use]
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Cluster => type_urls::CLUSTER,
            ResourceType::Listener => type_urls::LISTENER,
            ResourceType::Route => type_urls::ROUTE,
            ResourceType::Endpoint => type_urls::ENDPOINT,
        }
    }

    /// Map a wire type URL back to its family.
    #[must_use]
    pub fn from_type_url(url: &str) -> Option<Self> {
        match url {
            type_urls::CLUSTER => Some(ResourceType::Cluster),
            type_urls::LISTENER => Some(ResourceType::Listener),
            type_urls::ROUTE => Some(ResourceType::Route),
            type_urls::ENDPOINT => Some(ResourceType::Endpoint),
            _ => None,
        }
    }

    /// Short name used in logs and metric labels.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        match self {
            ResourceType::Cluster => "cds",
            ResourceType::Listener => "lds",
            ResourceType::Route => "rds",
            ResourceType::Endpoint => "eds",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// Pack a message into an `Any` under the given type URL.
#[must_use]
pub fn to_any<M: prost::Message>(message: &M, type_url: &str) -> prost_types::Any {
    prost_types::Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

/// Convert a `std::time::Duration` to the wire duration type.
#[must_use]
pub fn duration(d: std::time::Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn resource_type_round_trip() {
        for rt in [
            ResourceType::Cluster,
            ResourceType::Listener,
            ResourceType::Route,
            ResourceType::Endpoint,
        ] {
            assert_eq!(ResourceType::from_type_url(rt.type_url()), Some(rt));
        }
        assert_eq!(ResourceType::from_type_url("bogus"), None);
    }

    #[test]
    fn discovery_request_round_trip() {
        let request = discovery::DiscoveryRequest {
            version_info: "3".into(),
            node: Some(core::Node {
                id: "sidecar.10.0.0.1.app.cluster.local".into(),
                cluster: String::new(),
                metadata: Default::default(),
            }),
            resource_names: vec!["80".into()],
            type_url: type_urls::ROUTE.into(),
            response_nonce: "abc".into(),
            error_detail: None,
        };

        let bytes = request.encode_to_vec();
        let decoded = discovery::DiscoveryRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn any_packs_cluster() {
        let cluster = cluster::Cluster {
            name: "outbound||reviews.default.svc.cluster.local|http".into(),
            r#type: cluster::DiscoveryType::Eds as i32,
            ..Default::default()
        };
        let any = to_any(&cluster, type_urls::CLUSTER);
        assert_eq!(any.type_url, type_urls::CLUSTER);
        let decoded = cluster::Cluster::decode(any.value.as_slice()).unwrap();
        assert_eq!(decoded.name, cluster.name);
    }

    #[test]
    fn duration_conversion() {
        let d = duration(std::time::Duration::from_millis(5500));
        assert_eq!(d.seconds, 5);
        assert_eq!(d.nanos, 500_000_000);
    }
}
