//! The routable service model produced by registry adapters.
//!
//! A [`Service`] is a named destination with a set of typed ports and a
//! resolution mode; a [`ServiceInstance`] is one running endpoint behind
//! it. Cluster identifiers derived from services use the stable subset-key
//! encoding `direction|subset|host|port` behind the [`ClusterName`]
//! newtype, so the string form never leaks into call sites by accident.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::host::Hostname;
use crate::labels::Labels;

/// Well-known name of the cluster that drops all traffic. Used as the
/// sentinel destination when cluster resolution fails.
pub const BLACKHOLE_CLUSTER: &str = "BlackHoleCluster";

/// Application protocol spoken on a service port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
    Http2,
    Grpc,
    #[default]
    Tcp,
    Tls,
    Udp,
    Mongo,
    Redis,
}

impl Protocol {
    /// Parse a protocol from its port-name form. Unrecognized values fall
    /// back to TCP, matching registry adapters that default untyped ports.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            "http2" => Protocol::Http2,
            "grpc" => Protocol::Grpc,
            "tls" => Protocol::Tls,
            "udp" => Protocol::Udp,
            "mongo" => Protocol::Mongo,
            "redis" => Protocol::Redis,
            _ => Protocol::Tcp,
        }
    }

    /// True for protocols that are routed through HTTP virtual hosts.
    #[must_use]
    pub fn is_http(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Http2 | Protocol::Grpc)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Http2 => "HTTP2",
            Protocol::Grpc => "GRPC",
            Protocol::Tcp => "TCP",
            Protocol::Tls => "TLS",
            Protocol::Udp => "UDP",
            Protocol::Mongo => "Mongo",
            Protocol::Redis => "Redis",
        };
        write!(f, "{s}")
    }
}

/// A typed service port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Port name, unique within the service.
    pub name: String,
    /// Port number, unique within the service.
    pub port: u16,
    /// Application protocol.
    pub protocol: Protocol,
}

impl Port {
    /// Create a new port.
    #[must_use]
    pub fn new(name: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            port,
            protocol,
        }
    }
}

/// The ports declared by a service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortList(Vec<Port>);

impl PortList {
    /// Create a port list.
    #[must_use]
    pub fn new(ports: Vec<Port>) -> Self {
        Self(ports)
    }

    /// Look up a port by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Port> {
        self.0.iter().find(|p| p.name == name)
    }

    /// Look up a port by number.
    #[must_use]
    pub fn get_by_port(&self, number: u16) -> Option<&Port> {
        self.0.iter().find(|p| p.port == number)
    }

    /// Iterate over the ports in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.0.iter()
    }

    /// Number of declared ports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no ports are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Port>> for PortList {
    fn from(v: Vec<Port>) -> Self {
        Self(v)
    }
}

/// How endpoints for a service are discovered by the data plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The control plane pushes endpoints; the proxy balances over them.
    #[default]
    ClientSideLb,
    /// The proxy resolves the hostname via DNS and balances over the
    /// answers.
    DnsLb,
    /// The proxy forwards to the original destination address untouched.
    Passthrough,
}

/// A routable destination in the mesh.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Fully qualified hostname of the service.
    pub hostname: Hostname,
    /// Virtual address, empty when the service has none.
    pub address: String,
    /// Declared ports.
    pub ports: PortList,
    /// Endpoint discovery mode.
    pub resolution: Resolution,
    /// True for destinations outside the mesh.
    pub mesh_external: bool,
    /// Identities the service's workloads run as.
    pub service_accounts: Vec<String>,
}

impl Service {
    /// Shorthand constructor for a client-side load-balanced service.
    #[must_use]
    pub fn new(hostname: impl Into<Hostname>, ports: Vec<Port>) -> Self {
        Self {
            hostname: hostname.into(),
            ports: PortList::new(ports),
            ..Default::default()
        }
    }
}

/// The network address of one running endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    /// Endpoint IP address or DNS name.
    pub address: String,
    /// Port the endpoint listens on.
    pub port: u16,
    /// The service port this endpoint serves.
    pub service_port: Port,
}

/// A running endpoint of a service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// The service this instance belongs to.
    pub service: Arc<Service>,
    /// Where the instance can be reached.
    pub endpoint: NetworkEndpoint,
    /// Workload labels of the instance.
    pub labels: Labels,
}

/// Direction of traffic relative to the proxy a cluster is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficDirection {
    Inbound,
    Outbound,
}

impl TrafficDirection {
    /// The wire form used inside subset keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficDirection::Inbound => "inbound",
            TrafficDirection::Outbound => "outbound",
        }
    }
}

impl fmt::Display for TrafficDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A cluster identifier.
///
/// The string encoding `direction|subset|host|port-name` is stable wire
/// format; [`ClusterName::subset_key`] and [`ClusterName::parse_subset_key`]
/// form a bijection over it. The blackhole cluster is the one name that
/// does not follow the encoding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterName(String);

impl ClusterName {
    /// Build a subset key from its parts.
    #[must_use]
    pub fn subset_key(
        direction: TrafficDirection,
        subset: &str,
        hostname: &Hostname,
        port_name: &str,
    ) -> Self {
        Self(format!("{direction}|{subset}|{hostname}|{port_name}"))
    }

    /// The well-known blackhole cluster.
    #[must_use]
    pub fn blackhole() -> Self {
        Self(BLACKHOLE_CLUSTER.to_string())
    }

    /// True if this is the blackhole sentinel.
    #[must_use]
    pub fn is_blackhole(&self) -> bool {
        self.0 == BLACKHOLE_CLUSTER
    }

    /// Split a subset key back into (direction, subset, hostname, port
    /// name). Fails on the blackhole cluster and any other name that does
    /// not follow the encoding.
    pub fn parse_subset_key(&self) -> Result<(TrafficDirection, &str, Hostname, &str), ModelError> {
        let mut parts = self.0.split('|');
        let direction = match parts.next() {
            Some("inbound") => TrafficDirection::Inbound,
            Some("outbound") => TrafficDirection::Outbound,
            _ => return Err(ModelError::InvalidClusterName(self.0.clone())),
        };
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(subset), Some(host), Some(port), None) => {
                Ok((direction, subset, Hostname::new(host), port))
            }
            _ => Err(ModelError::InvalidClusterName(self.0.clone())),
        }
    }

    /// The cluster name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClusterName {
    fn from(s: String) -> Self {
        Self(s)
    }
}
