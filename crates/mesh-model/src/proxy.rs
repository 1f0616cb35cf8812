//! Proxy node identity.
//!
//! Every attached proxy announces a dot-separated identifier
//! `<type>.<ip>.<id>.<domain>`. The ip field may itself contain dots
//! (IPv4), so parsing consumes the longest leading run of segments that
//! forms a valid IP address; the id is the following segment and the
//! domain is the remainder.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// The role a proxy plays in the mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// A sidecar attached to a workload.
    Sidecar,
    /// A standalone ingress proxy.
    Ingress,
    /// A gateway workload.
    Router,
}

impl NodeType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sidecar" => Some(NodeType::Sidecar),
            "ingress" => Some(NodeType::Ingress),
            "router" => Some(NodeType::Router),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::Sidecar => "sidecar",
            NodeType::Ingress => "ingress",
            NodeType::Router => "router",
        };
        write!(f, "{s}")
    }
}

/// The parsed identity of an attached proxy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    /// Role of the proxy.
    pub node_type: NodeType,
    /// IP address the proxy reported.
    pub ip_address: String,
    /// Unique proxy id, typically `<name>` of the workload.
    pub id: String,
    /// DNS domain the proxy resolves short names in.
    pub domain: String,
    /// Free-form metadata announced by the proxy. Parsed opportunistically;
    /// unknown keys are kept as-is.
    pub metadata: HashMap<String, String>,
}

impl Proxy {
    /// Parse a node identifier of the form `<type>.<ip>.<id>.<domain>`.
    pub fn parse_node_id(node_id: &str) -> Result<Proxy, ModelError> {
        let malformed = || ModelError::MalformedNodeId(node_id.to_string());

        let (type_str, rest) = node_id.split_once('.').ok_or_else(malformed)?;
        let node_type = NodeType::parse(type_str).ok_or_else(malformed)?;

        let segments: Vec<&str> = rest.split('.').collect();
        // Consume the longest leading run of segments that parses as an IP,
        // leaving at least two segments for id and domain.
        let mut ip_end = 0;
        for end in (1..segments.len().saturating_sub(1)).rev() {
            if segments[..end].join(".").parse::<IpAddr>().is_ok() {
                ip_end = end;
                break;
            }
        }
        if ip_end == 0 {
            return Err(malformed());
        }

        Ok(Proxy {
            node_type,
            ip_address: segments[..ip_end].join("."),
            id: segments[ip_end].to_string(),
            domain: segments[ip_end + 1..].join("."),
            metadata: HashMap::new(),
        })
    }

    /// Attach proxy metadata, replacing any previously parsed set.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Reassemble the identifier this proxy was parsed from.
    #[must_use]
    pub fn service_node(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.node_type, self.ip_address, self.id, self.domain
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sidecar_node() {
        let proxy = Proxy::parse_node_id("sidecar.10.4.2.1.reviews-v1.default.svc.cluster.local")
            .expect("valid node id");
        assert_eq!(proxy.node_type, NodeType::Sidecar);
        assert_eq!(proxy.ip_address, "10.4.2.1");
        assert_eq!(proxy.id, "reviews-v1");
        assert_eq!(proxy.domain, "default.svc.cluster.local");
    }

    #[test]
    fn parse_router_node() {
        let proxy =
            Proxy::parse_node_id("router.172.16.0.8.gateway.cluster.local").expect("valid node id");
        assert_eq!(proxy.node_type, NodeType::Router);
        assert_eq!(proxy.ip_address, "172.16.0.8");
        assert_eq!(proxy.id, "gateway");
        assert_eq!(proxy.domain, "cluster.local");
    }

    #[test]
    fn round_trip() {
        let id = "ingress.10.0.0.1.istio-ingress.cluster.local";
        let proxy = Proxy::parse_node_id(id).unwrap();
        assert_eq!(proxy.service_node(), id);
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(Proxy::parse_node_id("lb.10.0.0.1.name.domain").is_err());
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(Proxy::parse_node_id("sidecar").is_err());
        assert!(Proxy::parse_node_id("sidecar.not-an-ip.name.domain").is_err());
    }
}
