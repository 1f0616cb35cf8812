//! Endpoint assignment resources served over EDS.

use crate::core::Address;

/// One load-balanced endpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LbEndpoint {
    /// Where the endpoint listens.
    #[prost(message, optional, tag = "1")]
    pub address: Option<Address>,
    /// Relative weight within the locality.
    #[prost(uint32, tag = "2")]
    pub load_balancing_weight: u32,
}

/// Endpoints grouped by locality.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocalityLbEndpoints {
    /// The endpoints.
    #[prost(message, repeated, tag = "1")]
    pub lb_endpoints: Vec<LbEndpoint>,
}

/// The full endpoint assignment of one cluster.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusterLoadAssignment {
    /// Cluster the assignment belongs to.
    #[prost(string, tag = "1")]
    pub cluster_name: String,
    /// Endpoint groups.
    #[prost(message, repeated, tag = "2")]
    pub endpoints: Vec<LocalityLbEndpoints>,
}
