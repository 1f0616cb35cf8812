//! Error type for the discovery server.

use mesh_model::ModelError;

/// Errors raised while serving discovery streams.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A model or store query failed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The first request on a stream carried no node identity.
    #[error("discovery request carries no node identity")]
    MissingNode,

    /// The response channel to the proxy closed mid-push.
    #[error("stream closed while sending {type_url}")]
    StreamClosed {
        /// The resource type being pushed.
        type_url: String,
    },
}

impl From<DiscoveryError> for tonic::Status {
    fn from(err: DiscoveryError) -> Self {
        match &err {
            DiscoveryError::Model(_) => tonic::Status::internal(err.to_string()),
            DiscoveryError::MissingNode => tonic::Status::invalid_argument(err.to_string()),
            DiscoveryError::StreamClosed { .. } => tonic::Status::unavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_node_maps_to_invalid_argument() {
        let status: tonic::Status = DiscoveryError::MissingNode.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
