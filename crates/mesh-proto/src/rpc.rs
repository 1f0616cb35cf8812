//! The `google.rpc.Status` shape carried in discovery NACKs.

/// Error details a proxy attaches when rejecting a pushed response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    /// Canonical status code.
    #[prost(int32, tag = "1")]
    pub code: i32,
    /// Developer-facing error message.
    #[prost(string, tag = "2")]
    pub message: String,
    /// Further detail payloads.
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<prost_types::Any>,
}
