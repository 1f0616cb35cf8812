//! Common wire types shared across resource messages.

use std::collections::HashMap;

/// Identity of a proxy node, announced on the first discovery request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Node {
    /// Opaque node identifier; the control plane parses it as
    /// `<type>.<ip>.<id>.<domain>`.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Cluster the node belongs to.
    #[prost(string, tag = "2")]
    pub cluster: String,
    /// Free-form node metadata.
    #[prost(map = "string, string", tag = "3")]
    pub metadata: HashMap<String, String>,
}

/// A single HTTP header.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderValue {
    /// Header name.
    #[prost(string, tag = "1")]
    pub key: String,
    /// Header value.
    #[prost(string, tag = "2")]
    pub value: String,
}

/// A header mutation entry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderValueOption {
    /// The header to append.
    #[prost(message, optional, tag = "1")]
    pub header: Option<HeaderValue>,
}

/// A file-backed data source, e.g. a certificate on disk.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataSource {
    /// Path to the file.
    #[prost(string, tag = "1")]
    pub filename: String,
}

impl DataSource {
    /// A data source referring to a file path.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            filename: path.into(),
        }
    }
}

/// A TCP socket address.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SocketAddress {
    /// IP address or DNS name.
    #[prost(string, tag = "1")]
    pub address: String,
    /// Port number.
    #[prost(uint32, tag = "2")]
    pub port_value: u32,
}

/// A network address.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Address {
    /// The socket address.
    #[prost(message, optional, tag = "1")]
    pub socket_address: Option<SocketAddress>,
}

impl Address {
    /// Build a socket address.
    pub fn socket(address: impl Into<String>, port: u16) -> Self {
        Self {
            socket_address: Some(SocketAddress {
                address: address.into(),
                port_value: u32::from(port),
            }),
        }
    }
}

/// A TLS certificate pair.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TlsCertificate {
    /// The certificate chain.
    #[prost(message, optional, tag = "1")]
    pub certificate_chain: Option<DataSource>,
    /// The private key.
    #[prost(message, optional, tag = "2")]
    pub private_key: Option<DataSource>,
}

/// Peer certificate validation settings.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CertificateValidationContext {
    /// Trusted CA bundle.
    #[prost(message, optional, tag = "1")]
    pub trusted_ca: Option<DataSource>,
    /// Accepted subject alternative names.
    #[prost(string, repeated, tag = "2")]
    pub verify_subject_alt_name: Vec<String>,
}

/// TLS settings shared by upstream and downstream contexts.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommonTlsContext {
    /// Certificates presented to the peer.
    #[prost(message, repeated, tag = "1")]
    pub tls_certificates: Vec<TlsCertificate>,
    /// How peer certificates are validated.
    #[prost(message, optional, tag = "2")]
    pub validation_context: Option<CertificateValidationContext>,
    /// ALPN protocols offered.
    #[prost(string, repeated, tag = "3")]
    pub alpn_protocols: Vec<String>,
}
