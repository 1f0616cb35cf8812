//! Error type for model and store operations.

use crate::config::ConfigKind;

/// Errors produced by the configuration model and the stores behind it.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A config object failed its kind's semantic validation.
    #[error("invalid {kind} {name}.{namespace}: {reason}")]
    InvalidConfig {
        /// Kind of the rejected object.
        kind: ConfigKind,
        /// Object name.
        name: String,
        /// Object namespace.
        namespace: String,
        /// Why validation rejected it.
        reason: String,
    },

    /// A create hit an existing object with the same key.
    #[error("{kind} {name}.{namespace} already exists")]
    AlreadyExists {
        /// Kind of the object.
        kind: ConfigKind,
        /// Object name.
        name: String,
        /// Object namespace.
        namespace: String,
    },

    /// An update or delete referenced an object that is not in the store.
    #[error("{kind} {name}.{namespace} not found")]
    NotFound {
        /// Kind of the object.
        kind: ConfigKind,
        /// Object name.
        name: String,
        /// Object namespace.
        namespace: String,
    },

    /// An update carried a stale resource version.
    #[error("stale resource version for {kind} {name}.{namespace}: {given}")]
    VersionMismatch {
        /// Kind of the object.
        kind: ConfigKind,
        /// Object name.
        name: String,
        /// Object namespace.
        namespace: String,
        /// The stale version the caller supplied.
        given: String,
    },

    /// The spec payload does not match the kind in the metadata.
    #[error("spec kind {spec} does not match metadata kind {meta}")]
    KindMismatch {
        /// Kind carried by the payload.
        spec: ConfigKind,
        /// Kind declared in the metadata.
        meta: ConfigKind,
    },

    /// A node identifier could not be parsed.
    #[error("malformed node id: {0}")]
    MalformedNodeId(String),

    /// A cluster name did not follow the subset-key encoding.
    #[error("malformed cluster name: {0}")]
    InvalidClusterName(String),

    /// A registry adapter failed to answer a query.
    #[error("registry error: {0}")]
    Registry(String),
}
