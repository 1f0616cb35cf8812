//! # mesh-model
//!
//! The shared model of the meshwork control plane:
//!
//! - [`Hostname`] / [`Labels`] algebra used by routing predicates
//! - [`Service`] / [`ServiceInstance`] and the [`ServiceDiscovery`]
//!   registry read model
//! - [`Config`] objects with a closed [`ConfigKind`] descriptor set and
//!   the [`ConfigStore`] / [`ConfigStoreCache`] interfaces
//! - [`MeshConfigStore`], the typed query layer the compilers consume
//! - Conversion of service entries into the internal service model
//!
//! The model deliberately contains no I/O. Registry and store backends
//! live behind the traits; this crate ships in-memory implementations for
//! tests and debug tooling.

#![deny(unsafe_code)]

pub mod config;
pub mod entry;
pub mod error;
pub mod host;
pub mod labels;
pub mod memory;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod specs;
pub mod store;

pub use config::{
    config_key, Config, ConfigEventHandler, ConfigKind, ConfigMeta, ConfigSpec, ConfigStore,
    ConfigStoreCache, Event, Schema, MESH_GATEWAY, NAMESPACE_ALL,
};
pub use error::ModelError;
pub use host::{most_specific_host_match, Hostname};
pub use labels::{Labels, LabelsCollection};
pub use memory::MemConfigStore;
pub use proxy::{NodeType, Proxy};
pub use registry::{
    AggregateRegistry, InstanceHandler, MemServiceDiscovery, Registry, RegistryController,
    ServiceDiscovery, ServiceHandler,
};
pub use service::{
    ClusterName, NetworkEndpoint, Port, PortList, Protocol, Resolution, Service, ServiceInstance,
    TrafficDirection, BLACKHOLE_CLUSTER,
};
pub use store::{port_matches, resolve_hostname, resolve_shortname_to_fqdn, MeshConfigStore};
