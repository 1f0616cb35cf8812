//! # mesh-discovery
//!
//! The aggregated discovery server of the meshwork control plane:
//!
//! - [`DiscoveryServer`] - owns the connection table, the endpoint
//!   assignment cache, and the model snapshot
//! - [`AdsService`] - the gRPC stream handler, one task per proxy
//! - [`PushCoordinator`] - debounces change events into global fanouts
//! - Debug HTTP endpoints for introspecting live state
//! - Metrics for rejects, endpoint counts, and connected clients
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mesh_discovery::{AdsService, DiscoveryConfig, DiscoveryServer, Environment, PushCoordinator};
//!
//! let env = Environment::new(discovery, controller, config_store);
//! let server = DiscoveryServer::new(env, DiscoveryConfig::from_env());
//!
//! let coordinator = PushCoordinator::start(Arc::clone(&server));
//! coordinator.wire_events(&server);
//!
//! tonic::transport::Server::builder()
//!     .add_service(AdsService::new(server).into_service())
//!     .serve("[::]:15010".parse()?)
//!     .await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ads;
pub mod config;
pub mod connection;
pub mod debug;
pub mod eds;
pub mod error;
pub mod metrics;
pub mod push;
pub mod server;


pub use ads::{AdsResponseStream, AdsService};
pub use config::DiscoveryConfig;
pub use connection::{LastPush, PushEvent, WatchedState, XdsConnection};
pub use eds::{compute_load_assignment, EdsCache, EdsCluster};
pub use error::DiscoveryError;
pub use push::PushCoordinator;
pub use server::{DiscoveryServer, Environment};
