//! Per-stream connection state.
//!
//! An [`XdsConnection`] tracks one attached proxy stream: its identity,
//! the resource types it watches, and the push channel its own stream
//! task drains. The watched sets are only mutated by the stream task;
//! other tasks touch the push channel alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use mesh_model::Proxy;
use mesh_proto::ResourceType;

/// A config or registry change that results in a push to one connection.
#[derive(Clone, Debug, Default)]
pub struct PushEvent {
    /// If non-empty, only endpoint assignments for these clusters are
    /// pushed.
    pub clusters: Vec<String>,
}

/// Summary of the last response sent for one resource type, kept for the
/// debug endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct LastPush {
    /// Version of the response.
    pub version: String,
    /// Nonce of the response.
    pub nonce: String,
    /// Number of resources it carried.
    pub resources: usize,
}

/// The watched-resource state of one connection.
#[derive(Debug, Default)]
pub struct WatchedState {
    /// Set once the proxy has subscribed to clusters.
    pub cds_watch: bool,
    /// Set once the proxy has subscribed to listeners.
    pub lds_watch: bool,
    /// Route configuration names the proxy requested.
    pub routes: Vec<String>,
    /// Endpoint clusters the proxy requested.
    pub clusters: Vec<String>,
    /// True once the connection is registered in the connection table.
    pub added: bool,
    /// Last pushed response per type.
    pub last_pushed: HashMap<&'static str, LastPush>,
}

/// One attached proxy stream.
#[derive(Debug)]
pub struct XdsConnection {
    /// Address of the peer, from the network layer.
    pub peer_addr: String,
    /// When the stream was opened.
    pub connected_at: Instant,
    /// Connection id; derived from the node id and a counter on the
    /// first request.
    con_id: OnceLock<String>,
    /// Parsed proxy identity, set on the first request carrying a node.
    proxy: RwLock<Option<Proxy>>,
    /// Push signal into the connection's stream task. Capacity one:
    /// an already-pending push absorbs later ones.
    push_tx: mpsc::Sender<PushEvent>,
    /// Watched resources; owned by the stream task.
    pub watched: Mutex<WatchedState>,
}

/// Counter feeding connection ids.
static CON_COUNTER: AtomicU64 = AtomicU64::new(1);

impl XdsConnection {
    /// Create connection state for a newly opened stream.
    #[must_use]
    pub fn new(peer_addr: String, push_tx: mpsc::Sender<PushEvent>) -> Self {
        Self {
            peer_addr,
            connected_at: Instant::now(),
            con_id: OnceLock::new(),
            proxy: RwLock::new(None),
            push_tx,
            watched: Mutex::new(WatchedState::default()),
        }
    }

    /// The connection id; empty until the first identified request.
    #[must_use]
    pub fn con_id(&self) -> &str {
        self.con_id.get().map(String::as_str).unwrap_or("")
    }

    /// The parsed proxy identity, if the stream has identified itself.
    #[must_use]
    pub fn proxy(&self) -> Option<Proxy> {
        self.proxy.read().expect("proxy lock poisoned").clone()
    }

    /// Record the proxy identity from a request's node, assigning the
    /// connection id on first sight.
    pub fn set_proxy(&self, proxy: Proxy) {
        self.con_id
            .get_or_init(|| format!("{}-{}", proxy.id, CON_COUNTER.fetch_add(1, Ordering::Relaxed)));
        *self.proxy.write().expect("proxy lock poisoned") = Some(proxy);
    }

    /// Signal the connection's stream task to republish. A push already
    /// pending on the channel absorbs this one.
    pub fn signal_push(&self, event: PushEvent) {
        match self.push_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(con = %self.con_id(), "push already pending; event coalesced");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(con = %self.con_id(), "push channel closed");
            }
        }
    }

    /// Record the response just sent for a resource type.
    pub fn record_push(&self, resource: ResourceType, version: &str, nonce: &str, count: usize) {
        let mut watched = self.watched.lock().expect("watched lock poisoned");
        watched.last_pushed.insert(
            resource.short_name(),
            LastPush {
                version: version.to_string(),
                nonce: nonce.to_string(),
                resources: count,
            },
        );
    }
}
