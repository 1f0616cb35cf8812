//! The push coordinator.
//!
//! Config and registry change events are cheap to raise and expensive to
//! act on, so the coordinator collapses bursts: the first event arms a
//! debounce window, events landing inside the window are absorbed, and a
//! single [`DiscoveryServer::push_all`] fires when it closes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use mesh_model::ConfigKind;

use crate::server::DiscoveryServer;

/// Debounced trigger for global pushes.
#[derive(Clone)]
pub struct PushCoordinator {
    tx: mpsc::Sender<()>,
}

impl PushCoordinator {
    /// Spawn the coordinator task for a server.
    #[must_use]
    pub fn start(server: Arc<DiscoveryServer>) -> Self {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let window = server.config().debounce_window;

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Let the burst land, then drain whatever piled up.
                tokio::time::sleep(window).await;
                while rx.try_recv().is_ok() {}
                debug!("debounce window closed; pushing");
                server.push_all();
            }
        });

        Self { tx }
    }

    /// Record a change event. Never blocks: with a fanout already
    /// pending, the event is absorbed into it.
    pub fn trigger(&self) {
        let _ = self.tx.try_send(());
    }

    /// Register this coordinator as the handler for every config kind
    /// and for registry service/instance events.
    pub fn wire_events(&self, server: &DiscoveryServer) {
        let env = server.environment();
        for kind in ConfigKind::ALL {
            let coordinator = self.clone();
            env.config.register_event_handler(
                kind,
                Box::new(move |_, _| {
                    coordinator.trigger();
                }),
            );
        }
        let coordinator = self.clone();
        env.controller.append_service_handler(Box::new(move |_, _| {
            coordinator.trigger();
        }));
        let coordinator = self.clone();
        env.controller
            .append_instance_handler(Box::new(move |_, _| {
                coordinator.trigger();
            }));
    }
}

impl std::fmt::Debug for PushCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushCoordinator").finish_non_exhaustive()
    }
}
