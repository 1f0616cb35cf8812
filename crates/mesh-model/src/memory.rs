//! In-memory configuration store.
//!
//! Used by tests and the debug registry. Revisions are a process-local
//! monotonic counter; event handlers fire synchronously after each
//! mutation, so from an observer's point of view the store behaves like a
//! fully caught-up cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use tracing::debug;

use crate::config::{
    Config, ConfigEventHandler, ConfigKind, ConfigStore, ConfigStoreCache, Event, NAMESPACE_ALL,
};
use crate::error::ModelError;

/// An in-memory [`ConfigStore`] with event notification.
#[derive(Default)]
pub struct MemConfigStore {
    /// Objects keyed by kind, then by `namespace/name`.
    objects: RwLock<HashMap<ConfigKind, HashMap<String, Config>>>,
    /// Handlers keyed by kind.
    handlers: Mutex<HashMap<ConfigKind, Vec<ConfigEventHandler>>>,
    /// Revision counter.
    revision: AtomicU64,
    /// Set once `run` has been entered.
    synced: AtomicBool,
}

impl MemConfigStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> String {
        self.revision.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn notify(&self, config: &Config, event: Event) {
        let handlers = self.handlers.lock().expect("handler lock poisoned");
        if let Some(list) = handlers.get(&config.kind()) {
            for handler in list {
                handler(config, event);
            }
        }
    }

    fn object_key(name: &str, namespace: &str) -> String {
        format!("{namespace}/{name}")
    }
}

impl std::fmt::Debug for MemConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemConfigStore")
            .field("revision", &self.revision.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ConfigStore for MemConfigStore {
    fn get(&self, kind: ConfigKind, name: &str, namespace: &str) -> Option<Config> {
        let objects = self.objects.read().expect("store lock poisoned");
        objects
            .get(&kind)
            .and_then(|m| m.get(&Self::object_key(name, namespace)))
            .cloned()
    }

    fn list(&self, kind: ConfigKind, namespace: &str) -> Vec<Config> {
        let objects = self.objects.read().expect("store lock poisoned");
        let Some(by_key) = objects.get(&kind) else {
            return Vec::new();
        };
        let mut out: Vec<Config> = by_key
            .values()
            .filter(|c| namespace == NAMESPACE_ALL || c.meta.namespace == namespace)
            .cloned()
            .collect();
        // Deterministic listing order for stable compilation output.
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        out
    }

    fn create(&self, mut config: Config) -> Result<String, ModelError> {
        config.validate()?;
        let key = Self::object_key(&config.meta.name, &config.meta.namespace);
        let revision = {
            let mut objects = self.objects.write().expect("store lock poisoned");
            let by_key = objects.entry(config.kind()).or_default();
            if by_key.contains_key(&key) {
                return Err(ModelError::AlreadyExists {
                    kind: config.kind(),
                    name: config.meta.name.clone(),
                    namespace: config.meta.namespace.clone(),
                });
            }
            let revision = self.next_revision();
            config.meta.resource_version = revision.clone();
            by_key.insert(key, config.clone());
            revision
        };
        debug!(key = %config.key(), revision = %revision, "created config");
        self.notify(&config, Event::Add);
        Ok(revision)
    }

    fn update(&self, mut config: Config) -> Result<String, ModelError> {
        config.validate()?;
        let key = Self::object_key(&config.meta.name, &config.meta.namespace);
        let revision = {
            let mut objects = self.objects.write().expect("store lock poisoned");
            let by_key = objects.entry(config.kind()).or_default();
            let Some(existing) = by_key.get(&key) else {
                return Err(ModelError::NotFound {
                    kind: config.kind(),
                    name: config.meta.name.clone(),
                    namespace: config.meta.namespace.clone(),
                });
            };
            if existing.meta.resource_version != config.meta.resource_version {
                return Err(ModelError::VersionMismatch {
                    kind: config.kind(),
                    name: config.meta.name.clone(),
                    namespace: config.meta.namespace.clone(),
                    given: config.meta.resource_version.clone(),
                });
            }
            let revision = self.next_revision();
            config.meta.resource_version = revision.clone();
            by_key.insert(key, config.clone());
            revision
        };
        debug!(key = %config.key(), revision = %revision, "updated config");
        self.notify(&config, Event::Update);
        Ok(revision)
    }

    fn delete(&self, kind: ConfigKind, name: &str, namespace: &str) -> Result<(), ModelError> {
        let key = Self::object_key(name, namespace);
        let removed = {
            let mut objects = self.objects.write().expect("store lock poisoned");
            objects.get_mut(&kind).and_then(|m| m.remove(&key))
        };
        match removed {
            Some(config) => {
                debug!(key = %config.key(), "deleted config");
                self.notify(&config, Event::Delete);
                Ok(())
            }
            None => Err(ModelError::NotFound {
                kind,
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl ConfigStoreCache for MemConfigStore {
    fn register_event_handler(&self, kind: ConfigKind, handler: ConfigEventHandler) {
        self.handlers
            .lock()
            .expect("handler lock poisoned")
            .entry(kind)
            .or_default()
            .push(handler);
    }

    async fn run(&self, stop: tokio::sync::oneshot::Receiver<()>) {
        // Nothing to synchronize against; the store is its own source of
        // truth.
        self.synced.store(true, Ordering::Release);
        let _ = stop.await;
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigMeta, ConfigSpec};
    use crate::specs::{Destination, DestinationWeight, HttpRoute, VirtualService};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn sample(name: &str) -> Config {
        Config::new(
            ConfigMeta::new(name, "default"),
            ConfigSpec::VirtualService(VirtualService {
                hosts: vec![name.to_string()],
                http: vec![HttpRoute {
                    route: vec![DestinationWeight {
                        destination: Destination {
                            host: name.to_string(),
                            ..Default::default()
                        },
                        weight: 0,
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }),
        )
    }

    #[test]
    fn create_get_list_delete() {
        let store = MemConfigStore::new();
        store.create(sample("a")).unwrap();
        store.create(sample("b")).unwrap();

        assert!(store
            .get(ConfigKind::VirtualService, "a", "default")
            .is_some());
        assert_eq!(
            store.list(ConfigKind::VirtualService, NAMESPACE_ALL).len(),
            2
        );
        assert_eq!(store.list(ConfigKind::VirtualService, "other").len(), 0);

        store
            .delete(ConfigKind::VirtualService, "a", "default")
            .unwrap();
        assert!(store
            .get(ConfigKind::VirtualService, "a", "default")
            .is_none());
    }

    #[test]
    fn create_conflict() {
        let store = MemConfigStore::new();
        store.create(sample("a")).unwrap();
        assert!(matches!(
            store.create(sample("a")),
            Err(ModelError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn update_requires_current_version() {
        let store = MemConfigStore::new();
        let rev = store.create(sample("a")).unwrap();

        // Stale version rejected.
        let mut stale = sample("a");
        stale.meta.resource_version = "bogus".into();
        assert!(matches!(
            store.update(stale),
            Err(ModelError::VersionMismatch { .. })
        ));

        // Current version accepted and bumps the revision.
        let mut fresh = sample("a");
        fresh.meta.resource_version = rev.clone();
        let new_rev = store.update(fresh).unwrap();
        assert_ne!(rev, new_rev);
    }

    #[test]
    fn update_missing_object() {
        let store = MemConfigStore::new();
        assert!(matches!(
            store.update(sample("ghost")),
            Err(ModelError::NotFound { .. })
        ));
    }

    #[test]
    fn events_fire_per_kind() {
        let store = MemConfigStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        store.register_event_handler(
            ConfigKind::VirtualService,
            Box::new(move |_, _| {
                seen.fetch_add(1, Ordering::Relaxed);
            }),
        );

        let rev = store.create(sample("a")).unwrap();
        let mut updated = sample("a");
        updated.meta.resource_version = rev;
        store.update(updated).unwrap();
        store
            .delete(ConfigKind::VirtualService, "a", "default")
            .unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn run_marks_synced() {
        let store = Arc::new(MemConfigStore::new());
        assert!(!store.has_synced());
        let (tx, rx) = tokio::sync::oneshot::channel();
        let run_store = Arc::clone(&store);
        let task = tokio::spawn(async move { run_store.run(rx).await });
        tx.send(()).unwrap();
        task.await.unwrap();
        assert!(store.has_synced());
    }
}
