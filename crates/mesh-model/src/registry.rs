//! Service and endpoint registry adapters.
//!
//! [`ServiceDiscovery`] is the read model the compilers consume; platform
//! adapters implement it and emit [`Event`]s through a [`RegistryController`].
//! [`AggregateRegistry`] fans several adapters into one view, and
//! [`MemServiceDiscovery`] is the in-memory adapter used by the debug
//! endpoints and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::config::Event;
use crate::error::ModelError;
use crate::host::Hostname;
use crate::labels::LabelsCollection;
use crate::proxy::Proxy;
use crate::service::{Service, ServiceInstance};

/// Handler invoked on service add/update/delete.
pub type ServiceHandler = Box<dyn Fn(&Service, Event) + Send + Sync>;

/// Handler invoked on instance add/update/delete.
pub type InstanceHandler = Box<dyn Fn(&ServiceInstance, Event) + Send + Sync>;

/// Abstract read model over a platform service registry.
pub trait ServiceDiscovery: Send + Sync {
    /// All services known to the registry.
    fn services(&self) -> Result<Vec<Arc<Service>>, ModelError>;

    /// Look up a service by hostname.
    fn get_service(&self, hostname: &Hostname) -> Result<Option<Arc<Service>>, ModelError>;

    /// Instances of a service, filtered by port names and label sets.
    /// Empty filters match everything.
    fn instances(
        &self,
        hostname: &Hostname,
        ports: &[String],
        labels: &LabelsCollection,
    ) -> Result<Vec<ServiceInstance>, ModelError>;

    /// Instances co-located with the given proxy, keyed by its IP.
    fn get_proxy_service_instances(&self, proxy: &Proxy)
        -> Result<Vec<ServiceInstance>, ModelError>;

    /// Identities a service's workloads run as, for the given ports.
    fn get_service_accounts(&self, hostname: &Hostname, ports: &[String]) -> Vec<String>;
}

/// Event registration for a registry adapter.
pub trait RegistryController: Send + Sync {
    /// Register a handler for service events.
    fn append_service_handler(&self, handler: ServiceHandler);

    /// Register a handler for instance events.
    fn append_instance_handler(&self, handler: InstanceHandler);
}

/// One platform adapter registered with the aggregate.
pub struct Registry {
    /// Identifier of the backing cluster or platform.
    pub name: String,
    /// The adapter's read model.
    pub discovery: Arc<dyn ServiceDiscovery>,
    /// The adapter's event source.
    pub controller: Arc<dyn RegistryController>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Fans multiple registry adapters into a single read model.
///
/// Queries consult adapters in registration order; the first adapter that
/// knows a hostname wins for point lookups, and list queries concatenate.
#[derive(Default)]
pub struct AggregateRegistry {
    registries: RwLock<Vec<Registry>>,
}

impl AggregateRegistry {
    /// Create an empty aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter. Handlers registered through
    /// [`AggregateRegistry::append_service_handler`] before this call are
    /// not replayed to the new adapter.
    pub fn add_registry(&self, registry: Registry) {
        debug!(name = %registry.name, "adding service registry");
        self.registries
            .write()
            .expect("registry lock poisoned")
            .push(registry);
    }

    fn each<T>(&self, f: impl Fn(&Registry) -> Option<T>) -> Option<T> {
        let registries = self.registries.read().expect("registry lock poisoned");
        registries.iter().find_map(|r| f(r))
    }
}

impl ServiceDiscovery for AggregateRegistry {
    fn services(&self) -> Result<Vec<Arc<Service>>, ModelError> {
        let registries = self.registries.read().expect("registry lock poisoned");
        let mut out = Vec::new();
        for registry in registries.iter() {
            out.extend(registry.discovery.services()?);
        }
        Ok(out)
    }

    fn get_service(&self, hostname: &Hostname) -> Result<Option<Arc<Service>>, ModelError> {
        Ok(self.each(|r| r.discovery.get_service(hostname).ok().flatten()))
    }

    fn instances(
        &self,
        hostname: &Hostname,
        ports: &[String],
        labels: &LabelsCollection,
    ) -> Result<Vec<ServiceInstance>, ModelError> {
        let registries = self.registries.read().expect("registry lock poisoned");
        let mut out = Vec::new();
        for registry in registries.iter() {
            out.extend(registry.discovery.instances(hostname, ports, labels)?);
        }
        Ok(out)
    }

    fn get_proxy_service_instances(
        &self,
        proxy: &Proxy,
    ) -> Result<Vec<ServiceInstance>, ModelError> {
        let registries = self.registries.read().expect("registry lock poisoned");
        let mut out = Vec::new();
        for registry in registries.iter() {
            out.extend(registry.discovery.get_proxy_service_instances(proxy)?);
        }
        Ok(out)
    }

    fn get_service_accounts(&self, hostname: &Hostname, ports: &[String]) -> Vec<String> {
        let registries = self.registries.read().expect("registry lock poisoned");
        let mut out = Vec::new();
        for registry in registries.iter() {
            out.extend(registry.discovery.get_service_accounts(hostname, ports));
        }
        out.sort();
        out.dedup();
        out
    }
}

impl RegistryController for AggregateRegistry {
    fn append_service_handler(&self, handler: ServiceHandler) {
        let registries = self.registries.read().expect("registry lock poisoned");
        let shared = Arc::new(handler);
        for registry in registries.iter() {
            let shared = Arc::clone(&shared);
            registry
                .controller
                .append_service_handler(Box::new(move |svc, ev| shared(svc, ev)));
        }
    }

    fn append_instance_handler(&self, handler: InstanceHandler) {
        let registries = self.registries.read().expect("registry lock poisoned");
        let shared = Arc::new(handler);
        for registry in registries.iter() {
            let shared = Arc::clone(&shared);
            registry
                .controller
                .append_instance_handler(Box::new(move |inst, ev| shared(inst, ev)));
        }
    }
}

impl std::fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registries = self.registries.read().expect("registry lock poisoned");
        f.debug_struct("AggregateRegistry")
            .field("registries", &registries.len())
            .finish()
    }
}

/// In-memory service registry.
#[derive(Default)]
pub struct MemServiceDiscovery {
    services: RwLock<HashMap<Hostname, Arc<Service>>>,
    /// Instances keyed by `<hostname>:<port-name>`.
    instances: RwLock<HashMap<String, Vec<ServiceInstance>>>,
    /// Instances keyed by workload IP.
    ip_index: RwLock<HashMap<String, Vec<ServiceInstance>>>,
    /// Service accounts keyed by hostname.
    accounts: RwLock<HashMap<Hostname, Vec<String>>>,
    service_handlers: Mutex<Vec<ServiceHandler>>,
    instance_handlers: Mutex<Vec<InstanceHandler>>,
}

impl MemServiceDiscovery {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a service and notify handlers.
    pub fn add_service(&self, service: Service) -> Arc<Service> {
        let service = Arc::new(service);
        let previous = self
            .services
            .write()
            .expect("service lock poisoned")
            .insert(service.hostname.clone(), Arc::clone(&service));
        let event = if previous.is_some() {
            Event::Update
        } else {
            Event::Add
        };
        let handlers = self.service_handlers.lock().expect("handler lock poisoned");
        for handler in handlers.iter() {
            handler(&service, event);
        }
        service
    }

    /// Remove a service and notify handlers.
    pub fn remove_service(&self, hostname: &Hostname) {
        let removed = self
            .services
            .write()
            .expect("service lock poisoned")
            .remove(hostname);
        if let Some(service) = removed {
            let handlers = self.service_handlers.lock().expect("handler lock poisoned");
            for handler in handlers.iter() {
                handler(&service, Event::Delete);
            }
        }
    }

    /// Add an instance for a known service and notify handlers. Instances
    /// for unknown services are dropped.
    pub fn add_instance(&self, instance: ServiceInstance) {
        let hostname = instance.service.hostname.clone();
        if !self
            .services
            .read()
            .expect("service lock poisoned")
            .contains_key(&hostname)
        {
            debug!(%hostname, "dropping instance for unknown service");
            return;
        }

        let key = format!("{hostname}:{}", instance.endpoint.service_port.name);
        self.instances
            .write()
            .expect("instance lock poisoned")
            .entry(key)
            .or_default()
            .push(instance.clone());
        self.ip_index
            .write()
            .expect("instance lock poisoned")
            .entry(instance.endpoint.address.clone())
            .or_default()
            .push(instance.clone());

        let handlers = self.instance_handlers.lock().expect("handler lock poisoned");
        for handler in handlers.iter() {
            handler(&instance, Event::Add);
        }
    }

    /// Set the service accounts reported for a hostname.
    pub fn set_service_accounts(&self, hostname: Hostname, accounts: Vec<String>) {
        self.accounts
            .write()
            .expect("account lock poisoned")
            .insert(hostname, accounts);
    }
}

impl ServiceDiscovery for MemServiceDiscovery {
    fn services(&self) -> Result<Vec<Arc<Service>>, ModelError> {
        let services = self.services.read().expect("service lock poisoned");
        let mut out: Vec<Arc<Service>> = services.values().cloned().collect();
        out.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Ok(out)
    }

    fn get_service(&self, hostname: &Hostname) -> Result<Option<Arc<Service>>, ModelError> {
        Ok(self
            .services
            .read()
            .expect("service lock poisoned")
            .get(hostname)
            .cloned())
    }

    fn instances(
        &self,
        hostname: &Hostname,
        ports: &[String],
        labels: &LabelsCollection,
    ) -> Result<Vec<ServiceInstance>, ModelError> {
        let instances = self.instances.read().expect("instance lock poisoned");
        let mut out = Vec::new();
        for port in ports {
            let key = format!("{hostname}:{port}");
            if let Some(list) = instances.get(&key) {
                out.extend(
                    list.iter()
                        .filter(|i| labels.is_empty() || labels.has_subset_of(&i.labels))
                        .cloned(),
                );
            }
        }
        Ok(out)
    }

    fn get_proxy_service_instances(
        &self,
        proxy: &Proxy,
    ) -> Result<Vec<ServiceInstance>, ModelError> {
        Ok(self
            .ip_index
            .read()
            .expect("instance lock poisoned")
            .get(&proxy.ip_address)
            .cloned()
            .unwrap_or_default())
    }

    fn get_service_accounts(&self, hostname: &Hostname, _ports: &[String]) -> Vec<String> {
        self.accounts
            .read()
            .expect("account lock poisoned")
            .get(hostname)
            .cloned()
            .unwrap_or_default()
    }
}

impl RegistryController for MemServiceDiscovery {
    fn append_service_handler(&self, handler: ServiceHandler) {
        self.service_handlers
            .lock()
            .expect("handler lock poisoned")
            .push(handler);
    }

    fn append_instance_handler(&self, handler: InstanceHandler) {
        self.instance_handlers
            .lock()
            .expect("handler lock poisoned")
            .push(handler);
    }
}

impl std::fmt::Debug for MemServiceDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let services = self.services.read().expect("service lock poisoned");
        f.debug_struct("MemServiceDiscovery")
            .field("services", &services.len())
            .finish_non_exhaustive()
    }
}
