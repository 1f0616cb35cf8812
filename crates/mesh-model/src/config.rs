//! Configuration descriptor and store interfaces.
//!
//! Config kinds form a closed set: [`ConfigKind`] enumerates them and owns
//! each kind's schema and validator, and [`ConfigSpec`] is the matching
//! tagged union of payloads, so a match over kinds is checked by the
//! compiler rather than by a runtime descriptor table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::labels::Labels;
use crate::specs::{
    AuthenticationPolicy, DestinationRule, Gateway, HttpApiSpec, HttpApiSpecBinding, QuotaSpec,
    QuotaSpecBinding, ServiceEntry, VirtualService,
};

/// The built-in gateway name that binds a virtual service to every
/// sidecar in the mesh.
pub const MESH_GATEWAY: &str = "mesh";

/// The designated namespace value that spans all namespaces in queries.
pub const NAMESPACE_ALL: &str = "";

/// A change observed on the config store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    /// Object created.
    Add,
    /// Object modified.
    Update,
    /// Object removed.
    Delete,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Event::Add => "add",
            Event::Update => "update",
            Event::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Descriptor of a configuration kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schema {
    /// Short type name, e.g. `virtual-service`.
    pub type_name: &'static str,
    /// Plural form of the type name.
    pub plural: &'static str,
    /// API group.
    pub group: &'static str,
    /// API version.
    pub version: &'static str,
    /// Qualified message name of the payload.
    pub message_name: &'static str,
}

/// The closed set of configuration kinds the control plane understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigKind {
    VirtualService,
    DestinationRule,
    Gateway,
    ServiceEntry,
    AuthenticationPolicy,
    HttpApiSpec,
    HttpApiSpecBinding,
    QuotaSpec,
    QuotaSpecBinding,
}

impl ConfigKind {
    /// All kinds, in registration order.
    pub const ALL: [ConfigKind; 9] = [
        ConfigKind::VirtualService,
        ConfigKind::DestinationRule,
        ConfigKind::Gateway,
        ConfigKind::ServiceEntry,
        ConfigKind::AuthenticationPolicy,
        ConfigKind::HttpApiSpec,
        ConfigKind::HttpApiSpecBinding,
        ConfigKind::QuotaSpec,
        ConfigKind::QuotaSpecBinding,
    ];

    /// The schema descriptor for this kind.
    #[must_use]
    pub fn schema(&self) -> Schema {
        match self {
            ConfigKind::VirtualService => Schema {
                type_name: "virtual-service",
                plural: "virtual-services",
                group: "networking",
                version: "v1alpha3",
                message_name: "mesh.networking.v1alpha3.VirtualService",
            },
            ConfigKind::DestinationRule => Schema {
                type_name: "destination-rule",
                plural: "destination-rules",
                group: "networking",
                version: "v1alpha3",
                message_name: "mesh.networking.v1alpha3.DestinationRule",
            },
            ConfigKind::Gateway => Schema {
                type_name: "gateway",
                plural: "gateways",
                group: "networking",
                version: "v1alpha3",
                message_name: "mesh.networking.v1alpha3.Gateway",
            },
            ConfigKind::ServiceEntry => Schema {
                type_name: "service-entry",
                plural: "service-entries",
                group: "networking",
                version: "v1alpha3",
                message_name: "mesh.networking.v1alpha3.ServiceEntry",
            },
            ConfigKind::AuthenticationPolicy => Schema {
                type_name: "policy",
                plural: "policies",
                group: "authentication",
                version: "v1alpha1",
                message_name: "mesh.authentication.v1alpha1.Policy",
            },
            ConfigKind::HttpApiSpec => Schema {
                type_name: "http-api-spec",
                plural: "http-api-specs",
                group: "config",
                version: "v1alpha2",
                message_name: "mesh.config.client.HttpApiSpec",
            },
            ConfigKind::HttpApiSpecBinding => Schema {
                type_name: "http-api-spec-binding",
                plural: "http-api-spec-bindings",
                group: "config",
                version: "v1alpha2",
                message_name: "mesh.config.client.HttpApiSpecBinding",
            },
            ConfigKind::QuotaSpec => Schema {
                type_name: "quota-spec",
                plural: "quota-specs",
                group: "config",
                version: "v1alpha2",
                message_name: "mesh.config.client.QuotaSpec",
            },
            ConfigKind::QuotaSpecBinding => Schema {
                type_name: "quota-spec-binding",
                plural: "quota-spec-bindings",
                group: "config",
                version: "v1alpha2",
                message_name: "mesh.config.client.QuotaSpecBinding",
            },
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.schema().type_name)
    }
}

/// The validated payload of a config object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigSpec {
    VirtualService(VirtualService),
    DestinationRule(DestinationRule),
    Gateway(Gateway),
    ServiceEntry(ServiceEntry),
    AuthenticationPolicy(AuthenticationPolicy),
    HttpApiSpec(HttpApiSpec),
    HttpApiSpecBinding(HttpApiSpecBinding),
    QuotaSpec(QuotaSpec),
    QuotaSpecBinding(QuotaSpecBinding),
}

impl ConfigSpec {
    /// The kind of this payload.
    #[must_use]
    pub fn kind(&self) -> ConfigKind {
        match self {
            ConfigSpec::VirtualService(_) => ConfigKind::VirtualService,
            ConfigSpec::DestinationRule(_) => ConfigKind::DestinationRule,
            ConfigSpec::Gateway(_) => ConfigKind::Gateway,
            ConfigSpec::ServiceEntry(_) => ConfigKind::ServiceEntry,
            ConfigSpec::AuthenticationPolicy(_) => ConfigKind::AuthenticationPolicy,
            ConfigSpec::HttpApiSpec(_) => ConfigKind::HttpApiSpec,
            ConfigSpec::HttpApiSpecBinding(_) => ConfigKind::HttpApiSpecBinding,
            ConfigSpec::QuotaSpec(_) => ConfigKind::QuotaSpec,
            ConfigSpec::QuotaSpecBinding(_) => ConfigKind::QuotaSpecBinding,
        }
    }

    /// Validate the payload. Validation is total: it never panics and
    /// rejects on semantic errors only.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ConfigSpec::VirtualService(vs) => {
                if vs.hosts.is_empty() {
                    return Err("virtual service must declare at least one host".into());
                }
                if vs.http.is_empty() && vs.tcp.is_empty() {
                    return Err("virtual service must declare at least one route".into());
                }
                for http in &vs.http {
                    if http.redirect.is_none() && http.route.is_empty() {
                        return Err("http rule must carry a route or a redirect".into());
                    }
                    if http.redirect.is_some() && !http.route.is_empty() {
                        return Err("http rule cannot carry both a route and a redirect".into());
                    }
                }
                Ok(())
            }
            ConfigSpec::DestinationRule(dr) => {
                if dr.host.is_empty() {
                    return Err("destination rule must name a host".into());
                }
                let mut seen = std::collections::BTreeSet::new();
                for subset in &dr.subsets {
                    if subset.name.is_empty() {
                        return Err("subset name cannot be empty".into());
                    }
                    if !seen.insert(&subset.name) {
                        return Err(format!("duplicate subset {}", subset.name));
                    }
                }
                Ok(())
            }
            ConfigSpec::Gateway(gw) => {
                if gw.servers.is_empty() {
                    return Err("gateway must expose at least one server".into());
                }
                for server in &gw.servers {
                    if server.port.number == 0 {
                        return Err("gateway server port must be positive".into());
                    }
                }
                Ok(())
            }
            ConfigSpec::ServiceEntry(se) => {
                if se.hosts.is_empty() {
                    return Err("service entry must declare at least one host".into());
                }
                if se.ports.is_empty() {
                    return Err("service entry must declare at least one port".into());
                }
                Ok(())
            }
            ConfigSpec::AuthenticationPolicy(_) => Ok(()),
            ConfigSpec::HttpApiSpec(_) | ConfigSpec::QuotaSpec(_) => Ok(()),
            ConfigSpec::HttpApiSpecBinding(b) => {
                if b.services.is_empty() {
                    return Err("binding must reference at least one service".into());
                }
                Ok(())
            }
            ConfigSpec::QuotaSpecBinding(b) => {
                if b.services.is_empty() {
                    return Err("binding must reference at least one service".into());
                }
                Ok(())
            }
        }
    }
}

/// Metadata attached to each configuration unit.
///
/// The key `(kind, namespace, name)` is unique in a store. The resource
/// version is opaque; clients rely on exact equality only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMeta {
    /// Object name, unique within kind and namespace.
    pub name: String,
    /// Namespace the object lives in.
    pub namespace: String,
    /// DNS suffix appended past the namespace when resolving short names.
    #[serde(default)]
    pub domain: String,
    /// Organizational labels.
    #[serde(default)]
    pub labels: Labels,
    /// Opaque annotations, preserved across updates.
    #[serde(default)]
    pub annotations: std::collections::BTreeMap<String, String>,
    /// Opaque version of the last mutation; empty before the first store
    /// write.
    #[serde(default)]
    pub resource_version: String,
}

impl ConfigMeta {
    /// Create metadata with a name and namespace.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Set the resolution domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }
}

/// A configuration unit: metadata plus a validated payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Identity and bookkeeping.
    pub meta: ConfigMeta,
    /// The payload.
    pub spec: ConfigSpec,
}

impl Config {
    /// Create a config unit.
    #[must_use]
    pub fn new(meta: ConfigMeta, spec: ConfigSpec) -> Self {
        Self { meta, spec }
    }

    /// The kind of this object, derived from the payload.
    #[must_use]
    pub fn kind(&self) -> ConfigKind {
        self.spec.kind()
    }

    /// The unique store key `kind/namespace/name`.
    #[must_use]
    pub fn key(&self) -> String {
        config_key(self.kind(), &self.meta.name, &self.meta.namespace)
    }

    /// Validate the payload, wrapping failures with this object's identity.
    pub fn validate(&self) -> Result<(), ModelError> {
        self.spec
            .validate()
            .map_err(|reason| ModelError::InvalidConfig {
                kind: self.kind(),
                name: self.meta.name.clone(),
                namespace: self.meta.namespace.clone(),
                reason,
            })
    }
}

/// Key function for configuration objects.
#[must_use]
pub fn config_key(kind: ConfigKind, name: &str, namespace: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

/// Handler invoked for each observed config event. Handlers must not
/// block the publisher; long work is enqueued elsewhere.
pub type ConfigEventHandler = Box<dyn Fn(&Config, Event) + Send + Sync>;

/// Untyped configuration store.
///
/// Mutations are asynchronous with respect to observers: a read issued
/// right after a successful write may not see the effect yet. Optimistic
/// concurrency is per object, via the resource version.
pub trait ConfigStore: Send + Sync {
    /// Retrieve an object by kind and key.
    fn get(&self, kind: ConfigKind, name: &str, namespace: &str) -> Option<Config>;

    /// List objects by kind; [`NAMESPACE_ALL`] spans all namespaces.
    fn list(&self, kind: ConfigKind, namespace: &str) -> Vec<Config>;

    /// Add a new object. Fails without side effects if the key exists.
    fn create(&self, config: Config) -> Result<String, ModelError>;

    /// Modify an existing object. The supplied resource version must equal
    /// the stored one.
    fn update(&self, config: Config) -> Result<String, ModelError>;

    /// Remove an object by key.
    fn delete(&self, kind: ConfigKind, name: &str, namespace: &str) -> Result<(), ModelError>;
}

/// A config store with a local, eventually consistent cache and event
/// notifications.
#[async_trait::async_trait]
pub trait ConfigStoreCache: ConfigStore {
    /// Register a handler for events on one kind. All handlers must be
    /// registered before [`ConfigStoreCache::run`] is called.
    fn register_event_handler(&self, kind: ConfigKind, handler: ConfigEventHandler);

    /// Run the cache until `stop` resolves.
    async fn run(&self, stop: tokio::sync::oneshot::Receiver<()>);

    /// True once the initial synchronization has completed.
    fn has_synced(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::{Destination, DestinationWeight, HttpRoute};

    fn sample_vs() -> ConfigSpec {
        ConfigSpec::VirtualService(VirtualService {
            hosts: vec!["reviews".into()],
            gateways: vec![],
            http: vec![HttpRoute {
                route: vec![DestinationWeight {
                    destination: Destination {
                        host: "reviews".into(),
                        ..Default::default()
                    },
                    weight: 0,
                }],
                ..Default::default()
            }],
            tcp: vec![],
        })
    }

    #[test]
    fn schema_round_trip() {
        for kind in ConfigKind::ALL {
            let schema = kind.schema();
            assert!(!schema.type_name.is_empty());
            assert!(schema.message_name.starts_with("mesh."));
        }
    }

    #[test]
    fn spec_kind_agrees_with_enum() {
        assert_eq!(sample_vs().kind(), ConfigKind::VirtualService);
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert!(sample_vs().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_hosts() {
        let spec = ConfigSpec::VirtualService(VirtualService {
            hosts: vec![],
            http: vec![HttpRoute::default()],
            ..Default::default()
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn validate_rejects_route_and_redirect() {
        let spec = ConfigSpec::VirtualService(VirtualService {
            hosts: vec!["a".into()],
            http: vec![HttpRoute {
                redirect: Some(crate::specs::HttpRedirect {
                    uri: "/new".into(),
                    authority: "b".into(),
                }),
                route: vec![DestinationWeight {
                    destination: Destination::default(),
                    weight: 100,
                }],
                ..Default::default()
            }],
            ..Default::default()
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_subsets() {
        let spec = ConfigSpec::DestinationRule(DestinationRule {
            host: "reviews".into(),
            subsets: vec![
                crate::specs::Subset {
                    name: "v1".into(),
                    ..Default::default()
                },
                crate::specs::Subset {
                    name: "v1".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn config_key_shape() {
        let config = Config::new(ConfigMeta::new("reviews", "default"), sample_vs());
        assert_eq!(config.key(), "virtual-service/default/reviews");
    }
}
