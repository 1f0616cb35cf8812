//! Typed queries layered over the untyped config store.
//!
//! [`MeshConfigStore`] adds the domain queries the compilers consume:
//! virtual services bound to a gateway set (with short names resolved to
//! FQDNs), gateways selected by workload labels, destination rules via
//! most-specific host match, authentication policy scoping, and the
//! binding resolvers that intersect HTTP API / quota references with
//! service identity.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::config::{Config, ConfigKind, ConfigMeta, ConfigSpec, ConfigStoreCache, MESH_GATEWAY, NAMESPACE_ALL};
use crate::host::{most_specific_host_match, Hostname};
use crate::labels::LabelsCollection;
use crate::service::{Port, ServiceInstance};
use crate::specs::{PortSelector, ServiceRef, VirtualService};

/// Resolve a possibly short host name to a fully qualified one.
///
/// The bare wildcard `*` and any name containing a dot are left alone;
/// otherwise the metadata namespace is appended, then `.svc.<domain>`
/// when the metadata carries a domain.
#[must_use]
pub fn resolve_shortname_to_fqdn(host: &str, meta: &ConfigMeta) -> Hostname {
    if host == "*" || host.contains('.') {
        return Hostname::new(host);
    }
    let mut out = host.to_string();
    if !meta.namespace.is_empty() {
        out.push('.');
        out.push_str(&meta.namespace);
    }
    if !meta.domain.is_empty() {
        out.push_str(".svc.");
        out.push_str(&meta.domain);
    }
    Hostname::new(out)
}

/// Resolve a structured service reference to a hostname. An explicit
/// `service` field takes precedence; otherwise the name is composed with
/// the reference's (or metadata's) namespace and domain.
#[must_use]
pub fn resolve_hostname(meta: &ConfigMeta, svc: &ServiceRef) -> Hostname {
    if !svc.service.is_empty() {
        return Hostname::new(svc.service.clone());
    }
    let mut out = svc.name.clone();
    if !svc.namespace.is_empty() {
        out.push('.');
        out.push_str(&svc.namespace);
    } else if !meta.namespace.is_empty() {
        out.push('.');
        out.push_str(&meta.namespace);
    }
    if !svc.domain.is_empty() {
        out.push('.');
        out.push_str(&svc.domain);
    } else if !meta.domain.is_empty() {
        out.push_str(".svc.");
        out.push_str(&meta.domain);
    }
    Hostname::new(out)
}

/// True if `port` is selected by `selector`.
#[must_use]
pub fn port_matches(port: &Port, selector: &PortSelector) -> bool {
    match selector {
        PortSelector::Name(name) => *name == port.name,
        PortSelector::Number(number) => *number == port.port,
    }
}

/// Typed view over a config store.
#[derive(Clone)]
pub struct MeshConfigStore {
    store: Arc<dyn ConfigStoreCache>,
}

impl MeshConfigStore {
    /// Wrap a store in the typed view.
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStoreCache>) -> Self {
        Self { store }
    }

    /// Access the underlying untyped store.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn ConfigStoreCache> {
        &self.store
    }

    /// All service entries.
    #[must_use]
    pub fn service_entries(&self) -> Vec<Config> {
        self.store.list(ConfigKind::ServiceEntry, NAMESPACE_ALL)
    }

    /// Virtual services bound to any of the given gateway names, with all
    /// short names (hosts, gateway references, destinations, mirrors)
    /// rewritten to FQDNs. Configs are returned as rewritten copies; the
    /// store's objects are never mutated.
    #[must_use]
    pub fn virtual_services(&self, gateways: &HashSet<String>) -> Vec<Config> {
        let configs = self.store.list(ConfigKind::VirtualService, NAMESPACE_ALL);

        let mut out = Vec::new();
        for config in configs {
            let ConfigSpec::VirtualService(rule) = &config.spec else {
                continue;
            };
            let bound = if rule.gateways.is_empty() {
                // A rule with no gateways applies only to the mesh gateway.
                gateways.contains(MESH_GATEWAY)
            } else {
                rule.gateways.iter().any(|g| {
                    // Gateway names do not use wildcard matching.
                    gateways
                        .contains(resolve_shortname_to_fqdn(g, &config.meta).as_str())
                        || (g == MESH_GATEWAY && gateways.contains(g))
                })
            };
            if bound {
                out.push(resolve_virtual_service(config));
            }
        }
        out
    }

    /// Gateways whose selector is a subset of the given workload labels.
    /// A gateway with no selector applies to every workload that asks.
    #[must_use]
    pub fn gateways(&self, workload_labels: &LabelsCollection) -> Vec<Config> {
        self.store
            .list(ConfigKind::Gateway, NAMESPACE_ALL)
            .into_iter()
            .filter(|config| {
                let ConfigSpec::Gateway(gateway) = &config.spec else {
                    return false;
                };
                gateway.selector.is_empty()
                    || workload_labels.is_superset_of(&gateway.selector)
            })
            .collect()
    }

    /// The destination rule for a hostname, chosen by most-specific host
    /// match over all rules' hosts.
    #[must_use]
    pub fn destination_rule(&self, hostname: &Hostname) -> Option<Config> {
        let configs = self.store.list(ConfigKind::DestinationRule, NAMESPACE_ALL);

        let mut hosts = Vec::with_capacity(configs.len());
        for config in &configs {
            let ConfigSpec::DestinationRule(rule) = &config.spec else {
                continue;
            };
            hosts.push(resolve_shortname_to_fqdn(&rule.host, &config.meta));
        }

        let best = most_specific_host_match(hostname, &hosts)?;
        let index = hosts.iter().position(|h| h == best)?;
        configs.into_iter().nth(index)
    }

    /// The labels selecting a named subset of a host, from its destination
    /// rule. Empty when the subset or the rule does not exist.
    #[must_use]
    pub fn subset_labels(&self, subset_name: &str, hostname: &Hostname) -> LabelsCollection {
        if subset_name.is_empty() {
            return LabelsCollection::new();
        }
        let Some(config) = self.destination_rule(hostname) else {
            return LabelsCollection::new();
        };
        let ConfigSpec::DestinationRule(rule) = &config.spec else {
            return LabelsCollection::new();
        };
        rule.subsets
            .iter()
            .filter(|s| s.name == subset_name)
            .map(|s| s.labels.clone())
            .collect()
    }

    /// The authentication policy for a destination host and port.
    ///
    /// When policies at several scopes match, the most specific wins:
    /// workload over namespace over global. Ties at the same scope are
    /// broken deterministically by the smallest config key.
    #[must_use]
    pub fn authentication_policy_by_destination(
        &self,
        hostname: &Hostname,
        port: &Port,
    ) -> Option<Config> {
        // The hostname is an FQDN, so the namespace is its second label.
        let namespace = hostname.as_str().split('.').nth(1)?;
        let specs = self.store.list(ConfigKind::AuthenticationPolicy, namespace);

        let mut out: Option<(u8, String, Config)> = None;
        for spec in specs {
            let ConfigSpec::AuthenticationPolicy(policy) = &spec.spec else {
                continue;
            };
            let match_level = if policy.targets.is_empty() {
                // Namespace scope.
                2
            } else {
                let mut level = 0;
                for target in &policy.targets {
                    let target_host = resolve_shortname_to_fqdn(&target.name, &spec.meta);
                    if &target_host != hostname {
                        continue;
                    }
                    if !target.ports.is_empty()
                        && !target.ports.iter().any(|sel| port_matches(port, sel))
                    {
                        continue;
                    }
                    level = 3;
                    break;
                }
                level
            };
            if match_level == 0 {
                continue;
            }
            let key = spec.key();
            let better = match &out {
                None => true,
                Some((level, best_key, _)) => {
                    match_level > *level || (match_level == *level && key < *best_key)
                }
            };
            if better {
                out = Some((match_level, key, spec));
            }
        }
        out.map(|(_, _, config)| config)
    }

    /// HTTP API specs bound to the instance's service.
    #[must_use]
    pub fn http_api_specs_by_destination(&self, instance: &ServiceInstance) -> Vec<Config> {
        let bindings = self
            .store
            .list(ConfigKind::HttpApiSpecBinding, NAMESPACE_ALL);
        let specs = self.store.list(ConfigKind::HttpApiSpec, NAMESPACE_ALL);

        let mut refs = BTreeSet::new();
        for binding in &bindings {
            let ConfigSpec::HttpApiSpecBinding(b) = &binding.spec else {
                continue;
            };
            if b.services
                .iter()
                .any(|s| resolve_hostname(&binding.meta, s) == instance.service.hostname)
            {
                for spec_ref in &b.api_specs {
                    let namespace = if spec_ref.namespace.is_empty() {
                        &binding.meta.namespace
                    } else {
                        &spec_ref.namespace
                    };
                    refs.insert(format!("{}/{namespace}", spec_ref.name));
                }
            }
        }

        specs
            .into_iter()
            .filter(|spec| refs.contains(&format!("{}/{}", spec.meta.name, spec.meta.namespace)))
            .collect()
    }

    /// Quota specs bound to the instance's service.
    #[must_use]
    pub fn quota_specs_by_destination(&self, instance: &ServiceInstance) -> Vec<Config> {
        let bindings = self.store.list(ConfigKind::QuotaSpecBinding, NAMESPACE_ALL);
        let specs = self.store.list(ConfigKind::QuotaSpec, NAMESPACE_ALL);

        let mut refs = BTreeSet::new();
        for binding in &bindings {
            let ConfigSpec::QuotaSpecBinding(b) = &binding.spec else {
                continue;
            };
            if b.services
                .iter()
                .any(|s| resolve_hostname(&binding.meta, s) == instance.service.hostname)
            {
                for spec_ref in &b.quota_specs {
                    let namespace = if spec_ref.namespace.is_empty() {
                        &binding.meta.namespace
                    } else {
                        &spec_ref.namespace
                    };
                    refs.insert(format!("{}/{namespace}", spec_ref.name));
                }
            }
        }

        specs
            .into_iter()
            .filter(|spec| refs.contains(&format!("{}/{}", spec.meta.name, spec.meta.namespace)))
            .collect()
    }
}

impl std::fmt::Debug for MeshConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshConfigStore").finish_non_exhaustive()
    }
}

/// Rewrite every short name in a virtual service to an FQDN, returning a
/// copy of the config.
fn resolve_virtual_service(mut config: Config) -> Config {
    let meta = config.meta.clone();
    let ConfigSpec::VirtualService(ref mut rule) = config.spec else {
        warn!(key = %config.key(), "virtual service query returned a foreign kind");
        return config;
    };
    resolve_rule(rule, &meta);
    config
}

fn resolve_rule(rule: &mut VirtualService, meta: &ConfigMeta) {
    for host in &mut rule.hosts {
        *host = resolve_shortname_to_fqdn(host, meta).as_str().to_string();
    }
    for gateway in &mut rule.gateways {
        // The built-in mesh gateway cannot be expanded into an FQDN.
        if gateway != MESH_GATEWAY {
            *gateway = resolve_shortname_to_fqdn(gateway, meta).as_str().to_string();
        }
    }
    for http in &mut rule.http {
        for clause in &mut http.matches {
            for gateway in &mut clause.gateways {
                if gateway != MESH_GATEWAY {
                    *gateway = resolve_shortname_to_fqdn(gateway, meta).as_str().to_string();
                }
            }
        }
        for weighted in &mut http.route {
            weighted.destination.host =
                resolve_shortname_to_fqdn(&weighted.destination.host, meta)
                    .as_str()
                    .to_string();
        }
        if let Some(mirror) = &mut http.mirror {
            mirror.host = resolve_shortname_to_fqdn(&mirror.host, meta)
                .as_str()
                .to_string();
        }
    }
    for tcp in &mut rule.tcp {
        for clause in &mut tcp.matches {
            for gateway in &mut clause.gateways {
                if gateway != MESH_GATEWAY {
                    *gateway = resolve_shortname_to_fqdn(gateway, meta).as_str().to_string();
                }
            }
        }
        for weighted in &mut tcp.route {
            weighted.destination.host =
                resolve_shortname_to_fqdn(&weighted.destination.host, meta)
                    .as_str()
                    .to_string();
        }
    }
}
