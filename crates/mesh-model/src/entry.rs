//! Conversion of service entries into the internal service model.
//!
//! Each (host, valid address) pair yields one [`Service`]; addresses that
//! are neither plain IPs nor CIDR blocks are skipped. Entries resolved via
//! DNS with no explicit endpoints synthesize one instance per host so the
//! data plane still has something to resolve against.

use std::net::IpAddr;
use std::sync::Arc;

use crate::host::Hostname;
use crate::labels::Labels;
use crate::service::{
    NetworkEndpoint, Port, PortList, Protocol, Resolution, Service, ServiceInstance,
};
use crate::specs::{EntryLocation, EntryPort, EntryResolution, ServiceEntry};

fn convert_port(port: &EntryPort) -> Port {
    Port::new(port.name.clone(), port.number, Protocol::parse(&port.protocol))
}

/// True for plain IP addresses and CIDR blocks.
fn is_static_address(address: &str) -> bool {
    if address.parse::<IpAddr>().is_ok() {
        return true;
    }
    match address.split_once('/') {
        Some((ip, prefix)) => {
            ip.parse::<IpAddr>().is_ok() && prefix.parse::<u8>().is_ok()
        }
        None => false,
    }
}

/// Convert a service entry into internal services.
#[must_use]
pub fn convert_services(entry: &ServiceEntry) -> Vec<Service> {
    let resolution = match entry.resolution {
        EntryResolution::None => Resolution::Passthrough,
        EntryResolution::Dns => Resolution::DnsLb,
        EntryResolution::Static => Resolution::ClientSideLb,
    };
    let mesh_external = entry.location == EntryLocation::MeshExternal;

    let ports: Vec<Port> = entry.ports.iter().map(convert_port).collect();

    let mut out = Vec::new();
    for host in &entry.hosts {
        if entry.addresses.is_empty() {
            out.push(Service {
                hostname: Hostname::new(host.clone()),
                address: String::new(),
                ports: PortList::new(ports.clone()),
                resolution,
                mesh_external,
                service_accounts: Vec::new(),
            });
        } else {
            for address in &entry.addresses {
                if is_static_address(address) {
                    out.push(Service {
                        hostname: Hostname::new(host.clone()),
                        address: address.clone(),
                        ports: PortList::new(ports.clone()),
                        resolution,
                        mesh_external,
                        service_accounts: Vec::new(),
                    });
                }
            }
        }
    }
    out
}

/// Convert a service entry into service instances.
#[must_use]
pub fn convert_instances(entry: &ServiceEntry) -> Vec<ServiceInstance> {
    let mut out = Vec::new();
    for service in convert_services(entry) {
        let service = Arc::new(service);
        for entry_port in &entry.ports {
            let service_port = convert_port(entry_port);

            if entry.endpoints.is_empty() && entry.resolution == EntryResolution::Dns {
                // DNS entries with no endpoints get one synthesized
                // instance per declared host.
                for host in &entry.hosts {
                    out.push(ServiceInstance {
                        service: Arc::clone(&service),
                        endpoint: NetworkEndpoint {
                            address: host.clone(),
                            port: entry_port.number,
                            service_port: service_port.clone(),
                        },
                        labels: Labels::new(),
                    });
                }
            }

            for endpoint in &entry.endpoints {
                let target_port = endpoint
                    .ports
                    .get(&entry_port.name)
                    .copied()
                    .unwrap_or(entry_port.number);
                out.push(ServiceInstance {
                    service: Arc::clone(&service),
                    endpoint: NetworkEndpoint {
                        address: endpoint.address.clone(),
                        port: target_port,
                        service_port: service_port.clone(),
                    },
                    labels: endpoint.labels.clone(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::EntryEndpoint;
    use std::collections::BTreeMap;

    fn entry() -> ServiceEntry {
        ServiceEntry {
            hosts: vec!["external.example.com".into()],
            addresses: vec![],
            ports: vec![EntryPort {
                number: 443,
                name: "https".into(),
                protocol: "HTTPS".into(),
            }],
            location: EntryLocation::MeshExternal,
            resolution: EntryResolution::Dns,
            endpoints: vec![],
        }
    }

    #[test]
    fn converts_resolution_modes() {
        let mut e = entry();
        assert_eq!(convert_services(&e)[0].resolution, Resolution::DnsLb);
        e.resolution = EntryResolution::None;
        assert_eq!(convert_services(&e)[0].resolution, Resolution::Passthrough);
        e.resolution = EntryResolution::Static;
        assert_eq!(convert_services(&e)[0].resolution, Resolution::ClientSideLb);
    }

    #[test]
    fn one_service_per_valid_address() {
        let mut e = entry();
        e.addresses = vec![
            "192.168.1.1".into(),
            "10.0.0.0/8".into(),
            "not-an-address".into(),
        ];
        let services = convert_services(&e);
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].address, "192.168.1.1");
        assert_eq!(services[1].address, "10.0.0.0/8");
        assert!(services.iter().all(|s| s.mesh_external));
    }

    #[test]
    fn dns_without_endpoints_synthesizes_instances() {
        let instances = convert_instances(&entry());
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].endpoint.address, "external.example.com");
        assert_eq!(instances[0].endpoint.port, 443);
    }

    #[test]
    fn explicit_endpoints_override_port_by_name() {
        let mut e = entry();
        e.resolution = EntryResolution::Static;
        e.endpoints = vec![EntryEndpoint {
            address: "10.1.1.1".into(),
            ports: BTreeMap::from([("https".to_string(), 8443)]),
            labels: Labels::new().with("version", "v1"),
        }];

        let instances = convert_instances(&e);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].endpoint.port, 8443);
        assert_eq!(instances[0].labels.get("version"), Some("v1"));
    }
}
