//! Listener scaffolding and filter marshaling.
//!
//! Listeners are assembled in two steps: [`build_listener`] creates the
//! scaffold (address, filter-chain matches, TLS contexts) with empty
//! filter lists, and [`marshal_filters`] folds the plugin-accumulated
//! filters plus the terminal filter (HTTP connection manager or TCP
//! proxy) into each chain.

use mesh_model::Protocol;
use mesh_proto::listener::{
    filter_names, http_connection_manager, DownstreamTlsContext, Filter, FilterChain,
    FilterChainMatch, HttpConnectionManager, HttpDirection, HttpFilter, Listener, Rds,
};
use mesh_proto::route::RouteConfiguration;
use mesh_proto::{to_any, type_urls};

use crate::plugin::FilterChainScaffold;

/// The wildcard bind address.
pub const WILDCARD_ADDRESS: &str = "0.0.0.0";

/// HTTP-level configuration of one filter chain.
#[derive(Clone, Debug)]
pub struct HttpChainOpts {
    /// Inline route configuration; `None` subscribes via RDS.
    pub route_config: Option<RouteConfiguration>,
    /// RDS route configuration name; used when `route_config` is `None`.
    pub rds_route_name: String,
    /// Trust the peer address for downstream identity.
    pub use_remote_address: bool,
    /// Stat and telemetry direction.
    pub direction: HttpDirection,
}

/// Configuration of one filter chain of a listener under construction.
#[derive(Clone, Debug, Default)]
pub struct FilterChainOpts {
    /// SNI names selecting this chain; empty matches any connection.
    pub sni_hosts: Vec<String>,
    /// Downstream TLS termination.
    pub tls_context: Option<DownstreamTlsContext>,
    /// HTTP configuration; `None` makes this a network-level chain.
    pub http: Option<HttpChainOpts>,
    /// Network filters for non-HTTP chains, in order.
    pub network_filters: Vec<Filter>,
}

/// Configuration of a listener under construction.
#[derive(Clone, Debug)]
pub struct ListenerOpts {
    /// Bind address.
    pub bind_address: String,
    /// Bind port.
    pub port: u16,
    /// Protocol served, for naming and stats.
    pub protocol: Protocol,
    /// Per-chain options.
    pub filter_chain_opts: Vec<FilterChainOpts>,
}

/// Error from marshaling a listener's filters.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// A filter chain ended up with no filters at all.
    #[error("listener {listener}: filter chain {chain} has no filters")]
    EmptyChain {
        /// The listener name.
        listener: String,
        /// Index of the empty chain.
        chain: usize,
    },
    /// Chain counts diverged between scaffold and options.
    #[error("listener {listener}: {scaffold} chains but {opts} chain opts")]
    ChainMismatch {
        /// The listener name.
        listener: String,
        /// Chains in the scaffold.
        scaffold: usize,
        /// Chains in the options.
        opts: usize,
    },
}

/// Build the listener scaffold: one [`FilterChain`] per chain option,
/// carrying its match and TLS context but no filters yet.
#[must_use]
pub fn build_listener(opts: &ListenerOpts) -> Listener {
    let filter_chains = opts
        .filter_chain_opts
        .iter()
        .map(|chain| FilterChain {
            filter_chain_match: if chain.sni_hosts.is_empty() {
                None
            } else {
                Some(FilterChainMatch {
                    sni_domains: chain.sni_hosts.clone(),
                })
            },
            tls_context: chain.tls_context.clone(),
            filters: Vec::new(),
        })
        .collect();

    Listener {
        name: format!(
            "{}_{}_{}",
            opts.protocol.to_string().to_lowercase(),
            opts.bind_address,
            opts.port
        ),
        address: Some(mesh_proto::core::Address::socket(
            opts.bind_address.clone(),
            opts.port,
        )),
        filter_chains,
    }
}

/// Fold accumulated filters and the terminal filter into each chain of
/// the listener. HTTP chains receive a connection manager whose filter
/// list is the plugin filters followed by CORS and the router; network
/// chains receive the plugin network filters followed by the chain's own.
pub fn marshal_filters(
    listener: &mut Listener,
    opts: &ListenerOpts,
    scaffolds: &[FilterChainScaffold],
) -> Result<(), ListenerError> {
    if listener.filter_chains.len() != opts.filter_chain_opts.len()
        || scaffolds.len() != opts.filter_chain_opts.len()
    {
        return Err(ListenerError::ChainMismatch {
            listener: listener.name.clone(),
            scaffold: listener.filter_chains.len(),
            opts: opts.filter_chain_opts.len(),
        });
    }

    for (index, ((chain, chain_opts), scaffold)) in listener
        .filter_chains
        .iter_mut()
        .zip(&opts.filter_chain_opts)
        .zip(scaffolds)
        .enumerate()
    {
        if let Some(http) = &chain_opts.http {
            let mut http_filters = scaffold.http_filters.clone();
            http_filters.push(HttpFilter {
                name: filter_names::CORS.into(),
                config: None,
            });
            http_filters.push(HttpFilter {
                name: filter_names::ROUTER.into(),
                config: None,
            });

            let route_specifier = match &http.route_config {
                Some(config) => {
                    http_connection_manager::RouteSpecifier::RouteConfig(config.clone())
                }
                None => http_connection_manager::RouteSpecifier::Rds(Rds {
                    route_config_name: http.rds_route_name.clone(),
                }),
            };
            let manager = HttpConnectionManager {
                stat_prefix: format!("{}_{}", listener.name, index),
                use_remote_address: http.use_remote_address,
                direction: http.direction as i32,
                http_filters,
                route_specifier: Some(route_specifier),
            };

            chain.filters.extend(scaffold.network_filters.clone());
            chain.filters.push(Filter {
                name: filter_names::HTTP_CONNECTION_MANAGER.into(),
                typed_config: Some(to_any(&manager, type_urls::HTTP_CONNECTION_MANAGER)),
            });
        } else {
            chain.filters.extend(scaffold.network_filters.clone());
            chain.filters.extend(chain_opts.network_filters.clone());
        }

        if chain.filters.is_empty() {
            return Err(ListenerError::EmptyChain {
                listener: listener.name.clone(),
                chain: index,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_proto::Message;

    fn opts(chains: Vec<FilterChainOpts>) -> ListenerOpts {
        ListenerOpts {
            bind_address: WILDCARD_ADDRESS.into(),
            port: 8080,
            protocol: Protocol::Http,
            filter_chain_opts: chains,
        }
    }

    fn http_chain(rds_name: &str) -> FilterChainOpts {
        FilterChainOpts {
            http: Some(HttpChainOpts {
                route_config: None,
                rds_route_name: rds_name.into(),
                use_remote_address: false,
                direction: HttpDirection::Egress,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn scaffold_has_empty_chains() {
        let listener = build_listener(&opts(vec![http_chain("8080")]));
        assert_eq!(listener.name, "http_0.0.0.0_8080");
        assert_eq!(listener.filter_chains.len(), 1);
        assert!(listener.filter_chains[0].filters.is_empty());
    }

    #[test]
    fn sni_hosts_populate_chain_match() {
        let chain = FilterChainOpts {
            sni_hosts: vec!["shop.example.com".into()],
            ..http_chain("443")
        };
        let listener = build_listener(&opts(vec![chain]));
        let m = listener.filter_chains[0]
            .filter_chain_match
            .as_ref()
            .expect("match");
        assert_eq!(m.sni_domains, vec!["shop.example.com".to_string()]);
    }

    #[test]
    fn marshal_appends_manager_with_router_last() {
        let o = opts(vec![http_chain("8080")]);
        let mut listener = build_listener(&o);
        let scaffolds = vec![FilterChainScaffold {
            http_filters: vec![HttpFilter {
                name: filter_names::AUTHN.into(),
                config: None,
            }],
            network_filters: vec![],
        }];
        marshal_filters(&mut listener, &o, &scaffolds).unwrap();

        let filters = &listener.filter_chains[0].filters;
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].name, filter_names::HTTP_CONNECTION_MANAGER);

        let manager = HttpConnectionManager::decode(
            filters[0].typed_config.as_ref().unwrap().value.as_slice(),
        )
        .unwrap();
        let names: Vec<&str> = manager.http_filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![filter_names::AUTHN, filter_names::CORS, filter_names::ROUTER]
        );
    }

    #[test]
    fn empty_tcp_chain_rejected() {
        let o = opts(vec![FilterChainOpts::default()]);
        let mut listener = build_listener(&o);
        let scaffolds = vec![FilterChainScaffold::default()];
        let err = marshal_filters(&mut listener, &o, &scaffolds).unwrap_err();
        assert!(matches!(err, ListenerError::EmptyChain { chain: 0, .. }));
    }
}
