//! Deterministic endpoint resolution.

use std::collections::{HashMap, HashSet};

use url::Url;

use crate::builder::Topology;
use crate::error::{Result, TopologyError};

/// Host used for all resolved addresses. Convoy composes services on a
/// single host; multi-host placement is out of scope.
const RESOLVED_HOST: &str = "localhost";

/// Start of the reserved ephemeral range used for endpoints with no
/// explicit port.
const EPHEMERAL_PORT_BASE: u16 = 40_000;

/// Start of the range used for proxy intermediary addresses.
const PROXY_PORT_BASE: u16 = 21_000;

/// A concrete address bound to a declared endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Transport scheme.
    pub scheme: String,

    /// Host component of the address.
    pub host: String,

    /// Visible port. For proxied endpoints this is the intermediary's
    /// port, decoupled from whatever the process actually binds.
    pub port: u16,

    /// Whether the endpoint is exposed outside the composition.
    pub external: bool,

    /// Whether the address is an intermediary rather than the process's
    /// literal bound address.
    pub proxied: bool,
}

impl ResolvedEndpoint {
    /// Renders the endpoint as `scheme://host:port`, the exact form
    /// injected into dependent environments.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// The endpoint address as a parsed URL.
    ///
    /// # Panics
    ///
    /// Panics if the scheme is not a valid URL scheme; schemes come from
    /// validated definitions, so this indicates definition-source
    /// corruption.
    #[must_use]
    pub fn url(&self) -> Url {
        Url::parse(&self.address()).expect("resolved endpoint must form a valid URL")
    }
}

/// Immutable table of resolved endpoints, keyed by (service, label).
///
/// Bindings are invalidated when the topology is rebuilt; re-resolution
/// requires a fresh call to [`resolve_endpoints`].
#[derive(Clone, Debug, Default)]
pub struct ResolvedEndpoints {
    map: HashMap<(String, String), ResolvedEndpoint>,
}

impl ResolvedEndpoints {
    /// Looks up the resolved address of `service`'s endpoint `label`.
    #[must_use]
    pub fn get(&self, service: &str, label: &str) -> Option<&ResolvedEndpoint> {
        self.map.get(&(service.to_string(), label.to_string()))
    }

    /// Number of resolved endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no endpoints were resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Assigns a concrete address to every declared endpoint of `topology`.
///
/// Explicit ports are used unchanged. Endpoints without one are assigned
/// the next free port from the reserved ephemeral range, walking services
/// and endpoints in declaration order, so resolution is deterministic for
/// an unmodified topology. Proxied endpoints without an explicit port get
/// a stable intermediary address from a separate range.
///
/// # Errors
///
/// Returns [`TopologyError::PortConflict`] when two externally visible
/// endpoints claim the same explicit port.
pub fn resolve_endpoints(topology: &Topology) -> Result<ResolvedEndpoints> {
    let mut map = HashMap::new();
    let mut claimed: HashSet<u16> = HashSet::new();
    let mut external_owners: HashMap<u16, String> = HashMap::new();

    // Explicit ports first, so auto-assignment can skip them regardless of
    // declaration position.
    for service in topology.services() {
        for endpoint in &service.endpoints {
            let Some(port) = endpoint.port else { continue };
            let owner = format!("{}/{}", service.name, endpoint.label);

            if endpoint.external {
                if let Some(first) = external_owners.get(&port) {
                    return Err(TopologyError::PortConflict {
                        port,
                        first: first.clone(),
                        second: owner,
                    });
                }
                external_owners.insert(port, owner);
            }
            claimed.insert(port);
        }
    }

    let mut next_ephemeral = EPHEMERAL_PORT_BASE;
    let mut next_proxy = PROXY_PORT_BASE;

    for service in topology.services() {
        for endpoint in &service.endpoints {
            let port = match endpoint.port {
                Some(port) => port,
                None if endpoint.proxied => next_free(&mut next_proxy, &claimed),
                None => next_free(&mut next_ephemeral, &claimed),
            };

            map.insert(
                (service.name.clone(), endpoint.label.clone()),
                ResolvedEndpoint {
                    scheme: endpoint.scheme.clone(),
                    host: RESOLVED_HOST.to_string(),
                    port,
                    external: endpoint.external,
                    proxied: endpoint.proxied,
                },
            );
        }
    }

    Ok(ResolvedEndpoints { map })
}

fn next_free(cursor: &mut u16, claimed: &HashSet<u16>) -> u16 {
    while claimed.contains(cursor) {
        *cursor += 1;
    }
    let port = *cursor;
    *cursor += 1;
    port
}
