//! Environment-conditional topology selection and validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyError};
use crate::graph::DependencyGraph;
use crate::service::{ServiceDefinition, ValueExpr};

/// One environment-conditional block of the definition source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentBlock {
    /// Environment label the block applies to (e.g. `development`,
    /// `production`, `cloud`).
    pub environment: String,

    /// Services declared by the block, in declaration order.
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

/// The environment-selected, validated set of services plus their
/// dependency graph. Exactly one topology is active per run.
#[derive(Clone, Debug)]
pub struct Topology {
    services: Vec<ServiceDefinition>,
    graph: DependencyGraph,
}

impl Topology {
    /// Builds and validates a topology from a set of service definitions.
    ///
    /// Validation covers everything that must hold before any service is
    /// launched: unique names, no dangling dependency or endpoint
    /// references, and an acyclic wait-for subgraph.
    ///
    /// # Errors
    ///
    /// Returns the first build-time error encountered, in declaration
    /// order.
    pub fn build(services: Vec<ServiceDefinition>) -> Result<Self> {
        let mut by_name: HashMap<&str, &ServiceDefinition> = HashMap::new();
        for service in &services {
            if by_name.insert(&service.name, service).is_some() {
                return Err(TopologyError::DuplicateService(service.name.clone()));
            }
        }

        let mut graph = DependencyGraph::new(services.iter().map(|s| s.name.clone()));
        for service in &services {
            for edge in &service.dependencies {
                graph.add_edge(&service.name, &edge.service, edge.kind)?;
            }
        }
        graph.validate()?;

        // Deferred endpoint references must target declared endpoints, even
        // though the address itself is substituted only at launch time.
        for service in &services {
            for binding in &service.env {
                if let ValueExpr::EndpointRef {
                    service: target,
                    endpoint,
                } = &binding.value
                {
                    let declared = by_name
                        .get(target.as_str())
                        .is_some_and(|s| s.endpoint(endpoint).is_some());
                    if !declared {
                        return Err(TopologyError::UnresolvedReference {
                            service: target.clone(),
                            endpoint: endpoint.clone(),
                        });
                    }
                }
            }

            if let Some(check) = &service.health_check {
                if service.endpoint(&check.endpoint).is_none() {
                    return Err(TopologyError::UnresolvedReference {
                        service: service.name.clone(),
                        endpoint: check.endpoint.clone(),
                    });
                }
            }
        }

        Ok(Self { services, graph })
    }

    /// The services of the topology, in declaration order.
    #[must_use]
    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    /// Looks up a service by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    /// The dependency graph over the topology's services.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether the topology contains no services.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Selects the topology for `environment` from the definition source.
///
/// Selection is pure: when several blocks target the same environment
/// label, the last-declared matching block wins (later declarations
/// override earlier ones). When no block matches, the result is the empty
/// topology so unconfigured environments degrade to a no-op rather than
/// failing.
///
/// # Errors
///
/// Returns a build-time error if the selected block fails validation.
pub fn select_topology(blocks: &[EnvironmentBlock], environment: &str) -> Result<Topology> {
    let selected = blocks.iter().rev().find(|b| b.environment == environment);

    match selected {
        Some(block) => Topology::build(block.services.clone()),
        None => Topology::build(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{EndpointSpec, HealthCheckSpec, LaunchDescriptor};

    fn endpoint(label: &str, port: Option<u16>) -> EndpointSpec {
        EndpointSpec {
            label: label.to_string(),
            scheme: "http".to_string(),
            port,
            external: true,
            proxied: false,
        }
    }

    fn service(name: &str) -> ServiceDefinition {
        ServiceDefinition::new(name, LaunchDescriptor::new("true", Vec::<String>::new()))
    }

    #[test]
    fn later_matching_block_wins() {
        let blocks = vec![
            EnvironmentBlock {
                environment: "production".to_string(),
                services: vec![
                    service("web-app").with_endpoint(endpoint("http", Some(4000))),
                ],
            },
            EnvironmentBlock {
                environment: "production".to_string(),
                services: vec![
                    service("web-app")
                        .with_endpoint(endpoint("http", Some(4000)))
                        .with_health_check(HealthCheckSpec {
                            endpoint: "http".to_string(),
                            path: "/health".to_string(),
                            interval_ms: 1000,
                            timeout_ms: 30_000,
                        }),
                ],
            },
        ];

        let topology = select_topology(&blocks, "production").unwrap();
        assert_eq!(topology.len(), 1);
        assert!(
            topology.get("web-app").unwrap().health_check.is_some(),
            "the later block's definition should be selected"
        );
    }

    #[test]
    fn zero_matching_blocks_selects_the_empty_topology() {
        let blocks = vec![EnvironmentBlock {
            environment: "development".to_string(),
            services: vec![service("web-app")],
        }];

        let topology = select_topology(&blocks, "staging").unwrap();
        assert!(topology.is_empty());
    }

    #[test]
    fn duplicate_service_names_are_rejected() {
        let err = Topology::build(vec![service("api"), service("api")]).unwrap_err();
        assert_eq!(err, TopologyError::DuplicateService("api".to_string()));
    }

    #[test]
    fn dangling_wait_for_edges_are_rejected() {
        let err = Topology::build(vec![service("web").wait_for("api")]).unwrap_err();
        assert_eq!(
            err,
            TopologyError::UnknownService {
                dependent: "web".to_string(),
                dependency: "api".to_string(),
            }
        );
    }

    #[test]
    fn env_references_to_undeclared_endpoints_are_rejected() {
        let api = service("api");
        let web = service("web").with_env_endpoint("API_BASE_URL", "api", "https");

        let err = Topology::build(vec![api, web]).unwrap_err();
        assert_eq!(
            err,
            TopologyError::UnresolvedReference {
                service: "api".to_string(),
                endpoint: "https".to_string(),
            }
        );
    }

    #[test]
    fn health_checks_must_probe_a_declared_endpoint() {
        let api = service("api").with_health_check(HealthCheckSpec {
            endpoint: "https".to_string(),
            path: "/health".to_string(),
            interval_ms: 1000,
            timeout_ms: 30_000,
        });

        let err = Topology::build(vec![api]).unwrap_err();
        assert!(matches!(err, TopologyError::UnresolvedReference { .. }));
    }

    #[test]
    fn wait_for_cycles_fail_at_build_time() {
        let a = service("a").wait_for("b");
        let b = service("b").wait_for("a");

        let err = Topology::build(vec![a, b]).unwrap_err();
        match err {
            TopologyError::Cycle { path } => {
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }
}
