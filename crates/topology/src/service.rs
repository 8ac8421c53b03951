//! Immutable descriptions of deployable units.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_HEALTH_INTERVAL_MS: u64 = 1000;
const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 30_000;

/// Opaque launch descriptor handed to the process runtime.
///
/// The core never interprets the program or its arguments; tooling choices
/// (npm vs pnpm, run scripts, container images) are encoded here by the
/// definition source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchDescriptor {
    /// Program to execute.
    pub program: String,

    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory, if any.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Static environment variables, applied before injected bindings.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl LaunchDescriptor {
    /// Creates a descriptor for `program` with the given arguments.
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

/// A declared endpoint of a service, prior to resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Label unique within the owning service (e.g. `http`, `https`).
    pub label: String,

    /// Transport scheme used when rendering the resolved address.
    pub scheme: String,

    /// Explicit port. When absent a port is assigned from the reserved
    /// ephemeral range at resolution time.
    #[serde(default)]
    pub port: Option<u16>,

    /// Whether the endpoint is exposed outside the composition.
    #[serde(default)]
    pub external: bool,

    /// Whether the visible address is rewritten by an intermediary rather
    /// than being the process's literal bound address.
    #[serde(default)]
    pub proxied: bool,
}

/// Health-check descriptor: an endpoint to probe plus a path.
///
/// Success means an HTTP 2xx response for the process runtime; other
/// runtimes may define success differently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Label of the endpoint to probe.
    pub endpoint: String,

    /// Request path, e.g. `/health`.
    pub path: String,

    /// Interval between probes, in milliseconds.
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,

    /// Deadline for the service to become healthy, in milliseconds.
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_health_interval_ms() -> u64 {
    DEFAULT_HEALTH_INTERVAL_MS
}

fn default_health_timeout_ms() -> u64 {
    DEFAULT_HEALTH_TIMEOUT_MS
}

impl HealthCheckSpec {
    /// Interval between probes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Deadline for the service to become healthy.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Value expression of an environment-variable binding.
///
/// Endpoint references are deferred: the concrete address is substituted at
/// launch time, not at definition time, so ports assigned late are still
/// observed correctly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueExpr {
    /// A literal string value.
    Literal(String),

    /// The resolved address of another service's endpoint.
    EndpointRef {
        /// Service owning the endpoint.
        service: String,
        /// Endpoint label.
        endpoint: String,
    },
}

/// An environment-variable binding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvBinding {
    /// Variable name.
    pub key: String,

    /// Value expression.
    pub value: ValueExpr,
}

/// Kind of a dependency edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Needs the dependency's resolved endpoint value only; carries no
    /// ordering constraint.
    Reference,

    /// The dependency must reach Healthy before the dependent starts.
    WaitFor,
}

/// A dependency declared by a service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Name of the dependency.
    pub service: String,

    /// Edge kind.
    pub kind: DependencyKind,
}

/// Immutable description of one deployable unit.
///
/// Created once per topology build from the definition source and never
/// mutated for the duration of the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Name, unique within a topology.
    pub name: String,

    /// Launch descriptor handed to the process runtime.
    pub launch: LaunchDescriptor,

    /// Declared endpoints, in declaration order.
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,

    /// Environment-variable bindings materialised at launch time.
    #[serde(default)]
    pub env: Vec<EnvBinding>,

    /// Declared dependencies.
    #[serde(default)]
    pub dependencies: Vec<DependencyEdge>,

    /// Optional health check. Absent means the service is considered
    /// healthy immediately after a successful launch.
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,
}

impl ServiceDefinition {
    /// Creates a definition with no endpoints, bindings or dependencies.
    pub fn new(name: impl Into<String>, launch: LaunchDescriptor) -> Self {
        Self {
            name: name.into(),
            launch,
            endpoints: Vec::new(),
            env: Vec::new(),
            dependencies: Vec::new(),
            health_check: None,
        }
    }

    /// Declares an endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: EndpointSpec) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Declares a reference edge to `service`.
    #[must_use]
    pub fn with_reference(mut self, service: impl Into<String>) -> Self {
        self.dependencies.push(DependencyEdge {
            service: service.into(),
            kind: DependencyKind::Reference,
        });
        self
    }

    /// Declares a wait-for edge to `service`.
    #[must_use]
    pub fn wait_for(mut self, service: impl Into<String>) -> Self {
        self.dependencies.push(DependencyEdge {
            service: service.into(),
            kind: DependencyKind::WaitFor,
        });
        self
    }

    /// Binds `key` to a literal value.
    #[must_use]
    pub fn with_env_literal(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvBinding {
            key: key.into(),
            value: ValueExpr::Literal(value.into()),
        });
        self
    }

    /// Binds `key` to the resolved address of another service's endpoint.
    #[must_use]
    pub fn with_env_endpoint(
        mut self,
        key: impl Into<String>,
        service: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        self.env.push(EnvBinding {
            key: key.into(),
            value: ValueExpr::EndpointRef {
                service: service.into(),
                endpoint: endpoint.into(),
            },
        });
        self
    }

    /// Declares a health check.
    #[must_use]
    pub fn with_health_check(mut self, health_check: HealthCheckSpec) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// Looks up a declared endpoint by label.
    #[must_use]
    pub fn endpoint(&self, label: &str) -> Option<&EndpointSpec> {
        self.endpoints.iter().find(|e| e.label == label)
    }
}
