//! Declarative service composition for Convoy.
//!
//! This crate provides:
//! - Service definition types (`ServiceDefinition`, `EndpointSpec`, `EnvBinding`)
//! - Environment-conditional topology selection
//! - The wait-for dependency graph with cycle detection and topological ordering
//! - Deterministic endpoint resolution

pub mod builder;
pub mod error;
pub mod graph;
pub mod resolver;
pub mod service;

pub use builder::{EnvironmentBlock, Topology, select_topology};
pub use error::TopologyError;
pub use graph::DependencyGraph;
pub use resolver::{ResolvedEndpoint, ResolvedEndpoints, resolve_endpoints};
pub use service::{
    DependencyEdge, DependencyKind, EndpointSpec, EnvBinding, HealthCheckSpec, LaunchDescriptor,
    ServiceDefinition, ValueExpr,
};
