//! Startup orchestration for Convoy compositions.
//!
//! The orchestrator launches a validated topology in dependency order:
//! wait-for predecessors must be healthy before a dependent starts, endpoint
//! references are injected into each service's environment at launch time,
//! and failures propagate fail-fast to transitive dependents while leaving
//! unrelated branches running.

pub mod error;
pub mod gate;
pub mod injector;
mod orchestrator;

pub use error::Error;
pub use gate::{FailureReason, ReadinessGate, ReadinessState, WaitError};
pub use injector::materialize_env;
pub use orchestrator::{Orchestrator, OrchestratorConfig, StartupReport};
