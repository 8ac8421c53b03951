use thiserror::Error;

use convoy_topology::TopologyError;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the orchestrator's entry points.
///
/// Runtime failures of individual services are not errors at this level;
/// they are recorded in the readiness gate and surfaced through the
/// [`StartupReport`](crate::StartupReport).
#[derive(Debug, Error)]
pub enum Error {
    /// `start` was called twice on the same orchestrator.
    #[error("orchestrator already started")]
    AlreadyStarted,

    /// A build-time topology error. Surfaced before any service is
    /// launched.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}
