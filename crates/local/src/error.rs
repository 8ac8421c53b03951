use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// JSON deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Orchestrator error.
    #[error(transparent)]
    Orchestrator(#[from] convoy_orchestrator::Error),

    /// Process runtime error.
    #[error(transparent)]
    Runtime(#[from] convoy_runtime::Error),

    /// Could not set global default subscriber.
    #[error("could not set global default subscriber: {0}")]
    SetTracing(#[from] tracing::dispatcher::SetGlobalDefaultError),

    /// Topology definition error.
    #[error(transparent)]
    Topology(#[from] convoy_topology::TopologyError),
}

impl Error {
    /// Process exit code for this error. Definition and topology problems
    /// exit 2, runtime problems exit 1.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Io(_)
            | Self::Json(_)
            | Self::Topology(_)
            | Self::Orchestrator(convoy_orchestrator::Error::Topology(_)) => 2,
            _ => 1,
        }
    }
}
