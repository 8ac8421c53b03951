use thiserror::Error;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a service runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to construct the HTTP client used for health probes.
    #[error(transparent)]
    HttpClient(#[from] reqwest::Error),

    /// Failed to spawn the service's process.
    #[error("failed to spawn '{service}': {source}")]
    Spawn {
        /// The service being launched.
        service: String,
        /// The underlying spawn failure.
        #[source]
        source: std::io::Error,
    },
}
