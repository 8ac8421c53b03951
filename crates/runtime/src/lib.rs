//! The process-runtime seam of Convoy.
//!
//! The orchestrator treats whatever executes a service as an external
//! collaborator behind [`ServiceRuntime`]: launch with a materialised
//! environment, probe readiness, stop. [`ProcessRuntime`] is the real
//! implementation over local OS processes; scripted substitutes live in
//! `convoy-runtime-mock`.

mod error;
mod process;

pub use error::Error;
pub use process::{ProcessHandle, ProcessRuntime};

use std::collections::HashMap;

use async_trait::async_trait;
use convoy_topology::LaunchDescriptor;
use url::Url;

/// Executes services on behalf of the orchestrator.
#[async_trait]
pub trait ServiceRuntime: Send + Sync + 'static {
    /// Handle to a launched service.
    type Handle: Send + Sync + 'static;

    /// Launches `name` from its descriptor with the given injected
    /// environment, which is applied on top of the descriptor's static
    /// environment.
    async fn launch(
        &self,
        name: &str,
        descriptor: &LaunchDescriptor,
        env: HashMap<String, String>,
    ) -> Result<Self::Handle, Error>;

    /// Probes the service once. Probe failures are ordinary `false`
    /// results, not errors; the caller owns retry and deadline policy.
    async fn health_check(&self, handle: &Self::Handle, probe_url: &Url) -> bool;

    /// Stops the service.
    async fn stop(&self, handle: &Self::Handle);
}
