//! Scripted in-memory [`ServiceRuntime`] for tests.
//!
//! Services are not executed; launches, injected environments and stop
//! calls are recorded so orchestration tests can assert on ordering and
//! materialised configuration. Per-service behaviour (launch failure,
//! probes until healthy, never healthy) is scripted up front.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use convoy_runtime::{Error, ServiceRuntime};
use convoy_topology::LaunchDescriptor;
use url::Url;

/// Scripted behaviour of one service.
#[derive(Clone, Debug, Default)]
pub struct Behaviour {
    /// Fail the launch itself.
    pub fail_launch: bool,

    /// Number of probes that fail before the service reports healthy.
    pub probes_until_healthy: u32,

    /// Never report healthy, regardless of probing.
    pub never_healthy: bool,
}

/// Handle to a scripted launch.
pub struct MockHandle {
    name: String,
    remaining_failures: AtomicU32,
    never_healthy: bool,
}

#[derive(Default)]
struct Records {
    launches: Vec<(String, HashMap<String, String>)>,
    stops: Vec<String>,
}

/// In-memory runtime with scripted per-service behaviour.
///
/// Clones share records, so a test can keep a clone while the orchestrator
/// owns the original.
#[derive(Clone, Default)]
pub struct MockRuntime {
    behaviours: Arc<Mutex<HashMap<String, Behaviour>>>,
    records: Arc<Mutex<Records>>,
}

impl MockRuntime {
    /// Creates a runtime where every service launches successfully and is
    /// healthy on the first probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the behaviour of `service`.
    #[must_use]
    pub fn with_behaviour(self, service: impl Into<String>, behaviour: Behaviour) -> Self {
        self.behaviours
            .lock()
            .expect("behaviours lock poisoned")
            .insert(service.into(), behaviour);
        self
    }

    /// Names of launched services, in launch order. Includes launches that
    /// were scripted to fail.
    #[must_use]
    pub fn launch_order(&self) -> Vec<String> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .launches
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The injected environment observed at `service`'s launch.
    #[must_use]
    pub fn injected_env(&self, service: &str) -> Option<HashMap<String, String>> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .launches
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, env)| env.clone())
    }

    /// Names of stopped services, in stop order.
    #[must_use]
    pub fn stop_order(&self) -> Vec<String> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .stops
            .clone()
    }
}

#[async_trait]
impl ServiceRuntime for MockRuntime {
    type Handle = MockHandle;

    async fn launch(
        &self,
        name: &str,
        _descriptor: &LaunchDescriptor,
        env: HashMap<String, String>,
    ) -> Result<Self::Handle, Error> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .launches
            .push((name.to_string(), env));

        let behaviour = self
            .behaviours
            .lock()
            .expect("behaviours lock poisoned")
            .get(name)
            .cloned()
            .unwrap_or_default();

        if behaviour.fail_launch {
            return Err(Error::Spawn {
                service: name.to_string(),
                source: std::io::Error::other("scripted launch failure"),
            });
        }

        Ok(MockHandle {
            name: name.to_string(),
            remaining_failures: AtomicU32::new(behaviour.probes_until_healthy),
            never_healthy: behaviour.never_healthy,
        })
    }

    async fn health_check(&self, handle: &Self::Handle, _probe_url: &Url) -> bool {
        if handle.never_healthy {
            return false;
        }

        handle
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_err()
    }

    async fn stop(&self, handle: &Self::Handle) {
        self.records
            .lock()
            .expect("records lock poisoned")
            .stops
            .push(handle.name.clone());
    }
}
