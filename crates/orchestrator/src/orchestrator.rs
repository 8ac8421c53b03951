//! Startup sequencing, failure propagation and shutdown.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use convoy_runtime::ServiceRuntime;
use convoy_topology::{
    HealthCheckSpec, ResolvedEndpoints, Topology, TopologyError, resolve_endpoints,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::gate::{FailureReason, ReadinessGate, ReadinessState, WaitError};
use crate::injector::materialize_env;

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Orchestrator configuration.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// How long a dependent waits for its wait-for predecessors.
    pub startup_timeout: Duration,

    /// Services whose failure is fatal to the whole composition. A fatal
    /// failure aborts the run and shuts down everything already started;
    /// other failures stay contained to the affected subgraph.
    pub fatal_services: HashSet<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            fatal_services: HashSet::new(),
        }
    }
}

/// Final state of every service when the orchestrator exits.
#[derive(Clone, Debug)]
pub struct StartupReport {
    states: BTreeMap<String, ReadinessState>,
}

impl StartupReport {
    /// Per-service final states.
    #[must_use]
    pub fn states(&self) -> &BTreeMap<String, ReadinessState> {
        &self.states
    }

    /// Whether every service ended in Stopped. An empty composition is
    /// clean.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.states
            .values()
            .all(|state| matches!(state, ReadinessState::Stopped))
    }

    /// Services that did not end in a terminal Healthy/Stopped state.
    #[must_use]
    pub fn outstanding(&self) -> Vec<(&str, &ReadinessState)> {
        self.states
            .iter()
            .filter(|(_, state)| {
                !matches!(state, ReadinessState::Healthy | ReadinessState::Stopped)
            })
            .map(|(name, state)| (name.as_str(), state))
            .collect()
    }
}

impl fmt::Display for StartupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.states.is_empty() {
            return write!(f, "no services");
        }
        for (i, (name, state)) in self.states.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{name}: {state}")?;
        }
        Ok(())
    }
}

/// Drives the startup sequence of one topology.
///
/// Launches are issued sequentially in topological order; each launched
/// service's readiness watcher runs concurrently. A service is never
/// launched before all its wait-for predecessors are Healthy.
pub struct Orchestrator<R: ServiceRuntime> {
    topology: Topology,
    endpoints: ResolvedEndpoints,
    runtime: Arc<R>,
    gate: Arc<ReadinessGate>,
    config: OrchestratorConfig,
    launched: Mutex<Vec<(String, Arc<R::Handle>)>>,
    started: AtomicBool,
    shutdown_token: CancellationToken,
    fatal_tx: watch::Sender<Option<String>>,
    task_tracker: TaskTracker,
}

impl<R: ServiceRuntime> Orchestrator<R> {
    /// Creates an orchestrator for `topology`, resolving all endpoints up
    /// front.
    ///
    /// # Errors
    ///
    /// Returns a build-time error (port conflict) before any service is
    /// launched.
    pub fn new(topology: Topology, runtime: R, config: OrchestratorConfig) -> Result<Self> {
        let endpoints = resolve_endpoints(&topology)?;
        let gate = ReadinessGate::new(topology.services().iter().map(|s| s.name.clone()));

        Ok(Self {
            topology,
            endpoints,
            runtime: Arc::new(runtime),
            gate: Arc::new(gate),
            config,
            launched: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            fatal_tx: watch::channel(None).0,
            task_tracker: TaskTracker::new(),
        })
    }

    /// Token cancelled to request shutdown; cancellation propagates to all
    /// in-flight health-check waits.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// The resolved endpoint table of the active topology.
    #[must_use]
    pub fn endpoints(&self) -> &ResolvedEndpoints {
        &self.endpoints
    }

    /// Non-blocking snapshot of every service's readiness state.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ReadinessState> {
        self.gate.snapshot()
    }

    /// Launches every service in topological order.
    ///
    /// Returns once every service has either been handed to the runtime or
    /// marked Failed; readiness watchers may still be running. Individual
    /// service failures are recorded in the gate, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] on a second call, or a defensive
    /// topology error if an endpoint reference was never resolved.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let order: Vec<String> = self
            .topology
            .graph()
            .topological_order()
            .map(str::to_string)
            .collect();

        'services: for name in order {
            if self.shutdown_token.is_cancelled() {
                self.gate.set(&name, ReadinessState::Stopped);
                continue;
            }

            let Some(service) = self.topology.get(&name) else {
                continue;
            };

            for dependency in self.topology.graph().wait_for_dependencies(&name) {
                let wait = self
                    .gate
                    .await_healthy(dependency, self.config.startup_timeout, &self.shutdown_token)
                    .await;

                match wait {
                    Ok(()) => {}
                    Err(WaitError::Failed(_)) => {
                        self.record_failure(
                            &name,
                            FailureReason::BlockedBy(dependency.to_string()),
                        );
                        continue 'services;
                    }
                    Err(WaitError::TimedOut) => {
                        self.record_failure(&name, FailureReason::DependencyTimeout);
                        continue 'services;
                    }
                    Err(WaitError::Cancelled | WaitError::UnknownService) => {
                        self.gate.set(&name, ReadinessState::Stopped);
                        continue 'services;
                    }
                }
            }

            let env = materialize_env(service, &self.endpoints)?;
            let check = match &service.health_check {
                Some(check) => Some((check.clone(), self.probe_url(&name, check)?)),
                None => None,
            };

            self.gate.set(&name, ReadinessState::Starting);
            info!(service = %name, "launching");

            match self.runtime.launch(&name, &service.launch, env).await {
                Ok(handle) => {
                    let handle = Arc::new(handle);
                    self.launched
                        .lock()
                        .expect("launched lock poisoned")
                        .push((name.clone(), Arc::clone(&handle)));
                    self.spawn_watcher(name, check, handle);
                }
                Err(e) => {
                    error!(service = %name, "launch failed: {e}");
                    self.record_failure(&name, FailureReason::LaunchFailed);
                }
            }
        }

        Ok(())
    }

    /// Runs the composition until a shutdown signal or a fatal failure,
    /// then shuts down and reports.
    ///
    /// An empty topology completes immediately with a clean, empty report.
    ///
    /// # Errors
    ///
    /// Build-time errors and double starts only; runtime failures are
    /// reported through the returned [`StartupReport`].
    pub async fn run(&self) -> Result<StartupReport> {
        if self.topology.is_empty() {
            info!("no services configured; nothing to run");
            return Ok(StartupReport {
                states: self.gate.snapshot(),
            });
        }

        let mut fatal_rx = self.fatal_tx.subscribe();
        self.start().await?;

        let already_fatal = fatal_rx.borrow_and_update().clone();
        if let Some(service) = already_fatal {
            error!(service = %service, "fatal service failed during startup; aborting composition");
        } else if !self.shutdown_token.is_cancelled() {
            tokio::select! {
                () = self.shutdown_token.cancelled() => info!("shutdown requested"),
                changed = fatal_rx.changed() => {
                    if changed.is_ok() {
                        if let Some(service) = fatal_rx.borrow().clone() {
                            error!(service = %service, "fatal service failed; aborting composition");
                        }
                    }
                }
            }
        }

        self.shutdown().await;

        Ok(StartupReport {
            states: self.gate.snapshot(),
        })
    }

    /// Stops the composition: cancels all readiness watchers, then stops
    /// already-started services in reverse startup order.
    pub async fn shutdown(&self) {
        info!("shutting down composition");

        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        let launched: Vec<(String, Arc<R::Handle>)> = self
            .launched
            .lock()
            .expect("launched lock poisoned")
            .drain(..)
            .collect();

        for (name, handle) in launched.into_iter().rev() {
            info!(service = %name, "stopping");
            self.runtime.stop(&handle).await;
            self.gate.set(&name, ReadinessState::Stopped);
        }

        // Services that were never launched.
        for name in self.gate.snapshot().keys() {
            self.gate.set(name, ReadinessState::Stopped);
        }
    }

    fn probe_url(&self, service: &str, check: &HealthCheckSpec) -> Result<Url> {
        let unresolved = || TopologyError::UnresolvedReference {
            service: service.to_string(),
            endpoint: check.endpoint.clone(),
        };

        let base = self
            .endpoints
            .get(service, &check.endpoint)
            .ok_or_else(unresolved)?;
        let path = if check.path.starts_with('/') {
            check.path.clone()
        } else {
            format!("/{}", check.path)
        };

        Url::parse(&format!("{}{}", base.address(), path))
            .map_err(|_| unresolved().into())
    }

    fn record_failure(&self, service: &str, reason: FailureReason) {
        warn!(service = %service, %reason, "service failed");
        self.gate
            .set(service, ReadinessState::Failed(reason));
        if self.config.fatal_services.contains(service) {
            self.fatal_tx.send_replace(Some(service.to_string()));
        }
    }

    fn spawn_watcher(
        &self,
        name: String,
        check: Option<(HealthCheckSpec, Url)>,
        handle: Arc<R::Handle>,
    ) {
        let gate = Arc::clone(&self.gate);
        let runtime = Arc::clone(&self.runtime);
        let token = self.shutdown_token.clone();
        let fatal_tx = self.fatal_tx.clone();
        let is_fatal = self.config.fatal_services.contains(&name);

        self.task_tracker.spawn(async move {
            let Some((check, probe_url)) = check else {
                gate.set(&name, ReadinessState::Healthy);
                info!(service = %name, "healthy (no health check declared)");
                return;
            };

            let interval = check.interval();
            let outcome = tokio::time::timeout(check.timeout(), async {
                loop {
                    if token.is_cancelled() {
                        return false;
                    }
                    if runtime.health_check(&handle, &probe_url).await {
                        return true;
                    }
                    tokio::select! {
                        () = token.cancelled() => return false,
                        () = tokio::time::sleep(interval) => {}
                    }
                }
            })
            .await;

            match outcome {
                Ok(true) => {
                    gate.set(&name, ReadinessState::Healthy);
                    info!(service = %name, "healthy");
                }
                Ok(false) => gate.set(&name, ReadinessState::Stopped),
                Err(_) => {
                    warn!(
                        service = %name,
                        reason = %FailureReason::HealthCheckTimeout,
                        "service failed"
                    );
                    gate.set(
                        &name,
                        ReadinessState::Failed(FailureReason::HealthCheckTimeout),
                    );
                    if is_fatal {
                        fatal_tx.send_replace(Some(name.clone()));
                    }
                }
            }
        });
    }
}
