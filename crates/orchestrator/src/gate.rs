//! Per-service readiness state machine.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Why a service reached [`ReadinessState::Failed`].
///
/// The reasons are reported distinctly so operators can tell "never became
/// healthy" from "crashed immediately" from "a dependency took it down".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The launch itself failed.
    LaunchFailed,

    /// Health-check polling exceeded the service's deadline without a
    /// successful probe.
    HealthCheckTimeout,

    /// A wait-for predecessor did not become healthy within the startup
    /// timeout.
    DependencyTimeout,

    /// A wait-for predecessor failed; the service was never started.
    BlockedBy(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LaunchFailed => write!(f, "launch failed"),
            Self::HealthCheckTimeout => write!(f, "never became healthy within the deadline"),
            Self::DependencyTimeout => {
                write!(f, "wait-for dependency did not become healthy in time")
            }
            Self::BlockedBy(service) => write!(f, "blocked by failed dependency '{service}'"),
        }
    }
}

/// Readiness of one service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadinessState {
    /// Not yet launched.
    Pending,

    /// Launched, not yet healthy.
    Starting,

    /// Ready; dependents blocked on this service may start.
    Healthy,

    /// Terminal failure. Never left once entered; retry policy belongs to
    /// the external process supervisor.
    Failed(FailureReason),

    /// Shut down.
    Stopped,
}

impl ReadinessState {
    /// Whether no further transition is expected while the composition
    /// runs.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Healthy | Self::Failed(_) | Self::Stopped)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Starting => write!(f, "starting"),
            Self::Healthy => write!(f, "healthy"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Outcome of waiting on another service's readiness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitError {
    /// The awaited service failed.
    Failed(FailureReason),

    /// The deadline elapsed first.
    TimedOut,

    /// Shutdown was requested, or the awaited service was stopped.
    Cancelled,

    /// The service is not part of this topology.
    UnknownService,
}

/// State table gating dependent startup.
///
/// One watch channel per service: the service's own launch/poll routine is
/// the single writer, dependents read consistent per-service snapshots and
/// can await transitions without polling.
pub struct ReadinessGate {
    channels: HashMap<String, watch::Sender<ReadinessState>>,
}

impl ReadinessGate {
    /// Creates a gate with every service Pending.
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels = services
            .into_iter()
            .map(|name| (name.into(), watch::channel(ReadinessState::Pending).0))
            .collect();

        Self { channels }
    }

    /// Records a transition. Failed and Stopped are terminal: once entered
    /// they are never overwritten. Transitions for unknown services are
    /// ignored.
    pub fn set(&self, service: &str, state: ReadinessState) {
        if let Some(tx) = self.channels.get(service) {
            tx.send_if_modified(|current| {
                if current.is_settled() && !matches!(current, ReadinessState::Healthy) {
                    return false;
                }
                if *current == state {
                    return false;
                }
                *current = state.clone();
                true
            });
        }
    }

    /// The current state of `service`.
    #[must_use]
    pub fn state(&self, service: &str) -> Option<ReadinessState> {
        self.channels.get(service).map(|tx| tx.borrow().clone())
    }

    /// Subscribes to `service`'s transitions.
    #[must_use]
    pub fn subscribe(&self, service: &str) -> Option<watch::Receiver<ReadinessState>> {
        self.channels.get(service).map(watch::Sender::subscribe)
    }

    /// A consistent snapshot of the whole state table.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ReadinessState> {
        self.channels
            .iter()
            .map(|(name, tx)| (name.clone(), tx.borrow().clone()))
            .collect()
    }

    /// Waits until `service` is Healthy.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Failed`] if the service fails instead,
    /// [`WaitError::TimedOut`] if `deadline` elapses first, and
    /// [`WaitError::Cancelled`] on shutdown.
    pub async fn await_healthy(
        &self,
        service: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), WaitError> {
        let Some(mut rx) = self.subscribe(service) else {
            return Err(WaitError::UnknownService);
        };

        let settled = rx.wait_for(ReadinessState::is_settled);

        tokio::select! {
            () = cancel.cancelled() => Err(WaitError::Cancelled),
            outcome = tokio::time::timeout(deadline, settled) => match outcome {
                Err(_) => Err(WaitError::TimedOut),
                Ok(Err(_)) => Err(WaitError::Cancelled),
                Ok(Ok(state)) => match &*state {
                    ReadinessState::Healthy => Ok(()),
                    ReadinessState::Failed(reason) => Err(WaitError::Failed(reason.clone())),
                    _ => Err(WaitError::Cancelled),
                },
            },
        }
    }
}
