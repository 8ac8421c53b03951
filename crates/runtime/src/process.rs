//! Local OS-process implementation of [`ServiceRuntime`].

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use convoy_topology::LaunchDescriptor;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::ServiceRuntime;

const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a launched local process.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    child: Mutex<Option<Child>>,
}

impl ProcessHandle {
    /// The OS process id, if the process is still attached.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }
}

/// Runs services as local OS processes.
///
/// Child stdout/stderr are forwarded line by line into `tracing` events
/// tagged with the service name. Health probes are plain HTTP GETs;
/// any 2xx response counts as healthy.
pub struct ProcessRuntime {
    client: reqwest::Client,
}

impl ProcessRuntime {
    /// Creates a process runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe HTTP client cannot be constructed.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }
}

fn forward_output<R>(service: String, stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                warn!(service = %service, "{line}");
            } else {
                info!(service = %service, "{line}");
            }
        }
    });
}

#[async_trait]
impl ServiceRuntime for ProcessRuntime {
    type Handle = ProcessHandle;

    async fn launch(
        &self,
        name: &str,
        descriptor: &LaunchDescriptor,
        env: HashMap<String, String>,
    ) -> Result<Self::Handle> {
        let mut command = Command::new(&descriptor.program);
        command
            .args(&descriptor.args)
            .envs(&descriptor.env)
            .envs(env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(working_dir) = &descriptor.working_dir {
            command.current_dir(working_dir);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            service: name.to_string(),
            source,
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(name.to_string(), stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(name.to_string(), stderr, true);
        }

        debug!(service = %name, pid = ?child.id(), "process launched");

        Ok(ProcessHandle {
            name: name.to_string(),
            child: Mutex::new(Some(child)),
        })
    }

    async fn health_check(&self, _handle: &Self::Handle, probe_url: &Url) -> bool {
        match self.client.get(probe_url.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn stop(&self, handle: &Self::Handle) {
        let taken = handle.child.lock().await.take();
        if let Some(mut child) = taken {
            info!(service = %handle.name, "stopping process");
            if let Err(e) = child.start_kill() {
                warn!(service = %handle.name, "failed to signal process: {e}");
            }
            match child.wait().await {
                Ok(status) => debug!(service = %handle.name, %status, "process exited"),
                Err(e) => warn!(service = %handle.name, "failed to reap process: {e}"),
            }
        } else {
            debug!(service = %handle.name, "no running process to stop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn launches_and_stops_a_process() {
        let runtime = ProcessRuntime::new().unwrap();
        let descriptor = LaunchDescriptor::new("sh", ["-c", "sleep 30"]);

        let handle = runtime
            .launch("sleeper", &descriptor, HashMap::new())
            .await
            .unwrap();
        assert!(handle.pid().await.is_some());

        runtime.stop(&handle).await;
        assert!(handle.pid().await.is_none());
    }

    #[tokio::test]
    async fn launch_failure_reports_the_service_name() {
        let runtime = ProcessRuntime::new().unwrap();
        let descriptor =
            LaunchDescriptor::new("definitely-not-a-real-binary", Vec::<String>::new());

        let err = runtime
            .launch("ghost", &descriptor, HashMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn injected_env_is_visible_to_the_process() {
        let runtime = ProcessRuntime::new().unwrap();
        let descriptor = LaunchDescriptor::new("sh", ["-c", "test \"$PROBE\" = value"]);

        let handle = runtime
            .launch(
                "env-check",
                &descriptor,
                HashMap::from([("PROBE".to_string(), "value".to_string())]),
            )
            .await
            .unwrap();

        let status = handle
            .child
            .lock()
            .await
            .as_mut()
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn probe_against_nothing_is_false_not_an_error() {
        let runtime = ProcessRuntime::new().unwrap();
        let descriptor = LaunchDescriptor::new("sh", ["-c", "sleep 1"]);
        let handle = runtime
            .launch("probe", &descriptor, HashMap::new())
            .await
            .unwrap();

        let url = Url::parse("http://localhost:1/health").unwrap();
        assert!(!runtime.health_check(&handle, &url).await);

        runtime.stop(&handle).await;
    }
}
