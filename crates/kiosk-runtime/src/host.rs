//! Host handles shared by every pane worker.

use std::sync::Arc;
use std::time::Duration;

use kiosk_host::{
    Launcher, ProcessTable, SystemLauncher, SystemProcessTable, SystemRunner, WindowSystem,
    X11Tools,
};

use crate::content::{ContentProbe, HttpProbe};

/// Every side-effecting boundary a worker touches. Cheap to clone.
#[derive(Clone)]
pub struct Host {
    pub windows: Arc<dyn WindowSystem>,
    pub processes: Arc<dyn ProcessTable>,
    pub launcher: Arc<dyn Launcher>,
    pub content: Arc<dyn ContentProbe>,
}

impl Host {
    /// Real X11 tools, `ps`, process spawning and HTTP probing.
    pub fn system(display: Option<String>) -> anyhow::Result<Self> {
        let runner = match display {
            Some(display) => SystemRunner::new().with_display(display),
            None => SystemRunner::new(),
        };
        Ok(Self {
            windows: Arc::new(X11Tools::new(runner.clone())),
            processes: Arc::new(SystemProcessTable::new(runner)),
            launcher: Arc::new(SystemLauncher),
            content: Arc::new(HttpProbe::new()?),
        })
    }
}

/// Upper bound on one host call from a session worker.
pub(crate) const HOST_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a blocking host call off the async workers, giving up after `limit`.
/// A call that overruns keeps its blocking thread until the tool returns;
/// the caller moves on.
pub(crate) async fn blocking<T, F>(limit: Duration, f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> Result<T, kiosk_host::HostError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(joined) => Ok(joined??),
        Err(_) => anyhow::bail!("host call did not return within {}ms", limit.as_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_host::HostError;

    #[tokio::test]
    async fn stuck_call_times_out() {
        let started = std::time::Instant::now();
        let err = blocking(Duration::from_millis(50), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .await
        .expect_err("call overruns its limit");
        assert!(err.to_string().contains("within 50ms"), "{err}");
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn host_errors_pass_through() {
        let err = blocking(HOST_CALL_TIMEOUT, || -> Result<(), HostError> {
            Err(HostError::CommandFailed {
                program: "xdotool".to_string(),
                detail: "BadWindow".to_string(),
            })
        })
        .await
        .expect_err("host error");
        assert!(err.to_string().contains("xdotool"), "{err}");
        assert_eq!(blocking(HOST_CALL_TIMEOUT, || Ok(7)).await.expect("value"), 7);
    }
}
