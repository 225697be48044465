//! Remote content liveness probe.

use std::time::Duration;

use async_trait::async_trait;

use kiosk_core::ProbeOutcome;

/// Liveness check against remote content, held behind
/// `Arc<dyn ContentProbe>` so tests can script outcomes.
#[async_trait]
pub trait ContentProbe: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;
}

/// HTTP GET probe. Any response below 500 counts as alive; server errors,
/// connection failures and timeouts do not.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kioskd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentProbe for HttpProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) if resp.status().is_server_error() => {
                tracing::debug!(url, status = %resp.status(), "probe: server error");
                ProbeOutcome::Failure
            }
            Ok(_) => ProbeOutcome::Success,
            Err(e) if e.is_timeout() => ProbeOutcome::Timeout,
            Err(e) => {
                tracing::debug!(url, error = %e, "probe failed");
                ProbeOutcome::Failure
            }
        }
    }
}
