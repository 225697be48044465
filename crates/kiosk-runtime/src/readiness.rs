//! Startup gate task: feeds supervisor events into the readiness tracker
//! and flips the shared flag once.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use kiosk_core::ReadinessTracker;

use crate::supervisor::SupervisorEvent;

pub async fn run_readiness(
    mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
    ready_tx: watch::Sender<bool>,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let deadline = started + timeout;
    let now_ms = || u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let mut tracker = ReadinessTracker::new(0, timeout_ms);

    loop {
        if let Some(reason) = tracker.evaluate(now_ms()) {
            info!(?reason, elapsed_ms = now_ms(), "terminal ready");
            ready_tx.send_replace(true);
            return;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep_until(deadline) => {}
            event = events.recv() => match event {
                Some(SupervisorEvent::Assigned(panes)) => {
                    debug!(?panes, "assigned panes");
                    tracker.set_assigned(panes);
                }
                Some(SupervisorEvent::Rendered { pane }) => tracker.on_pane_rendered(pane, now_ms()),
                Some(_) => {}
                None => return,
            },
        }
    }
}
