//! Per-pane session worker: shared context and dispatch by source kind.
//!
//! One worker task drives one [`EmbeddingSession`]. It owns the process and
//! window handles of its session and releases them before it exits, so the
//! supervisor can await the task and know the pane region is free.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kiosk_core::{PaneIndex, Placement, Source, SourceKind, Tuning};
use kiosk_supervisor::{Directive, EmbeddingSession, SessionEvent, SessionState};

use crate::host::{HOST_CALL_TIMEOUT, Host, blocking};
use crate::supervisor::{ReportKind, WorkerReport};
use crate::{native_worker, remote_worker};

pub(crate) fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// The session was cancelled by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

pub struct WorkerContext {
    pub pane: PaneIndex,
    pub seq: u64,
    pub source: Source,
    pub tuning: Tuning,
    pub host: Host,
    pub cancel: CancellationToken,
    pub placement_rx: watch::Receiver<Placement>,
    pub reports: mpsc::UnboundedSender<WorkerReport>,
    /// Origin of the monotonic millisecond clock fed to the state machines.
    pub epoch: Instant,
}

impl WorkerContext {
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Sleep unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Blocking host call, bounded by [`HOST_CALL_TIMEOUT`] and abandoned on
    /// cancellation.
    pub async fn host_call<T, F>(&self, f: F) -> Result<anyhow::Result<T>, Cancelled>
    where
        F: FnOnce() -> Result<T, kiosk_host::HostError> + Send + 'static,
        T: Send + 'static,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Cancelled),
            result = blocking(HOST_CALL_TIMEOUT, f) => Ok(result),
        }
    }

    pub fn report(&self, kind: ReportKind) {
        // Receiver gone means the supervisor is shutting down.
        let _ = self.reports.send(WorkerReport {
            pane: self.pane,
            seq: self.seq,
            kind,
        });
    }

    /// Feed one event to the session, log and report the transition.
    pub fn apply(&self, session: &mut EmbeddingSession, event: SessionEvent) -> Directive {
        let pane = self.pane;
        let source = session.source_id().clone();
        let event_name = event.name();
        let transition = match session.handle(event, self.now_ms()) {
            Ok(t) => t,
            Err(e) => {
                warn!(pane, %source, error = %e, "ignored session event");
                return Directive::None;
            }
        };

        if transition.changed() {
            let restart_count = session.restart_count();
            match transition.to {
                SessionState::Restarting => warn!(
                    pane,
                    %source,
                    from = ?transition.from,
                    event = event_name,
                    restart_count,
                    "session restarting"
                ),
                SessionState::Failed => error!(
                    pane,
                    %source,
                    from = ?transition.from,
                    event = event_name,
                    restart_count,
                    failure = ?session.failure(),
                    "session failed"
                ),
                to => info!(
                    pane,
                    %source,
                    from = ?transition.from,
                    to = ?to,
                    restart_count,
                    "session state"
                ),
            }
            self.report(ReportKind::State {
                state: transition.to,
                restart_count,
            });
        }
        if let Directive::Fail(kind) = transition.directive {
            self.report(ReportKind::Failed(kind));
        }
        transition.directive
    }
}

/// Drive one session until it fails or is cancelled.
pub async fn run_worker(ctx: WorkerContext) {
    match ctx.source.kind.clone() {
        SourceKind::NativeApp(spec) => native_worker::run(ctx, spec).await,
        SourceKind::Remote(spec) => remote_worker::run(ctx, spec).await,
    }
}
