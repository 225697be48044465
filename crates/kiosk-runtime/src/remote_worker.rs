//! Remote content session driver: load, heartbeat, silent reload, restart.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use kiosk_core::types::{ReloadPolicy, RemoteSpec};
use kiosk_core::{HeartbeatMonitor, HeartbeatPolicy, HeartbeatVerdict, ProbeOutcome};
use kiosk_supervisor::{Directive, EmbeddingSession, SessionEvent, SessionKind, SessionState};

use crate::supervisor::{ReportKind, Surface};
use crate::worker::{Cancelled, WorkerContext, ms};

pub(crate) async fn run(ctx: WorkerContext, spec: RemoteSpec) {
    let session = EmbeddingSession::new(
        ctx.source.id.clone(),
        SessionKind::Remote,
        ctx.tuning.restart.clone(),
    );
    let monitor = HeartbeatMonitor::new(HeartbeatPolicy {
        failure_threshold: ctx.tuning.heartbeat_failure_threshold,
    });
    let mut worker = RemoteWorker {
        ctx,
        spec,
        session,
        monitor,
        generation: 0,
        pending_restart_ms: 0,
    };
    // The content view belongs to the shell; nothing to release here.
    if worker.drive().await.is_err() {
        debug!(pane = worker.ctx.pane, source = %worker.ctx.source.id, "remote session cancelled");
    }
}

struct RemoteWorker {
    ctx: WorkerContext,
    spec: RemoteSpec,
    session: EmbeddingSession,
    monitor: HeartbeatMonitor,
    /// Bumped on every load and silent reload.
    generation: u64,
    pending_restart_ms: u64,
}

impl RemoteWorker {
    async fn drive(&mut self) -> Result<(), Cancelled> {
        self.ctx.apply(&mut self.session, SessionEvent::Start);
        loop {
            let event = match self.session.state() {
                SessionState::Connecting => self.connect().await?,
                SessionState::Live => self.live().await?,
                SessionState::Restarting => {
                    self.ctx
                        .sleep(ms(std::mem::take(&mut self.pending_restart_ms)))
                        .await?;
                    SessionEvent::RestartDue {
                        process_alive: false,
                    }
                }
                SessionState::Failed => return Ok(()),
                other => {
                    warn!(pane = self.ctx.pane, state = ?other, "unexpected remote session state");
                    return Ok(());
                }
            };
            if let Directive::ScheduleRestart { after_ms, attempt } =
                self.ctx.apply(&mut self.session, event)
            {
                info!(
                    pane = self.ctx.pane,
                    source = %self.ctx.source.id,
                    attempt,
                    after_ms,
                    "reconnect scheduled"
                );
                self.pending_restart_ms = after_ms;
            }
        }
    }

    /// Point the shell's content view at the address (again).
    fn load(&mut self) {
        self.generation += 1;
        self.ctx.report(ReportKind::Surface(Surface::Remote {
            address: self.spec.url.clone(),
            reload_generation: self.generation,
        }));
    }

    async fn probe(&self, timeout: Duration) -> Result<ProbeOutcome, Cancelled> {
        let probe = self.ctx.host.content.probe(&self.spec.url, timeout);
        tokio::select! {
            biased;
            () = self.ctx.cancel.cancelled() => Err(Cancelled),
            outcome = tokio::time::timeout(timeout, probe) => {
                Ok(outcome.unwrap_or(ProbeOutcome::Timeout))
            }
        }
    }

    // ── Connecting ─────────────────────────────────────────────

    async fn connect(&mut self) -> Result<SessionEvent, Cancelled> {
        self.load();
        let outcome = self.probe(ms(self.ctx.tuning.connect_timeout_ms)).await?;
        if outcome.is_success() {
            info!(
                pane = self.ctx.pane,
                source = %self.ctx.source.id,
                generation = self.generation,
                "content loaded"
            );
            self.monitor.reset();
            self.ctx.report(ReportKind::Rendered);
            Ok(SessionEvent::ContentLoaded)
        } else {
            warn!(
                pane = self.ctx.pane,
                source = %self.ctx.source.id,
                ?outcome,
                "content load failed"
            );
            Ok(SessionEvent::ConnectFailed {
                reason: format!("{outcome:?}"),
            })
        }
    }

    // ── Live ───────────────────────────────────────────────────

    /// Heartbeat until liveness is lost. Healthy probes are applied in
    /// place so the timers keep their phase.
    async fn live(&mut self) -> Result<SessionEvent, Cancelled> {
        let period = ms(self.ctx.tuning.heartbeat_interval_ms.max(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut periodic = match self.spec.reload {
            ReloadPolicy::Periodic { interval_secs } if interval_secs > 0 => {
                let every = Duration::from_secs(interval_secs);
                let mut interval = tokio::time::interval_at(Instant::now() + every, every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(interval)
            }
            _ => None,
        };

        loop {
            tokio::select! {
                biased;
                () = self.ctx.cancel.cancelled() => return Err(Cancelled),
                _ = heartbeat.tick() => {
                    let outcome = self.probe(ms(self.ctx.tuning.heartbeat_timeout_ms)).await?;
                    if let Some(event) = self.on_probe(outcome) {
                        return Ok(event);
                    }
                }
                Some(_) = tick(&mut periodic) => {
                    debug!(pane = self.ctx.pane, source = %self.ctx.source.id, "periodic reload");
                    self.load();
                }
            }
        }
    }

    fn on_probe(&mut self, outcome: ProbeOutcome) -> Option<SessionEvent> {
        let pane = self.ctx.pane;
        match self.monitor.observe(outcome) {
            HeartbeatVerdict::Healthy => {
                self.ctx.apply(&mut self.session, SessionEvent::HeartbeatOk);
            }
            HeartbeatVerdict::Degraded {
                consecutive_failures,
            } => {
                debug!(pane, source = %self.ctx.source.id, ?outcome, consecutive_failures, "heartbeat failed");
            }
            HeartbeatVerdict::Reload => {
                warn!(
                    pane,
                    source = %self.ctx.source.id,
                    reloads = self.monitor.health().reloads,
                    "heartbeat failing, reloading content"
                );
                self.load();
            }
            HeartbeatVerdict::Recovered => {
                info!(pane, source = %self.ctx.source.id, "content recovered after reload");
                self.ctx.apply(&mut self.session, SessionEvent::HeartbeatOk);
            }
            HeartbeatVerdict::Unhealthy => {
                self.monitor.reset();
                return Some(SessionEvent::LivenessLost {
                    reason: "reload did not restore liveness".to_string(),
                });
            }
        }
        None
    }
}

async fn tick(interval: &mut Option<Interval>) -> Option<Instant> {
    match interval {
        Some(interval) => Some(interval.tick().await),
        None => std::future::pending().await,
    }
}
