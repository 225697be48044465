//! Source supervisor: owns every pane session and reconciles them against
//! the scheduler's desired state.
//!
//! Single owner of the session table. The scheduler publishes through a
//! `watch`, the shell sends commands, workers send reports; everything
//! leaves through the event channel and the published pane views.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kiosk_core::{
    DesiredState, KioskConfig, PaneIndex, Placement, Resolution, SourceId, SourceRegistry,
    WindowId,
};
use kiosk_supervisor::{FailureKind, FallbackOverrides, PaneChange, SessionKind, SessionState, plan};

use crate::host::Host;
use crate::worker::{WorkerContext, ms, run_worker};

/// Slack on top of `terminate_grace_ms` for a cancelled worker to release
/// its window and stop its processes.
const TEARDOWN_MARGIN: Duration = Duration::from_secs(5);

// ─── Wire types ──────────────────────────────────────────────────

/// What the shell should render in a pane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Surface {
    Native {
        window: WindowId,
    },
    /// `reload_generation` is bumped on every (re)load; the shell reloads its
    /// content view when it changes.
    Remote {
        address: String,
        reload_generation: u64,
    },
    Placeholder {
        reason: String,
    },
    #[default]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaneView {
    pub pane: PaneIndex,
    pub source: Option<SourceId>,
    pub kind: Option<SessionKind>,
    pub state: Option<SessionState>,
    pub surface: Surface,
    pub placement: Placement,
    pub restart_count: u32,
    /// Showing the static fallback because the scheduled source failed.
    pub fallback_override: bool,
}

#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub pane: PaneIndex,
    /// Session generation; reports from torn-down sessions are dropped.
    pub seq: u64,
    pub kind: ReportKind,
}

#[derive(Debug, Clone)]
pub enum ReportKind {
    State {
        state: SessionState,
        restart_count: u32,
    },
    Surface(Surface),
    /// Content is on screen.
    Rendered,
    Failed(FailureKind),
}

/// Outward lifecycle events, consumed by the readiness gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    SessionStarted {
        pane: PaneIndex,
        source: SourceId,
        seq: u64,
    },
    SessionTornDown {
        pane: PaneIndex,
        source: SourceId,
        seq: u64,
    },
    /// Panes that currently hold a session, after each reconcile.
    Assigned(BTreeSet<PaneIndex>),
    Rendered {
        pane: PaneIndex,
    },
    Failed {
        pane: PaneIndex,
        source: SourceId,
        kind: FailureKind,
    },
}

#[derive(Debug)]
pub enum SupervisorCommand {
    /// The shell moved or resized a pane.
    Resize { pane: PaneIndex, placement: Placement },
    /// A validated configuration replaced the current one.
    Reload(Arc<KioskConfig>),
}

// ─── Supervisor ──────────────────────────────────────────────────

struct SessionHandle {
    source: SourceId,
    kind: SessionKind,
    seq: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    placement_tx: watch::Sender<Placement>,
    state: SessionState,
    restart_count: u32,
    surface: Surface,
}

/// A pane whose source failed with no usable fallback. Kept until the
/// scheduler asks for something else.
#[derive(Debug, Clone)]
struct FailedPane {
    source: SourceId,
    kind: FailureKind,
}

pub struct Supervisor {
    config: Arc<KioskConfig>,
    registry: SourceRegistry,
    exclusive: BTreeSet<SourceId>,
    host: Host,
    epoch: Instant,
    cancel: CancellationToken,
    sessions: BTreeMap<PaneIndex, SessionHandle>,
    placements: Vec<Placement>,
    desired: DesiredState,
    overrides: FallbackOverrides,
    failed: BTreeMap<PaneIndex, FailedPane>,
    /// Sources whose definition changed on the last reload.
    rebuild: BTreeSet<SourceId>,
    next_seq: u64,
    report_tx: mpsc::UnboundedSender<WorkerReport>,
    report_rx: mpsc::UnboundedReceiver<WorkerReport>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    panes_tx: watch::Sender<Vec<PaneView>>,
}

impl Supervisor {
    pub fn new(
        config: Arc<KioskConfig>,
        host: Host,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (panes_tx, _) = watch::channel(Vec::new());
        Self {
            registry: config.registry(),
            exclusive: config.schedule().exclusive,
            placements: vec![Placement::default(); config.panes.len()],
            config,
            host,
            epoch: Instant::now(),
            cancel,
            sessions: BTreeMap::new(),
            desired: DesiredState::new(),
            overrides: FallbackOverrides::new(),
            failed: BTreeMap::new(),
            rebuild: BTreeSet::new(),
            next_seq: 0,
            report_tx,
            report_rx,
            events,
            panes_tx,
        }
    }

    /// Pane views, republished after every change.
    pub fn subscribe_panes(&self) -> watch::Receiver<Vec<PaneView>> {
        self.panes_tx.subscribe()
    }

    /// Run until cancelled, then tear every session down.
    pub async fn run(
        mut self,
        mut desired_rx: watch::Receiver<Arc<Resolution>>,
        mut commands: mpsc::Receiver<SupervisorCommand>,
    ) {
        self.desired = desired_rx.borrow_and_update().desired.clone();
        self.reconcile().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                changed = desired_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let desired = desired_rx.borrow_and_update().desired.clone();
                    if desired != self.desired {
                        self.desired = desired;
                        self.reconcile().await;
                    }
                }
                Some(command) = commands.recv() => self.on_command(command).await,
                Some(report) = self.report_rx.recv() => self.on_report(report).await,
            }
        }

        self.shutdown().await;
    }

    // ── reconcile ──────────────────────────────────────────────

    async fn reconcile(&mut self) {
        let pane_count = self.config.panes.len();
        self.overrides.truncate(pane_count);

        let mut effective = self.overrides.apply(&self.desired, &self.exclusive);
        effective.retain(|pane, source| {
            let known = self.registry.contains(source);
            if !known {
                warn!(pane, %source, "desired source not in registry");
            }
            *pane < pane_count && known
        });
        self.failed
            .retain(|pane, f| effective.get(pane) == Some(&f.source));
        for pane in self.failed.keys() {
            effective.remove(pane);
        }

        let live: BTreeMap<PaneIndex, SourceId> = self
            .sessions
            .iter()
            .map(|(pane, h)| (*pane, h.source.clone()))
            .collect();
        let rebuild = std::mem::take(&mut self.rebuild);

        for change in plan(&live, &effective, &rebuild) {
            match change {
                PaneChange::Start { pane, source } => self.start(pane, &source),
                PaneChange::Stop { pane, .. } => self.teardown(pane).await,
                PaneChange::Replace { pane, from, to } => {
                    debug!(pane, %from, %to, "replacing pane source");
                    self.teardown(pane).await;
                    self.start(pane, &to);
                }
            }
        }

        let assigned = self.sessions.keys().copied().collect();
        let _ = self.events.send(SupervisorEvent::Assigned(assigned));
        self.publish();
    }

    fn start(&mut self, pane: PaneIndex, source_id: &SourceId) {
        let Some(source) = self.registry.get(source_id).cloned() else {
            return;
        };
        self.next_seq += 1;
        let seq = self.next_seq;
        let cancel = self.cancel.child_token();
        let placement = self.placements.get(pane).copied().unwrap_or_default();
        let (placement_tx, placement_rx) = watch::channel(placement);
        let kind = SessionKind::from(&source.kind);

        let ctx = WorkerContext {
            pane,
            seq,
            source,
            tuning: self.config.tuning.clone(),
            host: self.host.clone(),
            cancel: cancel.clone(),
            placement_rx,
            reports: self.report_tx.clone(),
            epoch: self.epoch,
        };
        let join = tokio::spawn(run_worker(ctx));

        info!(pane, source = %source_id, seq, "session started");
        self.sessions.insert(
            pane,
            SessionHandle {
                source: source_id.clone(),
                kind,
                seq,
                cancel,
                join,
                placement_tx,
                state: SessionState::Idle,
                restart_count: 0,
                surface: Surface::Empty,
            },
        );
        let _ = self.events.send(SupervisorEvent::SessionStarted {
            pane,
            source: source_id.clone(),
            seq,
        });
    }

    /// Cancel the session and wait until its worker released the process
    /// and window. Only then may another session take the pane.
    async fn teardown(&mut self, pane: PaneIndex) {
        let Some(handle) = self.sessions.remove(&pane) else {
            return;
        };
        handle.cancel.cancel();
        let limit = ms(self.config.tuning.terminate_grace_ms) + TEARDOWN_MARGIN;
        reap(pane, &handle.source, handle.join, limit).await;
        info!(pane, source = %handle.source, seq = handle.seq, "session torn down");
        let _ = self.events.send(SupervisorEvent::SessionTornDown {
            pane,
            source: handle.source,
            seq: handle.seq,
        });
    }

    async fn shutdown(&mut self) {
        let panes: Vec<PaneIndex> = self.sessions.keys().copied().collect();
        for pane in panes {
            self.teardown(pane).await;
        }
        self.publish();
        info!("supervisor stopped");
    }

    // ── inputs ─────────────────────────────────────────────────

    async fn on_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Resize { pane, placement } => {
                let Some(slot) = self.placements.get_mut(pane) else {
                    warn!(pane, "resize for unknown pane");
                    return;
                };
                *slot = placement;
                if let Some(handle) = self.sessions.get(&pane) {
                    handle.placement_tx.send_replace(placement);
                }
                self.publish();
            }
            SupervisorCommand::Reload(config) => self.reload(config).await,
        }
    }

    async fn reload(&mut self, config: Arc<KioskConfig>) {
        let registry = config.registry();
        self.rebuild = SourceRegistry::changed_between(&self.registry, &registry);
        // A changed definition deserves a fresh attempt.
        let rebuild = &self.rebuild;
        self.failed.retain(|_, f| !rebuild.contains(&f.source));
        self.registry = registry;
        self.exclusive = config.schedule().exclusive;
        self.placements
            .resize(config.panes.len(), Placement::default());
        info!(
            panes = config.panes.len(),
            sources = self.registry.len(),
            changed = self.rebuild.len(),
            "configuration applied"
        );
        self.config = config;
        self.reconcile().await;
    }

    async fn on_report(&mut self, report: WorkerReport) {
        let Some(handle) = self.sessions.get_mut(&report.pane) else {
            return;
        };
        if handle.seq != report.seq {
            return;
        }
        match report.kind {
            ReportKind::State {
                state,
                restart_count,
            } => {
                handle.state = state;
                handle.restart_count = restart_count;
            }
            ReportKind::Surface(surface) => handle.surface = surface,
            ReportKind::Rendered => {
                let _ = self
                    .events
                    .send(SupervisorEvent::Rendered { pane: report.pane });
            }
            ReportKind::Failed(kind) => {
                self.on_failed(report.pane, kind).await;
                return;
            }
        }
        self.publish();
    }

    async fn on_failed(&mut self, pane: PaneIndex, kind: FailureKind) {
        let Some(source) = self.sessions.get(&pane).map(|h| h.source.clone()) else {
            return;
        };
        let _ = self.events.send(SupervisorEvent::Failed {
            pane,
            source: source.clone(),
            kind,
        });

        let fallback = self.config.panes.get(pane).and_then(|p| p.fallback.as_ref());
        match self.overrides.on_failed(pane, &source, fallback) {
            Some(fallback) => {
                warn!(pane, failed = %source, %fallback, %kind, "switching pane to static fallback");
                self.reconcile().await;
            }
            None => {
                error!(pane, failed = %source, %kind, "no usable fallback, showing placeholder");
                self.teardown(pane).await;
                self.failed.insert(pane, FailedPane { source, kind });
                let assigned = self.sessions.keys().copied().collect();
                let _ = self.events.send(SupervisorEvent::Assigned(assigned));
                self.publish();
            }
        }
    }

    // ── views ──────────────────────────────────────────────────

    fn views(&self) -> Vec<PaneView> {
        (0..self.config.panes.len())
            .map(|pane| {
                let placement = self.placements.get(pane).copied().unwrap_or_default();
                if let Some(h) = self.sessions.get(&pane) {
                    return PaneView {
                        pane,
                        source: Some(h.source.clone()),
                        kind: Some(h.kind),
                        state: Some(h.state),
                        surface: h.surface.clone(),
                        placement,
                        restart_count: h.restart_count,
                        fallback_override: self.overrides.is_overridden(pane),
                    };
                }
                let (source, surface) = match self.failed.get(&pane) {
                    Some(f) => (
                        Some(f.source.clone()),
                        Surface::Placeholder {
                            reason: format!("{} failed: {}", f.source, f.kind),
                        },
                    ),
                    None => (None, Surface::Empty),
                };
                PaneView {
                    pane,
                    source,
                    kind: None,
                    state: self.failed.contains_key(&pane).then_some(SessionState::Failed),
                    surface,
                    placement,
                    restart_count: 0,
                    fallback_override: false,
                }
            })
            .collect()
    }

    fn publish(&self) {
        self.panes_tx.send_replace(self.views());
    }
}

/// Wait for a cancelled worker. One that overruns `limit` is aborted; its
/// window and processes may be left behind.
async fn reap(pane: PaneIndex, source: &SourceId, mut join: JoinHandle<()>, limit: Duration) {
    match tokio::time::timeout(limit, &mut join).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(pane, %source, error = %e, "session worker panicked"),
        Err(_) => {
            error!(
                pane,
                %source,
                limit_ms = limit.as_millis() as u64,
                "session worker did not stop in time, aborting"
            );
            join.abort();
        }
    }
}
