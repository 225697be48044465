//! Per-pane embedding session state machine.
//!
//! The same state shape serves both source kinds; `SessionKind` selects
//! which transitions apply. The machine only decides. The runtime worker
//! performs the spawn, search, embed, load and probe, then reports back
//! with a [`SessionEvent`].
//!
//! ```text
//! NativeApp: Idle → Launching → SearchingWindow → Embedding → Embedded ⇄ Resizing
//! Remote:    Idle → Connecting → Live
//! Any:       … → Restarting → (Launching | SearchingWindow | Connecting) | Failed
//! ```

use serde::{Deserialize, Serialize};

use kiosk_core::{RestartPolicy, SourceId, SourceKind, WindowId};

use crate::error::{FailureKind, SessionError};
use crate::restart::{RestartDecision, RestartTracker};

// ─── Types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Remote,
    NativeApp,
}

impl From<&SourceKind> for SessionKind {
    fn from(kind: &SourceKind) -> Self {
        match kind {
            SourceKind::Remote(_) => Self::Remote,
            SourceKind::NativeApp(_) => Self::NativeApp,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Launching,
    SearchingWindow,
    Embedding,
    Embedded,
    Resizing,
    Connecting,
    Live,
    Restarting,
    Failed,
}

impl SessionState {
    /// Steady states where content is on screen.
    pub fn is_rendering(self) -> bool {
        matches!(self, Self::Embedded | Self::Resizing | Self::Live)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Failed
    }
}

/// Input reported by the worker driving the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    ProcessSpawned { pid: u32 },
    SpawnFailed { reason: String },
    WindowFound { window: WindowId },
    SearchTimedOut,
    EmbedSucceeded { window: WindowId },
    /// Bounded embed retries are exhausted.
    EmbedFailed { reason: String },
    GeometryChanged,
    ResizeSettled,
    WindowLost,
    ProcessExited { code: Option<i32> },
    ContentLoaded,
    ConnectFailed { reason: String },
    /// Heartbeat succeeded; refreshes `last_heartbeat_ms`.
    HeartbeatOk,
    /// Heartbeat recovery (silent reload) did not restore liveness.
    LivenessLost { reason: String },
    /// Backoff delay elapsed. `process_alive` lets a native session reattach
    /// to its still-running process instead of relaunching.
    RestartDue { process_alive: bool },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ProcessSpawned { .. } => "process_spawned",
            Self::SpawnFailed { .. } => "spawn_failed",
            Self::WindowFound { .. } => "window_found",
            Self::SearchTimedOut => "search_timed_out",
            Self::EmbedSucceeded { .. } => "embed_succeeded",
            Self::EmbedFailed { .. } => "embed_failed",
            Self::GeometryChanged => "geometry_changed",
            Self::ResizeSettled => "resize_settled",
            Self::WindowLost => "window_lost",
            Self::ProcessExited { .. } => "process_exited",
            Self::ContentLoaded => "content_loaded",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::HeartbeatOk => "heartbeat_ok",
            Self::LivenessLost { .. } => "liveness_lost",
            Self::RestartDue { .. } => "restart_due",
        }
    }
}

/// Side effect the worker must carry out after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    None,
    /// Wait `after_ms`, then report [`SessionEvent::RestartDue`].
    ScheduleRestart { after_ms: u64, attempt: u32 },
    /// Session is over; report outward and request the pane fallback.
    Fail(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub directive: Directive,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

// ─── Session ─────────────────────────────────────────────────────

/// One pane's session. Destroyed and recreated whenever the desired source
/// of the pane changes; never reused across sources.
#[derive(Debug, Clone)]
pub struct EmbeddingSession {
    source_id: SourceId,
    kind: SessionKind,
    state: SessionState,
    window: Option<WindowId>,
    pid: Option<u32>,
    restart_count: u32,
    last_heartbeat_ms: Option<u64>,
    consecutive_failures: u32,
    failure: Option<FailureKind>,
    restarts: RestartTracker,
}

impl EmbeddingSession {
    pub fn new(source_id: SourceId, kind: SessionKind, policy: RestartPolicy) -> Self {
        Self {
            source_id,
            kind,
            state: SessionState::Idle,
            window: None,
            pid: None,
            restart_count: 0,
            last_heartbeat_ms: None,
            consecutive_failures: 0,
            failure: None,
            restarts: RestartTracker::new(policy),
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Embedded window; only present while `Embedded` or `Resizing`.
    pub fn window(&self) -> Option<WindowId> {
        self.window
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn last_heartbeat_ms(&self) -> Option<u64> {
        self.last_heartbeat_ms
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Apply one event at `now_ms`.
    pub fn handle(&mut self, event: SessionEvent, now_ms: u64) -> Result<Transition, SessionError> {
        use SessionEvent as E;
        use SessionKind::{NativeApp, Remote};
        use SessionState as S;

        let from = self.state;
        let mut directive = Directive::None;

        match (self.kind, from, &event) {
            (NativeApp, S::Idle, E::Start) => self.state = S::Launching,
            (Remote, S::Idle, E::Start) => self.state = S::Connecting,

            (NativeApp, S::Launching, E::ProcessSpawned { pid }) => {
                self.pid = Some(*pid);
                self.state = S::SearchingWindow;
            }
            (NativeApp, S::Launching, E::SpawnFailed { .. }) => {
                directive = self.fail(FailureKind::Process);
            }

            (NativeApp, S::SearchingWindow, E::WindowFound { .. }) => self.state = S::Embedding,
            (NativeApp, S::SearchingWindow, E::SearchTimedOut) => {
                directive = self.fail(FailureKind::Discovery);
            }
            (NativeApp, S::SearchingWindow, E::ProcessExited { .. }) => {
                self.pid = None;
                directive = self.restart(now_ms);
            }

            (NativeApp, S::Embedding, E::EmbedSucceeded { window }) => {
                self.window = Some(*window);
                self.consecutive_failures = 0;
                self.state = S::Embedded;
            }
            (NativeApp, S::Embedding, E::EmbedFailed { .. }) => {
                directive = self.fail(FailureKind::Embedding);
            }
            (NativeApp, S::Embedding, E::ProcessExited { .. }) => {
                self.pid = None;
                directive = self.restart(now_ms);
            }

            (NativeApp, S::Embedded | S::Resizing, E::GeometryChanged) => self.state = S::Resizing,
            (NativeApp, S::Resizing, E::ResizeSettled) => self.state = S::Embedded,
            (NativeApp, S::Embedded | S::Resizing, E::WindowLost) => {
                self.window = None;
                directive = self.restart(now_ms);
            }
            (NativeApp, S::Embedded | S::Resizing, E::ProcessExited { .. }) => {
                self.window = None;
                self.pid = None;
                directive = self.restart(now_ms);
            }

            (Remote, S::Connecting, E::ContentLoaded) => {
                self.consecutive_failures = 0;
                self.last_heartbeat_ms = Some(now_ms);
                self.state = S::Live;
            }
            (Remote, S::Connecting, E::ConnectFailed { .. }) => {
                directive = self.restart(now_ms);
            }
            (Remote, S::Live, E::ContentLoaded | E::HeartbeatOk) => {
                self.last_heartbeat_ms = Some(now_ms);
            }
            (Remote, S::Live, E::LivenessLost { .. }) => {
                directive = self.restart(now_ms);
            }

            (NativeApp, S::Restarting, E::RestartDue { process_alive }) => {
                if *process_alive && self.pid.is_some() {
                    self.state = S::SearchingWindow;
                } else {
                    self.pid = None;
                    self.state = S::Launching;
                }
            }
            (NativeApp, S::Restarting, E::ProcessExited { .. }) => self.pid = None,
            (Remote, S::Restarting, E::RestartDue { .. }) => self.state = S::Connecting,

            _ => {
                return Err(SessionError::InvalidTransition {
                    state: from,
                    event: event.name(),
                });
            }
        }

        Ok(Transition {
            from,
            to: self.state,
            directive,
        })
    }

    fn restart(&mut self, now_ms: u64) -> Directive {
        self.window = None;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.restarts.record_failure(now_ms) {
            RestartDecision::Restart { after_ms, attempt } => {
                self.restart_count = self.restart_count.saturating_add(1);
                self.state = SessionState::Restarting;
                Directive::ScheduleRestart { after_ms, attempt }
            }
            RestartDecision::Exhausted { .. } => self.fail(FailureKind::RestartCeiling),
        }
    }

    fn fail(&mut self, kind: FailureKind) -> Directive {
        self.window = None;
        self.failure = Some(kind);
        self.state = SessionState::Failed;
        Directive::Fail(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(ceiling: u32) -> RestartPolicy {
        RestartPolicy {
            ceiling,
            initial_backoff_ms: 100,
            multiplier: 2.0,
            max_backoff_ms: 1_000,
            window_ms: 600_000,
        }
    }

    fn native(ceiling: u32) -> EmbeddingSession {
        EmbeddingSession::new("app".into(), SessionKind::NativeApp, policy(ceiling))
    }

    fn remote(ceiling: u32) -> EmbeddingSession {
        EmbeddingSession::new("web".into(), SessionKind::Remote, policy(ceiling))
    }

    fn step(s: &mut EmbeddingSession, e: SessionEvent) -> Transition {
        s.handle(e, 0).expect("valid transition")
    }

    fn embed(s: &mut EmbeddingSession) {
        step(s, SessionEvent::Start);
        step(s, SessionEvent::ProcessSpawned { pid: 42 });
        step(s, SessionEvent::WindowFound { window: WindowId(7) });
        step(s, SessionEvent::EmbedSucceeded { window: WindowId(7) });
    }

    // ── Native happy path ──────────────────────────────────────

    #[test]
    fn native_reaches_embedded() {
        let mut s = native(3);
        assert_eq!(step(&mut s, SessionEvent::Start).to, SessionState::Launching);
        step(&mut s, SessionEvent::ProcessSpawned { pid: 42 });
        assert_eq!(s.state(), SessionState::SearchingWindow);
        assert_eq!(s.pid(), Some(42));
        step(&mut s, SessionEvent::WindowFound { window: WindowId(7) });
        assert_eq!(s.state(), SessionState::Embedding);
        assert_eq!(s.window(), None);
        step(&mut s, SessionEvent::EmbedSucceeded { window: WindowId(7) });
        assert_eq!(s.state(), SessionState::Embedded);
        assert_eq!(s.window(), Some(WindowId(7)));
        assert!(s.state().is_rendering());
    }

    #[test]
    fn resize_round_trip_keeps_window() {
        let mut s = native(3);
        embed(&mut s);
        step(&mut s, SessionEvent::GeometryChanged);
        assert_eq!(s.state(), SessionState::Resizing);
        step(&mut s, SessionEvent::GeometryChanged);
        assert_eq!(s.state(), SessionState::Resizing);
        step(&mut s, SessionEvent::ResizeSettled);
        assert_eq!(s.state(), SessionState::Embedded);
        assert_eq!(s.window(), Some(WindowId(7)));
    }

    // ── Native failures ────────────────────────────────────────

    #[test]
    fn spawn_failure_is_terminal() {
        let mut s = native(3);
        step(&mut s, SessionEvent::Start);
        let t = step(
            &mut s,
            SessionEvent::SpawnFailed {
                reason: "enoent".into(),
            },
        );
        assert_eq!(t.to, SessionState::Failed);
        assert_eq!(t.directive, Directive::Fail(FailureKind::Process));
        assert!(s.handle(SessionEvent::Start, 0).is_err());
    }

    #[test]
    fn search_timeout_fails_with_discovery() {
        let mut s = native(3);
        step(&mut s, SessionEvent::Start);
        step(&mut s, SessionEvent::ProcessSpawned { pid: 1 });
        let t = step(&mut s, SessionEvent::SearchTimedOut);
        assert_eq!(t.directive, Directive::Fail(FailureKind::Discovery));
        assert_eq!(s.failure(), Some(FailureKind::Discovery));
    }

    #[test]
    fn window_lost_with_live_process_reattaches() {
        let mut s = native(3);
        embed(&mut s);
        let t = step(&mut s, SessionEvent::WindowLost);
        assert_eq!(t.to, SessionState::Restarting);
        assert_eq!(
            t.directive,
            Directive::ScheduleRestart {
                after_ms: 100,
                attempt: 1
            }
        );
        assert_eq!(s.window(), None);
        assert_eq!(s.restart_count(), 1);
        step(&mut s, SessionEvent::RestartDue { process_alive: true });
        assert_eq!(s.state(), SessionState::SearchingWindow);
        assert_eq!(s.pid(), Some(42));
    }

    #[test]
    fn process_exit_relaunches() {
        let mut s = native(3);
        embed(&mut s);
        step(&mut s, SessionEvent::ProcessExited { code: Some(1) });
        assert_eq!(s.pid(), None);
        step(&mut s, SessionEvent::RestartDue { process_alive: true });
        assert_eq!(s.state(), SessionState::Launching);
    }

    #[test]
    fn restart_ceiling_reaches_failed() {
        let mut s = native(2);
        embed(&mut s);
        // Two restarts are allowed.
        for _ in 0..2 {
            let t = step(&mut s, SessionEvent::ProcessExited { code: None });
            assert!(matches!(t.directive, Directive::ScheduleRestart { .. }));
            step(&mut s, SessionEvent::RestartDue { process_alive: false });
            step(&mut s, SessionEvent::ProcessSpawned { pid: 43 });
            step(&mut s, SessionEvent::WindowFound { window: WindowId(8) });
            step(&mut s, SessionEvent::EmbedSucceeded { window: WindowId(8) });
        }
        let t = step(&mut s, SessionEvent::ProcessExited { code: None });
        assert_eq!(t.to, SessionState::Failed);
        assert_eq!(t.directive, Directive::Fail(FailureKind::RestartCeiling));
        assert_eq!(s.restart_count(), 2);
    }

    // ── Remote ─────────────────────────────────────────────────

    #[test]
    fn remote_connects_and_restarts() {
        let mut s = remote(3);
        assert_eq!(step(&mut s, SessionEvent::Start).to, SessionState::Connecting);
        s.handle(SessionEvent::ContentLoaded, 500).expect("loaded");
        assert_eq!(s.state(), SessionState::Live);
        assert_eq!(s.last_heartbeat_ms(), Some(500));
        s.handle(SessionEvent::HeartbeatOk, 900).expect("heartbeat");
        assert_eq!(s.last_heartbeat_ms(), Some(900));

        let t = step(
            &mut s,
            SessionEvent::LivenessLost {
                reason: "timeout".into(),
            },
        );
        assert_eq!(t.to, SessionState::Restarting);
        assert_eq!(s.consecutive_failures(), 1);
        step(&mut s, SessionEvent::RestartDue { process_alive: false });
        assert_eq!(s.state(), SessionState::Connecting);
        step(&mut s, SessionEvent::ContentLoaded);
        assert_eq!(s.consecutive_failures(), 0);
    }

    #[test]
    fn remote_rejects_native_events() {
        let mut s = remote(3);
        step(&mut s, SessionEvent::Start);
        let err = s
            .handle(SessionEvent::ProcessSpawned { pid: 1 }, 0)
            .expect_err("invalid");
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                state: SessionState::Connecting,
                event: "process_spawned"
            }
        ));
        // A rejected event leaves the state alone.
        assert_eq!(s.state(), SessionState::Connecting);
    }

    #[test]
    fn connect_failures_exhaust_ceiling() {
        let mut s = remote(1);
        step(&mut s, SessionEvent::Start);
        let t = step(&mut s, SessionEvent::ConnectFailed { reason: "dns".into() });
        assert!(matches!(t.directive, Directive::ScheduleRestart { attempt: 1, .. }));
        step(&mut s, SessionEvent::RestartDue { process_alive: false });
        let t = step(&mut s, SessionEvent::ConnectFailed { reason: "dns".into() });
        assert_eq!(t.directive, Directive::Fail(FailureKind::RestartCeiling));
    }
}
