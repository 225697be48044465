//! Native app session driver: launch, window search, embed, resize
//! re-assertion and liveness watching.
//!
//! Every host call runs off the async workers with a bounded wait, and every
//! wait is cancellable, so a teardown interrupts the session at the next
//! await.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use kiosk_core::types::NativeAppSpec;
use kiosk_core::{Placement, WindowId};
use kiosk_host::AppProcess;
use kiosk_supervisor::{
    Directive, EmbeddingSession, FailureKind, SessionEvent, SessionKind, SessionState,
    WindowMatcher, process_tree,
};

use crate::host::{HOST_CALL_TIMEOUT, blocking};
use crate::supervisor::{ReportKind, Surface};
use crate::worker::{Cancelled, WorkerContext, ms};

/// Poll step while waiting for terminated processes to exit.
const EXIT_POLL_MS: u64 = 100;

/// Bound on each host call made while tearing down. Teardown is not
/// cancellable, so these must stay short.
const TEARDOWN_CALL_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) async fn run(ctx: WorkerContext, spec: NativeAppSpec) {
    let matcher = match WindowMatcher::new(&spec) {
        Ok(m) => m,
        Err(e) => {
            error!(pane = ctx.pane, source = %ctx.source.id, error = %e, "invalid window pattern");
            ctx.report(ReportKind::Failed(FailureKind::Discovery));
            return;
        }
    };
    let session = EmbeddingSession::new(
        ctx.source.id.clone(),
        SessionKind::NativeApp,
        ctx.tuning.restart.clone(),
    );
    let mut worker = NativeWorker {
        ctx,
        spec,
        matcher,
        session,
        process: None,
        tree: HashMap::new(),
        fresh_spawn: false,
        pre_existing: HashSet::new(),
        found: None,
        embedded: None,
        parent: None,
        pending_restart_ms: 0,
    };

    if worker.drive().await.is_err() {
        debug!(pane = worker.ctx.pane, source = %worker.ctx.source.id, "native session cancelled");
    }
    worker.shutdown().await;
}

struct NativeWorker {
    ctx: WorkerContext,
    spec: NativeAppSpec,
    matcher: WindowMatcher,
    session: EmbeddingSession,
    process: Option<Box<dyn AppProcess>>,
    /// Launched pid and every descendant seen while searching, with the
    /// command line it had. Descendants are stopped with the session.
    tree: HashMap<u32, String>,
    /// Set after a launch; the first search waits `launch_settle_ms`.
    fresh_spawn: bool,
    /// Windows that existed before the launch, for the global fallback.
    pre_existing: HashSet<WindowId>,
    found: Option<WindowId>,
    /// Window currently reparented into the pane region.
    embedded: Option<WindowId>,
    parent: Option<WindowId>,
    pending_restart_ms: u64,
}

impl NativeWorker {
    async fn drive(&mut self) -> Result<(), Cancelled> {
        self.ctx.apply(&mut self.session, SessionEvent::Start);
        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(Cancelled);
            }
            let event = match self.session.state() {
                SessionState::Launching => self.launch().await?,
                SessionState::SearchingWindow => self.search().await?,
                SessionState::Embedding => self.embed().await?,
                SessionState::Embedded | SessionState::Resizing => self.watch().await?,
                SessionState::Restarting => self.restart_due().await?,
                SessionState::Failed => return Ok(()),
                other => {
                    warn!(pane = self.ctx.pane, state = ?other, "unexpected native session state");
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
                    "restart scheduled"
                );
                self.pending_restart_ms = after_ms;
            }
        }
    }

    // ── Launching ──────────────────────────────────────────────

    async fn launch(&mut self) -> Result<SessionEvent, Cancelled> {
        // Leftovers of the previous instance must not hold the pane.
        self.stop_processes().await;

        let windows = Arc::clone(&self.ctx.host.windows);
        self.pre_existing = match self.ctx.host_call(move || windows.list_windows()).await? {
            Ok(list) => list.into_iter().map(|w| w.id).collect(),
            Err(e) => {
                debug!(pane = self.ctx.pane, error = %e, "pre-launch window snapshot failed");
                HashSet::new()
            }
        };

        // Not abandoned on cancel: the process handle must come back to us.
        let launcher = Arc::clone(&self.ctx.host.launcher);
        let cmd = self.spec.launch_cmd.clone();
        let args = self.spec.args.clone();
        let event = match blocking(HOST_CALL_TIMEOUT, move || launcher.spawn(&cmd, &args)).await {
            Ok(process) => {
                let pid = process.pid();
                info!(
                    pane = self.ctx.pane,
                    source = %self.ctx.source.id,
                    pid,
                    cmd = %self.spec.launch_cmd,
                    "native app launched"
                );
                self.process = Some(process);
                self.fresh_spawn = true;
                SessionEvent::ProcessSpawned { pid }
            }
            Err(e) => SessionEvent::SpawnFailed {
                reason: e.to_string(),
            },
        };
        Ok(event)
    }

    // ── SearchingWindow ────────────────────────────────────────

    async fn search(&mut self) -> Result<SessionEvent, Cancelled> {
        let Some(root) = self.session.pid() else {
            return Ok(SessionEvent::SearchTimedOut);
        };
        let started = Instant::now();
        // The settle delay counts toward the search timeout.
        let deadline = started + ms(self.ctx.tuning.search_timeout_ms);
        if std::mem::take(&mut self.fresh_spawn) {
            self.ctx.sleep(ms(self.ctx.tuning.launch_settle_ms)).await?;
        }

        if let Some(event) = self.poll_window(root, deadline, false).await? {
            return Ok(event);
        }

        if self.spec.allow_global_fallback {
            warn!(
                pane = self.ctx.pane,
                source = %self.ctx.source.id,
                "primary window search timed out, trying global fallback"
            );
            let deadline = Instant::now() + ms(self.ctx.tuning.global_fallback_timeout_ms);
            if let Some(event) = self.poll_window(root, deadline, true).await? {
                return Ok(event);
            }
        }

        warn!(
            pane = self.ctx.pane,
            source = %self.ctx.source.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            pids = self.tree.len(),
            "no matching window found"
        );
        Ok(SessionEvent::SearchTimedOut)
    }

    /// Poll until a window is picked, the process exits, or `deadline`.
    /// `None` means the deadline passed.
    async fn poll_window(
        &mut self,
        root: u32,
        deadline: Instant,
        global: bool,
    ) -> Result<Option<SessionEvent>, Cancelled> {
        let poll = ms(self.ctx.tuning.search_poll_ms.max(1));
        let log_every = ms(self.ctx.tuning.search_log_interval_ms.max(1));
        let started = Instant::now();
        let mut next_log = started + log_every;

        loop {
            if let Some(window) = self.scan(root, global).await? {
                info!(
                    pane = self.ctx.pane,
                    source = %self.ctx.source.id,
                    window = %window,
                    global,
                    "window found"
                );
                self.found = Some(window);
                return Ok(Some(SessionEvent::WindowFound { window }));
            }

            if let Some(code) = self.poll_exit() {
                self.process = None;
                if !self.spec.follow_children {
                    return Ok(Some(SessionEvent::ProcessExited { code }));
                }
                // Launchers that fork and exit: keep searching the tree.
                debug!(pane = self.ctx.pane, pid = root, ?code, "launcher exited, following children");
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if now >= next_log {
                info!(
                    pane = self.ctx.pane,
                    source = %self.ctx.source.id,
                    elapsed_ms = (now - started).as_millis() as u64,
                    pids = self.tree.len(),
                    global,
                    "still searching for window"
                );
                next_log += log_every;
            }
            self.ctx.sleep(poll.min(deadline - now)).await?;
        }
    }

    /// One window and process snapshot. Grows the tracked process tree and
    /// picks a window from it.
    async fn scan(&mut self, root: u32, global: bool) -> Result<Option<WindowId>, Cancelled> {
        let windows = Arc::clone(&self.ctx.host.windows);
        let processes = Arc::clone(&self.ctx.host.processes);
        let snapshot = self
            .ctx
            .host_call(move || Ok((windows.list_windows()?, processes.scan()?)))
            .await?;
        let (windows, procs) = match snapshot {
            Ok(s) => s,
            Err(e) => {
                debug!(pane = self.ctx.pane, error = %e, "window scan failed");
                return Ok(None);
            }
        };

        let members = if self.spec.follow_children {
            process_tree(root, &procs)
        } else {
            HashSet::from([root])
        };
        for pid in members {
            if let Some(info) = procs.get(&pid) {
                self.tree.entry(pid).or_insert_with(|| info.args.clone());
            }
        }
        let mut pids: HashSet<u32> = self.tree.keys().copied().collect();
        pids.insert(root);

        let picked = if global {
            self.matcher
                .pick_global(&windows, &self.pre_existing, &pids, &procs)
        } else {
            self.matcher.pick_window(&windows, &pids, &procs)
        };
        Ok(picked)
    }

    /// Exit status of the launched process, reaping it when it exited.
    fn poll_exit(&mut self) -> Option<Option<i32>> {
        let process = self.process.as_mut()?;
        match process.try_wait() {
            Ok(status) => status,
            Err(e) => {
                debug!(pane = self.ctx.pane, error = %e, "try_wait failed");
                None
            }
        }
    }

    // ── Embedding ──────────────────────────────────────────────

    async fn embed(&mut self) -> Result<SessionEvent, Cancelled> {
        let Some(found) = self.found.take() else {
            return Ok(SessionEvent::EmbedFailed {
                reason: "no window".to_string(),
            });
        };
        let target = self.pick_child(found).await?.unwrap_or(found);
        let attempts = self.ctx.tuning.embed_attempts.max(1);
        let mut backoff = ms(self.ctx.tuning.embed_backoff_ms);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            let placement = *self.ctx.placement_rx.borrow_and_update();
            match self.embed_once(target, placement).await? {
                Ok(()) => {
                    info!(
                        pane = self.ctx.pane,
                        source = %self.ctx.source.id,
                        window = %target,
                        attempt,
                        "window embedded"
                    );
                    self.ctx.report(ReportKind::Surface(Surface::Native { window: target }));
                    self.ctx.report(ReportKind::Rendered);
                    return Ok(SessionEvent::EmbedSucceeded { window: target });
                }
                Err(e) => {
                    warn!(
                        pane = self.ctx.pane,
                        source = %self.ctx.source.id,
                        window = %target,
                        attempt,
                        error = %e,
                        "embed attempt failed"
                    );
                    reason = e.to_string();
                }
            }
            if let Some(code) = self.poll_exit() {
                self.process = None;
                return Ok(SessionEvent::ProcessExited { code });
            }
            if attempt < attempts {
                self.ctx.sleep(backoff).await?;
                backoff = backoff.saturating_mul(2);
            }
        }
        Ok(SessionEvent::EmbedFailed { reason })
    }

    async fn embed_once(
        &mut self,
        window: WindowId,
        placement: Placement,
    ) -> Result<anyhow::Result<()>, Cancelled> {
        let windows = Arc::clone(&self.ctx.host.windows);
        // Treat the window as ours before the call returns so a cancelled or
        // overrunning embed is still released on teardown.
        let previous = self.embedded.replace(window);
        let result = self
            .ctx
            .host_call(move || windows.embed(window, &placement))
            .await?;
        match result {
            Ok(()) => self.parent = placement.parent,
            Err(_) => self.embedded = previous,
        }
        Ok(result)
    }

    async fn pick_child(&mut self, window: WindowId) -> Result<Option<WindowId>, Cancelled> {
        if self.spec.child_window_class_pattern.is_none()
            && self.spec.child_window_title_pattern.is_none()
        {
            return Ok(None);
        }
        let windows = Arc::clone(&self.ctx.host.windows);
        let picked = match self.ctx.host_call(move || windows.list_children(window)).await? {
            Ok(children) => self.matcher.pick_child(&children),
            Err(e) => {
                debug!(pane = self.ctx.pane, window = %window, error = %e, "child listing failed");
                None
            }
        };
        Ok(picked)
    }

    // ── Embedded / Resizing ────────────────────────────────────

    async fn watch(&mut self) -> Result<SessionEvent, Cancelled> {
        let Some(window) = self.session.window() else {
            return Ok(SessionEvent::WindowLost);
        };
        if self.session.state() == SessionState::Resizing {
            self.reassert(window).await?;
            return Ok(SessionEvent::ResizeSettled);
        }

        let period = ms(self.ctx.tuning.liveness_interval_ms.max(1));
        let mut liveness = tokio::time::interval_at(Instant::now() + period, period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.ctx.cancel.cancelled() => return Err(Cancelled),
                changed = self.ctx.placement_rx.changed() => {
                    if changed.is_err() {
                        return Err(Cancelled);
                    }
                    return Ok(SessionEvent::GeometryChanged);
                }
                _ = liveness.tick() => {
                    if let Some(code) = self.poll_exit() {
                        self.process = None;
                        self.embedded = None;
                        self.ctx.report(ReportKind::Surface(Surface::Empty));
                        return Ok(SessionEvent::ProcessExited { code });
                    }
                    let windows = Arc::clone(&self.ctx.host.windows);
                    // A stuck tool is not proof the window is gone.
                    let exists = self
                        .ctx
                        .host_call(move || Ok(windows.exists(window)))
                        .await?
                        .unwrap_or(true);
                    if !exists {
                        self.embedded = None;
                        self.ctx.report(ReportKind::Surface(Surface::Empty));
                        return Ok(SessionEvent::WindowLost);
                    }
                }
            }
        }
    }

    /// Re-issue the pane geometry a bounded number of times; some windows
    /// ignore or fight the first request. A changed parent re-embeds.
    async fn reassert(&mut self, window: WindowId) -> Result<(), Cancelled> {
        let retries = self.ctx.tuning.resize_retries;
        for attempt in 0..=retries {
            let placement = *self.ctx.placement_rx.borrow_and_update();
            let target = placement.geometry.clamped();

            if placement.parent != self.parent {
                if let Err(e) = self.embed_once(window, placement).await? {
                    debug!(pane = self.ctx.pane, window = %window, error = %e, "re-embed failed");
                }
            } else {
                let windows = Arc::clone(&self.ctx.host.windows);
                let result = self
                    .ctx
                    .host_call(move || {
                        windows.move_resize(window, target)?;
                        windows.geometry(window)
                    })
                    .await?;
                match result {
                    Ok(actual) if (actual.width, actual.height) == (target.width, target.height) => {
                        debug!(pane = self.ctx.pane, window = %window, attempt, "resize settled");
                        return Ok(());
                    }
                    Ok(actual) => debug!(
                        pane = self.ctx.pane,
                        window = %window,
                        attempt,
                        width = actual.width,
                        height = actual.height,
                        "window ignored resize"
                    ),
                    Err(e) => debug!(pane = self.ctx.pane, window = %window, error = %e, "resize failed"),
                }
            }
            if attempt < retries {
                self.ctx.sleep(ms(self.ctx.tuning.resize_retry_ms)).await?;
            }
        }
        warn!(
            pane = self.ctx.pane,
            source = %self.ctx.source.id,
            window = %window,
            retries,
            "window did not settle at pane geometry"
        );
        Ok(())
    }

    // ── Restarting ─────────────────────────────────────────────

    async fn restart_due(&mut self) -> Result<SessionEvent, Cancelled> {
        self.ctx.sleep(ms(std::mem::take(&mut self.pending_restart_ms))).await?;
        if self.poll_exit().is_some() {
            self.process = None;
        }
        let process_alive = self
            .session
            .pid()
            .is_some_and(|pid| self.ctx.host.processes.is_alive(pid));
        if process_alive {
            info!(pane = self.ctx.pane, source = %self.ctx.source.id, "process alive, reattaching");
        } else if let Some(mut stale) = self.process.take() {
            // Kept handle without a live process: reap it.
            let _ = stale.kill();
        }
        Ok(SessionEvent::RestartDue { process_alive })
    }

    // ── Teardown ───────────────────────────────────────────────

    /// Release the window, then stop the process and its descendants.
    async fn shutdown(&mut self) {
        if let Some(window) = self.embedded.take() {
            let windows = Arc::clone(&self.ctx.host.windows);
            if let Err(e) = blocking(TEARDOWN_CALL_TIMEOUT, move || windows.release(window)).await {
                debug!(pane = self.ctx.pane, window = %window, error = %e, "window release failed");
            }
        }
        self.stop_processes().await;
    }

    /// SIGTERM the launched process and every tracked descendant still
    /// running, then SIGKILL whatever is left after `terminate_grace_ms`.
    async fn stop_processes(&mut self) {
        let mut process = self.process.take();
        let handle_pid = process.as_ref().map(|p| p.pid());
        let mut strays = self.live_descendants(handle_pid).await;
        if process.is_none() && strays.is_empty() {
            return;
        }

        let table = Arc::clone(&self.ctx.host.processes);
        if let Some(p) = process.as_mut()
            && let Err(e) = p.terminate()
        {
            warn!(pane = self.ctx.pane, pid = p.pid(), error = %e, "terminate failed");
        }
        for &pid in &strays {
            if let Err(e) = table.terminate(pid) {
                warn!(pane = self.ctx.pane, pid, error = %e, "terminate descendant failed");
            }
        }

        let deadline = Instant::now() + ms(self.ctx.tuning.terminate_grace_ms);
        loop {
            let handle_done = process
                .as_mut()
                .is_none_or(|p| !matches!(p.try_wait(), Ok(None)));
            strays.retain(|&pid| table.is_alive(pid));
            if handle_done && strays.is_empty() {
                debug!(pane = self.ctx.pane, pid = ?handle_pid, "processes exited");
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(ms(EXIT_POLL_MS)).await;
        }

        warn!(
            pane = self.ctx.pane,
            pid = ?handle_pid,
            descendants = strays.len(),
            "processes ignored SIGTERM, killing"
        );
        if let Some(p) = process.as_mut()
            && matches!(p.try_wait(), Ok(None))
            && let Err(e) = p.kill()
        {
            error!(pane = self.ctx.pane, pid = p.pid(), error = %e, "kill failed");
        }
        for pid in strays {
            if let Err(e) = table.kill(pid) {
                error!(pane = self.ctx.pane, pid, error = %e, "kill descendant failed");
            }
        }
    }

    /// Tracked pids other than `handle_pid` that still run the command line
    /// they had when first seen. A recycled pid does not match.
    async fn live_descendants(&mut self, handle_pid: Option<u32>) -> Vec<u32> {
        let tracked: HashMap<u32, String> = std::mem::take(&mut self.tree)
            .into_iter()
            .filter(|(pid, _)| Some(*pid) != handle_pid)
            .collect();
        if tracked.is_empty() {
            return Vec::new();
        }
        let processes = Arc::clone(&self.ctx.host.processes);
        match blocking(TEARDOWN_CALL_TIMEOUT, move || processes.scan()).await {
            Ok(procs) => tracked
                .into_iter()
                .filter(|(pid, args)| procs.get(pid).is_some_and(|p| &p.args == args))
                .map(|(pid, _)| pid)
                .collect(),
            Err(e) => {
                warn!(pane = self.ctx.pane, error = %e, "process scan before teardown failed");
                Vec::new()
            }
        }
    }
}
