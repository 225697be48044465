//! In-memory host fakes shared by the runtime tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use kiosk_core::types::{NativeAppSpec, ReloadPolicy, RemoteSpec};
use kiosk_core::{
    Geometry, Placement, ProbeOutcome, ProcessInfo, ProcessMap, Source, SourceKind, WindowId,
    WindowInfo,
};
use kiosk_host::{AppProcess, HostError, Launcher, ProcessTable, WindowSystem};

use crate::content::ContentProbe;
use crate::host::Host;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().expect("fake lock poisoned")
}

pub(crate) fn remote_source(id: &str, url: &str) -> Source {
    Source {
        id: id.into(),
        name: String::new(),
        kind: SourceKind::Remote(RemoteSpec {
            url: url.to_string(),
            reload: ReloadPolicy::OnFailure,
        }),
    }
}

pub(crate) fn native_spec(launch_cmd: &str, title_pattern: &str) -> NativeAppSpec {
    NativeAppSpec {
        launch_cmd: launch_cmd.to_string(),
        args: String::new(),
        window_title_pattern: Some(title_pattern.to_string()),
        window_class_pattern: None,
        child_window_class_pattern: None,
        child_window_title_pattern: None,
        follow_children: true,
        allow_global_fallback: false,
    }
}

pub(crate) fn native_source(id: &str, launch_cmd: &str, title_pattern: &str) -> Source {
    native_source_with(id, native_spec(launch_cmd, title_pattern))
}

pub(crate) fn native_source_with(id: &str, spec: NativeAppSpec) -> Source {
    Source {
        id: id.into(),
        name: String::new(),
        kind: SourceKind::NativeApp(spec),
    }
}

// ─── Windows ─────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeWindows {
    windows: Mutex<Vec<WindowInfo>>,
    gone: Mutex<HashSet<WindowId>>,
    geometry: Mutex<HashMap<WindowId, Geometry>>,
    calls: Mutex<Vec<String>>,
    embed_failures: AtomicU32,
    ignored_resizes: AtomicU32,
    hang: Mutex<bool>,
    unhang: Condvar,
}

impl FakeWindows {
    pub(crate) fn add(&self, window: WindowInfo) {
        lock(&self.windows).push(window);
    }

    /// Simulate the window being destroyed.
    pub(crate) fn destroy(&self, window: WindowId) {
        lock(&self.windows).retain(|w| w.id != window);
        lock(&self.gone).insert(window);
    }

    pub(crate) fn fail_embeds(&self, count: u32) {
        self.embed_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` resize requests are silently ignored.
    pub(crate) fn ignore_resizes(&self, count: u32) {
        self.ignored_resizes.store(count, Ordering::SeqCst);
    }

    /// `list_windows` blocks until [`Self::release_listing`], like a tool
    /// stuck on an unresponsive X server. Bounded so a forgotten release
    /// cannot wedge the test binary.
    pub(crate) fn hang_listing(&self) {
        *lock(&self.hang) = true;
    }

    pub(crate) fn release_listing(&self) {
        *lock(&self.hang) = false;
        self.unhang.notify_all();
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub(crate) fn geometry_of(&self, window: WindowId) -> Option<Geometry> {
        lock(&self.geometry).get(&window).copied()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl WindowSystem for FakeWindows {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, HostError> {
        let hung = lock(&self.hang);
        let _ = self
            .unhang
            .wait_timeout_while(hung, Duration::from_secs(5), |h| *h)
            .expect("fake lock poisoned");
        Ok(lock(&self.windows).clone())
    }

    fn list_children(&self, _window: WindowId) -> Result<Vec<WindowInfo>, HostError> {
        Ok(Vec::new())
    }

    fn exists(&self, window: WindowId) -> bool {
        !lock(&self.gone).contains(&window)
    }

    fn embed(&self, window: WindowId, placement: &Placement) -> Result<(), HostError> {
        self.record(format!("embed {window}"));
        if Self::take_one(&self.embed_failures) {
            return Err(HostError::CommandFailed {
                program: "xdotool".to_string(),
                detail: "BadWindow".to_string(),
            });
        }
        lock(&self.geometry).insert(window, placement.geometry.clamped());
        Ok(())
    }

    fn move_resize(&self, window: WindowId, geometry: Geometry) -> Result<(), HostError> {
        let g = geometry.clamped();
        self.record(format!("resize {window} {}x{}", g.width, g.height));
        if !Self::take_one(&self.ignored_resizes) {
            lock(&self.geometry).insert(window, g);
        }
        Ok(())
    }

    fn geometry(&self, window: WindowId) -> Result<Geometry, HostError> {
        self.geometry_of(window).ok_or_else(|| HostError::CommandFailed {
            program: "xdotool".to_string(),
            detail: "no such window".to_string(),
        })
    }

    fn release(&self, window: WindowId) -> Result<(), HostError> {
        self.record(format!("release {window}"));
        Ok(())
    }
}

// ─── Processes ───────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeProcesses {
    map: Mutex<ProcessMap>,
    signalled: Mutex<Vec<u32>>,
}

impl FakeProcesses {
    pub(crate) fn insert(&self, pid: u32, ppid: u32, args: &str) {
        lock(&self.map).insert(
            pid,
            ProcessInfo {
                pid,
                ppid,
                args: args.to_string(),
            },
        );
    }

    pub(crate) fn exit(&self, pid: u32) {
        lock(&self.map).remove(&pid);
    }

    pub(crate) fn contains(&self, pid: u32) -> bool {
        lock(&self.map).contains_key(&pid)
    }

    /// Pids stopped through the table rather than a launch handle.
    pub(crate) fn signalled(&self) -> Vec<u32> {
        lock(&self.signalled).clone()
    }
}

impl ProcessTable for FakeProcesses {
    fn scan(&self) -> Result<ProcessMap, HostError> {
        Ok(lock(&self.map).clone())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.contains(pid)
    }

    fn terminate(&self, pid: u32) -> Result<(), HostError> {
        if self.contains(pid) {
            lock(&self.signalled).push(pid);
            self.exit(pid);
        }
        Ok(())
    }

    fn kill(&self, pid: u32) -> Result<(), HostError> {
        self.exit(pid);
        Ok(())
    }
}

// ─── Launcher ────────────────────────────────────────────────────

/// Spawns fake processes. When `window_title` is set, every spawn also
/// creates a top-level window owned by the new pid.
pub(crate) struct FakeLauncher {
    processes: Arc<FakeProcesses>,
    windows: Arc<FakeWindows>,
    next_pid: AtomicU32,
    fail: AtomicBool,
    window_title: Mutex<Option<String>>,
    spawned: Mutex<Vec<u32>>,
    terminated: Arc<Mutex<Vec<u32>>>,
}

impl FakeLauncher {
    pub(crate) fn fail_spawns(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn open_window_on_spawn(&self, title: &str) {
        *lock(&self.window_title) = Some(title.to_string());
    }

    pub(crate) fn spawned(&self) -> Vec<u32> {
        lock(&self.spawned).clone()
    }

    pub(crate) fn terminated(&self) -> Vec<u32> {
        lock(&self.terminated).clone()
    }
}

impl Launcher for FakeLauncher {
    fn spawn(&self, launch_cmd: &str, _args: &str) -> Result<Box<dyn AppProcess>, HostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::Spawn {
                cmd: launch_cmd.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.processes.insert(pid, 1, launch_cmd);
        lock(&self.spawned).push(pid);
        if let Some(title) = lock(&self.window_title).clone() {
            self.windows.add(WindowInfo {
                id: WindowId(u64::from(pid) << 8),
                pid: Some(pid),
                class: "app.App".to_string(),
                title,
            });
        }
        Ok(Box::new(FakeProcess {
            pid,
            processes: Arc::clone(&self.processes),
            terminated: Arc::clone(&self.terminated),
        }))
    }
}

struct FakeProcess {
    pid: u32,
    processes: Arc<FakeProcesses>,
    terminated: Arc<Mutex<Vec<u32>>>,
}

impl AppProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<Option<i32>>, HostError> {
        Ok((!self.processes.contains(self.pid)).then_some(Some(0)))
    }

    fn terminate(&mut self) -> Result<(), HostError> {
        if self.processes.contains(self.pid) {
            lock(&self.terminated).push(self.pid);
            self.processes.exit(self.pid);
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<(), HostError> {
        self.processes.exit(self.pid);
        Ok(())
    }
}

// ─── Content ─────────────────────────────────────────────────────

/// Scripted probe outcomes; `fallback` once the script runs out.
pub(crate) struct FakeContent {
    script: Mutex<VecDeque<ProbeOutcome>>,
    fallback: Mutex<ProbeOutcome>,
    probes: AtomicU32,
}

impl FakeContent {
    pub(crate) fn script(&self, outcomes: &[ProbeOutcome]) {
        lock(&self.script).extend(outcomes.iter().copied());
    }

    pub(crate) fn set_fallback(&self, outcome: ProbeOutcome) {
        *lock(&self.fallback) = outcome;
    }

    pub(crate) fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentProbe for FakeContent {
    async fn probe(&self, _url: &str, _timeout: Duration) -> ProbeOutcome {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.script).pop_front();
        next.unwrap_or_else(|| *lock(&self.fallback))
    }
}

// ─── Bundle ──────────────────────────────────────────────────────

pub(crate) struct FakeHost {
    pub windows: Arc<FakeWindows>,
    pub processes: Arc<FakeProcesses>,
    pub launcher: Arc<FakeLauncher>,
    pub content: Arc<FakeContent>,
}

impl FakeHost {
    pub(crate) fn host(&self) -> Host {
        Host {
            windows: self.windows.clone(),
            processes: self.processes.clone(),
            launcher: self.launcher.clone(),
            content: self.content.clone(),
        }
    }
}

pub(crate) fn fake_host() -> FakeHost {
    let windows = Arc::new(FakeWindows::default());
    let processes = Arc::new(FakeProcesses::default());
    let launcher = Arc::new(FakeLauncher {
        processes: Arc::clone(&processes),
        windows: Arc::clone(&windows),
        next_pid: AtomicU32::new(1000),
        fail: AtomicBool::new(false),
        window_title: Mutex::new(None),
        spawned: Mutex::new(Vec::new()),
        terminated: Arc::new(Mutex::new(Vec::new())),
    });
    let content = Arc::new(FakeContent {
        script: Mutex::new(VecDeque::new()),
        fallback: Mutex::new(ProbeOutcome::Success),
        probes: AtomicU32::new(0),
    });
    FakeHost {
        windows,
        processes,
        launcher,
        content,
    }
}
