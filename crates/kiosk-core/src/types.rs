use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ─── Identifiers ──────────────────────────────────────────────────

/// Zero-based pane index (0..N-1).
pub type PaneIndex = usize;

/// Stable identifier of a configured content source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ─── Sources ──────────────────────────────────────────────────────

/// A configured content origin. Immutable for the lifetime of a
/// configuration; replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: SourceKind,
}

impl Source {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, SourceKind::NativeApp(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    Remote(RemoteSpec),
    NativeApp(NativeAppSpec),
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::NativeApp(_) => "native_app",
        }
    }
}

/// Remote content: a page loaded by the shell's content view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSpec {
    pub url: String,
    #[serde(default)]
    pub reload: ReloadPolicy,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ReloadPolicy {
    /// Reload only as part of heartbeat recovery.
    #[default]
    OnFailure,
    /// Additionally reload on a fixed timer.
    Periodic { interval_secs: u64 },
}

/// A native application whose top-level window gets embedded into a pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeAppSpec {
    pub launch_cmd: String,
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub window_title_pattern: Option<String>,
    #[serde(default)]
    pub window_class_pattern: Option<String>,
    #[serde(default)]
    pub child_window_class_pattern: Option<String>,
    #[serde(default)]
    pub child_window_title_pattern: Option<String>,
    #[serde(default = "default_true")]
    pub follow_children: bool,
    #[serde(default)]
    pub allow_global_fallback: bool,
}

fn default_true() -> bool {
    true
}

impl NativeAppSpec {
    /// Lower-cased basename of the launch command, used to check that a
    /// candidate window really belongs to the expected executable.
    ///
    /// ```text
    /// "/usr/bin/Gedit"          -> "gedit"
    /// "\"C:\\Apps\\tool.exe\""  -> "tool.exe"
    /// ```
    pub fn expected_exe(&self) -> String {
        let cmd = self.launch_cmd.trim().trim_matches('"');
        cmd.rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(cmd)
            .to_ascii_lowercase()
    }

    pub fn has_window_filter(&self) -> bool {
        self.window_title_pattern.is_some() || self.window_class_pattern.is_some()
    }
}

// ─── Pane ─────────────────────────────────────────────────────────

/// Static per-pane configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneConfig {
    /// Source shown when no rotation entry is active.
    #[serde(default)]
    pub fallback: Option<SourceId>,
}

// ─── Shell geometry ───────────────────────────────────────────────

/// Native window handle (X11 window id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl FromStr for WindowId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).map(Self),
            None => s.parse::<u64>().map(Self),
        }
    }
}

impl Serialize for WindowId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WindowId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Target rectangle of a pane, in the coordinate space of its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    /// Never hand a zero-sized rectangle to a native window.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
            ..self
        }
    }
}

/// Where a pane lives: its rectangle plus the shell's native region that
/// embedded windows get reparented into (absolute placement if absent).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub geometry: Geometry,
    #[serde(default)]
    pub parent: Option<WindowId>,
}

// ─── Host snapshots ───────────────────────────────────────────────

/// One entry from `ps -eo pid=,ppid=,args=`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub args: String,
}

impl ProcessInfo {
    /// Lower-cased basename of argv[0], comparable with
    /// [`NativeAppSpec::expected_exe`].
    pub fn exe_name(&self) -> String {
        let argv0 = self.args.split_whitespace().next().unwrap_or("");
        argv0
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(argv0)
            .to_ascii_lowercase()
    }
}

/// Snapshot of all running processes on the host, keyed by PID.
pub type ProcessMap = HashMap<u32, ProcessInfo>;

/// A top-level or child window as reported by the window system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    /// Owning process, when the window advertises one.
    pub pid: Option<u32>,
    /// `instance.Class` (may be empty).
    pub class: String,
    pub title: String,
}
