//! Window listing: `wmctrl -lpx` for top-level windows, `xwininfo
//! -children` for the child tree, `xdotool getwindowgeometry` for size.

use kiosk_core::{Geometry, Placement, WindowId, WindowInfo};

use crate::error::HostError;

/// Everything the supervisor needs from the window system.
pub trait WindowSystem: Send + Sync {
    /// All managed top-level windows.
    fn list_windows(&self) -> Result<Vec<WindowInfo>, HostError>;

    /// Direct children of `window`. Child windows carry no pid.
    fn list_children(&self, window: WindowId) -> Result<Vec<WindowInfo>, HostError>;

    fn exists(&self, window: WindowId) -> bool;

    /// Reparent into the pane region, strip decorations, apply the initial
    /// geometry and map the window.
    fn embed(&self, window: WindowId, placement: &Placement) -> Result<(), HostError>;

    fn move_resize(&self, window: WindowId, geometry: Geometry) -> Result<(), HostError>;

    /// Current size and position as reported by the window system.
    fn geometry(&self, window: WindowId) -> Result<Geometry, HostError>;

    /// Detach on teardown: unmap so the pane region is free immediately.
    fn release(&self, window: WindowId) -> Result<(), HostError>;
}

impl<T: WindowSystem + ?Sized> WindowSystem for std::sync::Arc<T> {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, HostError> {
        (**self).list_windows()
    }
    fn list_children(&self, window: WindowId) -> Result<Vec<WindowInfo>, HostError> {
        (**self).list_children(window)
    }
    fn exists(&self, window: WindowId) -> bool {
        (**self).exists(window)
    }
    fn embed(&self, window: WindowId, placement: &Placement) -> Result<(), HostError> {
        (**self).embed(window, placement)
    }
    fn move_resize(&self, window: WindowId, geometry: Geometry) -> Result<(), HostError> {
        (**self).move_resize(window, geometry)
    }
    fn geometry(&self, window: WindowId) -> Result<Geometry, HostError> {
        (**self).geometry(window)
    }
    fn release(&self, window: WindowId) -> Result<(), HostError> {
        (**self).release(window)
    }
}

// ─── wmctrl -lpx ─────────────────────────────────────────────────

/// Parse `wmctrl -lpx` output:
///
/// ```text
/// 0x03a00003  0 4242   gedit.Gedit           myhost notes - gedit
/// <id>    <desk> <pid> <instance.Class>      <host> <title…>
/// ```
///
/// A pid of 0 means the window does not advertise `_NET_WM_PID`.
pub fn parse_wmctrl_output(output: &str) -> Result<Vec<WindowInfo>, HostError> {
    let mut windows = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parse_err = |detail: &str| HostError::ParseError {
            what: "wmctrl",
            line_num: idx + 1,
            detail: detail.to_string(),
        };
        let mut fields = line.split_whitespace();
        let id: WindowId = fields
            .next()
            .ok_or_else(|| parse_err("missing window id"))?
            .parse()
            .map_err(|_| parse_err("bad window id"))?;
        let _desktop = fields.next().ok_or_else(|| parse_err("missing desktop"))?;
        let pid: u32 = fields
            .next()
            .ok_or_else(|| parse_err("missing pid"))?
            .parse()
            .map_err(|_| parse_err("bad pid"))?;
        let class = fields.next().ok_or_else(|| parse_err("missing class"))?;
        let _host = fields.next();
        let title = fields.collect::<Vec<_>>().join(" ");
        windows.push(WindowInfo {
            id,
            pid: (pid != 0).then_some(pid),
            class: if class == "N/A" { String::new() } else { class.to_string() },
            title,
        });
    }
    Ok(windows)
}

// ─── xwininfo -children ──────────────────────────────────────────

/// Parse the child lines of `xwininfo -children -id <w>`:
///
/// ```text
///      0x3a00004 "child title": ("gedit" "Gedit")  800x600+0+0  +10+10
///      0x3a00005 (has no name): ()  1x1+-1+-1  +9+9
/// ```
pub fn parse_xwininfo_children(output: &str) -> Vec<WindowInfo> {
    let mut children = Vec::new();
    let mut in_children = false;
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.ends_with("children:") || trimmed.ends_with("child:") {
            in_children = true;
            continue;
        }
        if !in_children || !trimmed.starts_with("0x") {
            continue;
        }
        if let Some(child) = parse_child_line(trimmed) {
            children.push(child);
        }
    }
    children
}

fn parse_child_line(line: &str) -> Option<WindowInfo> {
    let (id, rest) = line.split_once(' ')?;
    let id: WindowId = id.parse().ok()?;
    let rest = rest.trim_start();

    let (title, class_part) = if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.rfind("\": (")?;
        (quoted[..end].to_string(), &quoted[end + 3..])
    } else {
        let (_, after) = rest.split_once(": (")?;
        (String::new(), after)
    };
    let class_part = class_part.trim_start_matches('(');
    let class_end = class_part.find(')')?;
    let class = class_part[..class_end]
        .split('"')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".");
    Some(WindowInfo {
        id,
        pid: None,
        class,
        title,
    })
}

// ─── xdotool getwindowgeometry --shell ───────────────────────────

pub fn parse_geometry_shell(output: &str) -> Result<Geometry, HostError> {
    let mut geometry = Geometry::default();
    let mut seen = 0u8;
    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let bad = || HostError::ParseError {
            what: "geometry",
            line_num: 0,
            detail: format!("bad value for {key}: {value:?}"),
        };
        match key {
            "X" => geometry.x = value.parse().map_err(|_| bad())?,
            "Y" => geometry.y = value.parse().map_err(|_| bad())?,
            "WIDTH" => geometry.width = value.parse().map_err(|_| bad())?,
            "HEIGHT" => geometry.height = value.parse().map_err(|_| bad())?,
            _ => continue,
        }
        seen += 1;
    }
    if seen < 4 {
        return Err(HostError::ParseError {
            what: "geometry",
            line_num: 0,
            detail: "incomplete geometry".to_string(),
        });
    }
    Ok(geometry)
}
