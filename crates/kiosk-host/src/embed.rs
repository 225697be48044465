//! X11 window embedding through `xdotool`, `xprop`, `wmctrl`, `xwininfo`.

use kiosk_core::{Geometry, Placement, WindowId, WindowInfo};
use tracing::debug;

use crate::error::HostError;
use crate::executor::{CommandRunner, SystemRunner};
use crate::windows::{
    WindowSystem, parse_geometry_shell, parse_wmctrl_output, parse_xwininfo_children,
};

/// Motif hints with `MWM_HINTS_DECORATIONS` set and no decorations.
const NO_DECORATIONS: &str = "2, 0, 0, 0, 0";

/// [`WindowSystem`] backed by the standard X11 command-line tools.
#[derive(Debug, Clone, Default)]
pub struct X11Tools<R = SystemRunner> {
    runner: R,
}

impl<R: CommandRunner> X11Tools<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn xdotool(&self, args: &[&str]) -> Result<String, HostError> {
        self.runner.run("xdotool", args)
    }

    fn strip_decorations(&self, window: WindowId) -> Result<(), HostError> {
        let id = window.to_string();
        self.runner.run(
            "xprop",
            &[
                "-id",
                &id,
                "-f",
                "_MOTIF_WM_HINTS",
                "32c",
                "-set",
                "_MOTIF_WM_HINTS",
                NO_DECORATIONS,
            ],
        )?;
        Ok(())
    }
}

impl<R: CommandRunner> WindowSystem for X11Tools<R> {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, HostError> {
        let output = self.runner.run("wmctrl", &["-lpx"])?;
        parse_wmctrl_output(&output)
    }

    fn list_children(&self, window: WindowId) -> Result<Vec<WindowInfo>, HostError> {
        let id = window.to_string();
        let output = self.runner.run("xwininfo", &["-children", "-id", &id])?;
        Ok(parse_xwininfo_children(&output))
    }

    fn exists(&self, window: WindowId) -> bool {
        self.xdotool(&["getwindowname", &window.to_string()]).is_ok()
    }

    fn embed(&self, window: WindowId, placement: &Placement) -> Result<(), HostError> {
        let id = window.to_string();
        // Decorations are cosmetic; some windows reject the property.
        if let Err(e) = self.strip_decorations(window) {
            debug!(window = %window, error = %e, "strip decorations failed");
        }
        if let Some(parent) = placement.parent {
            self.xdotool(&["windowreparent", &id, &parent.to_string()])?;
        }
        self.move_resize(window, placement.geometry)?;
        self.xdotool(&["windowmap", &id])?;
        Ok(())
    }

    fn move_resize(&self, window: WindowId, geometry: Geometry) -> Result<(), HostError> {
        let g = geometry.clamped();
        let id = window.to_string();
        self.xdotool(&["windowsize", &id, &g.width.to_string(), &g.height.to_string()])?;
        self.xdotool(&["windowmove", &id, &g.x.to_string(), &g.y.to_string()])?;
        Ok(())
    }

    fn geometry(&self, window: WindowId) -> Result<Geometry, HostError> {
        let output = self.xdotool(&["getwindowgeometry", "--shell", &window.to_string()])?;
        parse_geometry_shell(&output)
    }

    fn release(&self, window: WindowId) -> Result<(), HostError> {
        self.xdotool(&["windowunmap", &window.to_string()])?;
        Ok(())
    }
}
