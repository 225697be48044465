//! kiosk-host: host IO boundary for native app sources.
//! Provides subprocess execution, window listing and embedding through the
//! X11 command-line tools, process table inspection and application
//! launching. No business logic, pure IO boundary.

pub mod embed;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod process;
pub mod windows;

pub use embed::X11Tools;
pub use error::HostError;
pub use executor::{CommandRunner, SystemRunner};
pub use launcher::{AppProcess, Launcher, SystemLauncher};
pub use process::{ProcessTable, SystemProcessTable};
pub use windows::WindowSystem;
