//! Native application launcher.
//!
//! The launched process belongs to the supervisor. Nothing else may
//! terminate it.

use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

use crate::error::HostError;
use crate::process::pid_alive;

/// A launched native application.
pub trait AppProcess: Send + Sync {
    fn pid(&self) -> u32;

    /// Exit code if the process has exited (`Some(None)` when killed by a
    /// signal), `None` while it is still running.
    fn try_wait(&mut self) -> Result<Option<Option<i32>>, HostError>;

    /// Polite stop request (SIGTERM).
    fn terminate(&mut self) -> Result<(), HostError>;

    /// Forced stop (SIGKILL) and reap.
    fn kill(&mut self) -> Result<(), HostError>;
}

pub trait Launcher: Send + Sync {
    fn spawn(&self, launch_cmd: &str, args: &str) -> Result<Box<dyn AppProcess>, HostError>;
}

/// Spawns through `std::process::Command`; `args` is split with shell
/// quoting rules, no shell is involved.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn spawn(&self, launch_cmd: &str, args: &str) -> Result<Box<dyn AppProcess>, HostError> {
        let argv = shell_words::split(args).map_err(|e| HostError::InvalidArgs {
            args: args.to_string(),
            detail: e.to_string(),
        })?;
        let program = launch_cmd.trim().trim_matches('"');
        let child = Command::new(program)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| HostError::Spawn {
                cmd: program.to_string(),
                source,
            })?;
        debug!(pid = child.id(), cmd = program, "spawned native app");
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

impl AppProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<Option<i32>>, HostError> {
        Ok(self.child.try_wait()?.map(|status| status.code()))
    }

    fn terminate(&mut self) -> Result<(), HostError> {
        let pid = self.child.id();
        if !pid_alive(pid) {
            return Ok(());
        }
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return Ok(());
        };
        // SAFETY: signalling a child we spawned and have not yet reaped.
        let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            warn!(pid, error = %err, "SIGTERM failed");
            return Err(HostError::Io(err));
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<(), HostError> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(HostError::Io(e)),
        }
        self.child.wait()?;
        Ok(())
    }
}
