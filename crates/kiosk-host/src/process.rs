//! Process table inspection.

use kiosk_core::{ProcessInfo, ProcessMap};

use crate::error::HostError;
use crate::executor::{CommandRunner, SystemRunner};

/// View of host processes, plus signalling for processes the supervisor
/// started but holds no handle to (descendants of a launcher that exited).
pub trait ProcessTable: Send + Sync {
    /// Snapshot of every running process.
    fn scan(&self) -> Result<ProcessMap, HostError>;

    /// Whether `pid` still exists.
    fn is_alive(&self, pid: u32) -> bool;

    /// SIGTERM.
    fn terminate(&self, pid: u32) -> Result<(), HostError>;

    /// SIGKILL.
    fn kill(&self, pid: u32) -> Result<(), HostError>;
}

/// `ps` for snapshots, `kill(pid, 0)` for liveness.
#[derive(Debug, Clone, Default)]
pub struct SystemProcessTable<R = SystemRunner> {
    runner: R,
}

impl<R: CommandRunner> SystemProcessTable<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> ProcessTable for SystemProcessTable<R> {
    fn scan(&self) -> Result<ProcessMap, HostError> {
        let output = self.runner.run("ps", &["-eo", "pid=,ppid=,args="])?;
        Ok(parse_ps_output(&output))
    }

    fn is_alive(&self, pid: u32) -> bool {
        pid_alive(pid)
    }

    fn terminate(&self, pid: u32) -> Result<(), HostError> {
        send_signal(pid, libc::SIGTERM)
    }

    fn kill(&self, pid: u32) -> Result<(), HostError> {
        send_signal(pid, libc::SIGKILL)
    }
}

/// Deliver `signal` to `pid`. A process that is already gone is not an
/// error.
pub fn send_signal(pid: u32, signal: libc::c_int) -> Result<(), HostError> {
    let raw = match libc::pid_t::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => {
            return Err(HostError::InvalidArgs {
                args: pid.to_string(),
                detail: "not a signallable pid".to_string(),
            });
        }
    };
    // SAFETY: plain kill(2); pid is positive so no process group is hit.
    let rc = unsafe { libc::kill(raw, signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(HostError::Io(err));
    }
    Ok(())
}

/// Signal 0 probes for existence without delivering anything. `EPERM`
/// still means the process exists.
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 performs only permission and existence checks.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn parse_ps_output(output: &str) -> ProcessMap {
    let mut map = ProcessMap::new();
    for line in output.lines() {
        if let Some(info) = parse_ps_line(line) {
            map.insert(info.pid, info);
        }
    }
    map
}

fn parse_ps_line(line: &str) -> Option<ProcessInfo> {
    let mut rest = line.trim();
    if rest.is_empty() {
        return None;
    }
    let mut next_field = || {
        let end = rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let (field, tail) = rest.split_at(end);
        rest = tail.trim_start();
        field
    };
    let pid: u32 = next_field().parse().ok()?;
    let ppid: u32 = next_field().parse().ok()?;
    Some(ProcessInfo {
        pid,
        ppid,
        args: rest.to_string(),
    })
}
