//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kioskd", about = "Multi-pane kiosk orchestrator")]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/kiosk/kioskd.sock)
    #[arg(long, short = 's', global = true, env = "KIOSK_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the orchestrator (scheduler + supervisor + UDS server)
    Run(RunOpts),
    /// Validate a configuration file and print a summary
    Check(ConfigOpts),
    /// Dry-run the scheduler and print the desired mapping (JSON)
    Resolve(ResolveOpts),
    /// List pane sessions of a running daemon
    Panes {
        /// Print the raw JSON list
        #[arg(long)]
        json: bool,
    },
    /// Query the startup readiness gate (exit 0 when ready)
    Ready,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    /// Configuration file (JSON)
    #[arg(long, short = 'c', env = "KIOSK_CONFIG")]
    pub config: PathBuf,
}

#[derive(clap::Args)]
pub struct RunOpts {
    #[command(flatten)]
    pub config: ConfigOpts,

    /// X display to manage windows on
    #[arg(long, env = "DISPLAY")]
    pub display: Option<String>,
}

#[derive(clap::Args)]
pub struct ResolveOpts {
    #[command(flatten)]
    pub config: ConfigOpts,

    /// Local wall-clock time to resolve at (YYYY-MM-DDTHH:MM), default now
    #[arg(long, value_parser = parse_local_time)]
    pub at: Option<chrono::NaiveDateTime>,
}

fn parse_local_time(raw: &str) -> Result<chrono::NaiveDateTime, String> {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| format!("expected YYYY-MM-DDTHH:MM: {e}"))
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/kiosk/kioskd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/kiosk-{user}/kioskd.sock")
}
