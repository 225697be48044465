//! kioskd: multi-pane kiosk orchestrator binary.
//! Scheduler, source supervisor and shell interface in one process.

use clap::Parser;

mod cli;
mod client;
mod config_watch;
mod content;
mod daemon;
mod host;
mod native_worker;
mod readiness;
mod remote_worker;
mod scheduler_loop;
mod server;
mod supervisor;
#[cfg(test)]
mod testing;
mod worker;

use kiosk_core::{KioskConfig, SourceKind, resolve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Run(opts) => {
            let filter = std::env::var("KIOSK_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("kioskd starting");

            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Check(opts) => {
            let config = KioskConfig::load(&opts.config)?;
            print!("{}", summarize(&config));
        }
        cli::Command::Resolve(opts) => {
            let config = KioskConfig::load(&opts.config.config)?;
            let at = opts
                .at
                .unwrap_or_else(|| chrono::Local::now().naive_local());
            let resolution = resolve(&config.schedule(), at);
            let out = serde_json::json!({
                "at": at.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "desired": resolution.desired,
                "conflicts": resolution.conflicts,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        cli::Command::Panes { json } => {
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            client::cmd_panes(&socket_path, json).await?;
        }
        cli::Command::Ready => {
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            let exit_code = client::cmd_ready(&socket_path).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

/// Human summary printed by `kioskd check`.
fn summarize(config: &KioskConfig) -> String {
    let native = config.sources.iter().filter(|s| s.is_native()).count();
    let mut out = format!(
        "ok: {} sources ({} remote, {native} native), {} panes, {} rotations\n",
        config.sources.len(),
        config.sources.len() - native,
        config.panes.len(),
        config.rotations.len(),
    );
    for source in &config.sources {
        let target = match &source.kind {
            SourceKind::Remote(spec) => spec.url.clone(),
            SourceKind::NativeApp(spec) => spec.launch_cmd.clone(),
        };
        out.push_str(&format!(
            "  {:<16} {:<8} {target}\n",
            source.id.as_str(),
            source.kind.as_str()
        ));
    }
    for (pane, cfg) in config.panes.iter().enumerate() {
        let fallback = cfg.fallback.as_ref().map_or("-", |f| f.as_str());
        out.push_str(&format!("  pane {pane}: fallback {fallback}\n"));
    }
    out
}
