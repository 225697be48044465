//! Daemon wiring: scheduler, supervisor, readiness gate, config watcher and
//! UDS server on one runtime, torn down together on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kiosk_core::{KioskConfig, resolve};

use crate::cli::RunOpts;
use crate::config_watch::watch_config;
use crate::host::Host;
use crate::readiness::run_readiness;
use crate::scheduler_loop::{Clock, local_clock, run_scheduler};
use crate::server::{ShellState, run_server};
use crate::supervisor::{Supervisor, SupervisorCommand};
use crate::worker::ms;

const CONFIG_DEBOUNCE: Duration = Duration::from_millis(300);

/// Scheduler, readiness gate, supervisor and reload forwarding, wired
/// together and running.
struct Pipeline {
    shell: ShellState,
    supervisor: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

/// Spawn the pipeline for `config`. The desired state is resolved before
/// anything starts, so the supervisor's first reconcile and the readiness
/// gate both see the scheduled panes rather than an empty mapping.
fn start_pipeline(
    config: Arc<KioskConfig>,
    config_rx: watch::Receiver<Arc<KioskConfig>>,
    host: Host,
    clock: Clock,
    root: &CancellationToken,
) -> Pipeline {
    let initial = resolve(&config.schedule(), clock());
    let (desired_tx, desired_rx) = watch::channel(Arc::new(initial));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let (ready_tx, ready_rx) = watch::channel(false);

    let scheduler = tokio::spawn(run_scheduler(
        config_rx.clone(),
        desired_tx,
        clock,
        root.child_token(),
    ));
    let readiness = tokio::spawn(run_readiness(
        events_rx,
        ready_tx,
        ms(config.tuning.readiness_timeout_ms),
        root.child_token(),
    ));

    let supervisor = Supervisor::new(config, host, root.child_token(), events_tx);
    let shell = ShellState {
        panes: supervisor.subscribe_panes(),
        ready: ready_rx,
        resolution: desired_rx.clone(),
        commands: commands_tx.clone(),
    };
    let supervisor = tokio::spawn(supervisor.run(desired_rx, commands_rx));
    let reloads = tokio::spawn(forward_reloads(config_rx, commands_tx, root.child_token()));

    Pipeline {
        shell,
        supervisor,
        background: vec![scheduler, readiness, reloads],
    }
}

/// Run the orchestrator until ctrl-c or SIGTERM.
pub async fn run_daemon(opts: RunOpts, socket_path: &str) -> anyhow::Result<()> {
    let config_path = std::path::absolute(&opts.config.config)?;
    let config = Arc::new(KioskConfig::load(&config_path)?);
    tracing::info!(
        path = %config_path.display(),
        sources = config.sources.len(),
        panes = config.panes.len(),
        rotations = config.rotations.len(),
        "configuration loaded"
    );

    let host = Host::system(opts.display)?;
    let root = CancellationToken::new();

    let (config_tx, config_rx) = watch::channel(Arc::clone(&config));
    let Pipeline {
        shell,
        supervisor: mut supervisor_handle,
        mut background,
    } = start_pipeline(config, config_rx, host, local_clock(), &root);

    background.push(tokio::spawn({
        let cancel = root.child_token();
        async move {
            if let Err(e) = watch_config(config_path, config_tx, CONFIG_DEBOUNCE, cancel).await {
                tracing::error!("config watcher error: {e}");
            }
        }
    }));

    let server_socket = socket_path.to_string();
    let server_cancel = root.child_token();
    let mut server_handle =
        tokio::spawn(async move { run_server(&server_socket, shell, server_cancel).await });

    let mut failure = None;
    tokio::select! {
        res = shutdown_signal() => res?,
        _ = &mut supervisor_handle => tracing::warn!("supervisor exited unexpectedly"),
        res = &mut server_handle => {
            tracing::warn!("server exited unexpectedly");
            failure = match res {
                Ok(Err(e)) => Some(e),
                Err(e) => Some(e.into()),
                Ok(Ok(())) => None,
            };
        }
    }

    // Sessions release their windows and terminate their processes before
    // the supervisor task returns.
    root.cancel();
    if !supervisor_handle.is_finished() {
        let _ = supervisor_handle.await;
    }
    for handle in background {
        let _ = handle.await;
    }
    // The server removes its socket on the way out.
    if !server_handle.is_finished() {
        let _ = server_handle.await;
    }
    tracing::info!("daemon stopped");
    failure.map_or(Ok(()), Err)
}

/// Hand every published configuration to the supervisor.
async fn forward_reloads(
    mut config_rx: watch::Receiver<Arc<KioskConfig>>,
    commands: mpsc::Sender<SupervisorCommand>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let config = config_rx.borrow_and_update().clone();
                if commands.send(SupervisorCommand::Reload(config)).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}
