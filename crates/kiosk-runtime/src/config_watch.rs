//! Configuration hot reload.
//!
//! Watches the config file's directory (editors replace files by rename),
//! debounces bursts, and publishes a new configuration only when it parses,
//! validates and differs from the current one. A rejected file leaves the
//! running configuration untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kiosk_core::KioskConfig;

pub async fn watch_config(
    path: PathBuf,
    config_tx: watch::Sender<Arc<KioskConfig>>,
    debounce: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    // Bridge synchronous notify callbacks into async land.
    let (notify_tx, mut notify_rx) = mpsc::channel::<notify::Result<Event>>(64);
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        let _ = notify_tx.blocking_send(res);
    })?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "watching configuration");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            event = notify_rx.recv() => match event {
                None => return Ok(()),
                Some(Err(e)) => warn!(error = %e, "config watch error"),
                Some(Ok(event)) if touches(&event, &path) => {
                    // Editors write in bursts; wait for quiet.
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => return Ok(()),
                            () = tokio::time::sleep(debounce) => break,
                            more = notify_rx.recv() => if more.is_none() { break },
                        }
                    }
                    reload(&path, &config_tx);
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Whether `event` may have changed the file at `path`.
fn touches(event: &Event, path: &Path) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    );
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == path.file_name())
}

/// Load `path` and publish it if valid and different. Returns whether a new
/// configuration was published.
pub fn reload(path: &Path, config_tx: &watch::Sender<Arc<KioskConfig>>) -> bool {
    match KioskConfig::load(path) {
        Ok(config) => {
            if **config_tx.borrow() == config {
                debug!(path = %path.display(), "configuration unchanged");
                return false;
            }
            info!(
                path = %path.display(),
                sources = config.sources.len(),
                panes = config.panes.len(),
                rotations = config.rotations.len(),
                "configuration reloaded"
            );
            config_tx.send_replace(Arc::new(config));
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "configuration rejected, keeping current");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};

    const CONFIG: &str = r#"{
        "sources": [{"id": "news", "type": "remote", "url": "http://news.invalid/"}],
        "panes": [{"fallback": "news"}]
    }"#;

    fn write(dir: &tempfile::TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("kiosk.json");
        std::fs::write(&path, text).expect("write config");
        path
    }

    #[test]
    fn valid_change_is_published() {
        let dir = tempfile::tempdir().expect("tempdir");
        let initial = Arc::new(KioskConfig::from_json(CONFIG).expect("config"));
        let (tx, rx) = watch::channel(initial);

        let path = write(&dir, &CONFIG.replace("news.invalid", "news2.invalid"));
        assert!(reload(&path, &tx));
        assert!(rx.has_changed().expect("open"));
        assert_eq!(rx.borrow().sources.len(), 1);

        // Same content again: nothing to publish.
        assert!(!reload(&path, &tx));
    }

    #[test]
    fn invalid_file_keeps_current() {
        let dir = tempfile::tempdir().expect("tempdir");
        let initial = Arc::new(KioskConfig::from_json(CONFIG).expect("config"));
        let (tx, rx) = watch::channel(Arc::clone(&initial));

        let path = write(&dir, r#"{"sources": [], "panes": []}"#);
        assert!(!reload(&path, &tx));
        let path = write(&dir, "{ not json");
        assert!(!reload(&path, &tx));
        assert!(!rx.has_changed().expect("open"));
        assert_eq!(**rx.borrow(), *initial);
    }

    #[test]
    fn only_writes_to_the_config_file_count() {
        let path = PathBuf::from("/etc/kiosk/kiosk.json");
        let modify = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.clone());
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        let other = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/etc/kiosk/kiosk.json.swp"));
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());

        assert!(touches(&modify, &path));
        assert!(touches(&create, &path));
        assert!(!touches(&other, &path));
        assert!(!touches(&remove, &path));
    }
}
