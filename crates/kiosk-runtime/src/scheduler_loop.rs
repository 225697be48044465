//! Scheduler driver: re-resolves the desired state on a coarse poll, at the
//! next active-window boundary, and whenever the configuration changes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kiosk_core::scheduler::ConflictKind;
use kiosk_core::{
    KioskConfig, PaneIndex, Resolution, ScheduleConflict, SourceId, next_boundary, resolve,
};

use crate::worker::ms;

/// Wall clock the schedule is evaluated against.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub fn local_clock() -> Clock {
    Arc::new(|| chrono::Local::now().naive_local())
}

type ConflictKey = (PaneIndex, ConflictKind, Vec<SourceId>);

pub async fn run_scheduler(
    mut config_rx: watch::Receiver<Arc<KioskConfig>>,
    desired_tx: watch::Sender<Arc<Resolution>>,
    clock: Clock,
    cancel: CancellationToken,
) {
    let mut config = config_rx.borrow_and_update().clone();
    let mut schedule = config.schedule();
    let mut logged: HashSet<ConflictKey> = HashSet::new();

    loop {
        let now = clock();
        publish(&desired_tx, resolve(&schedule, now), &mut logged);

        let poll = ms(config.tuning.schedule_poll_ms.max(1));
        let wait = next_boundary(&schedule, now)
            .and_then(|at| (at - now).to_std().ok())
            .map_or(poll, |until| until.min(poll));

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                config = config_rx.borrow_and_update().clone();
                schedule = config.schedule();
                info!(rotations = schedule.rotations.len(), panes = schedule.pane_count(), "schedule reloaded");
            }
            () = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
        }
    }
}

/// Publish when the mapping or the set of conflicts changed. Returns whether
/// subscribers were notified.
fn publish(
    desired_tx: &watch::Sender<Arc<Resolution>>,
    resolution: Resolution,
    logged: &mut HashSet<ConflictKey>,
) -> bool {
    log_new_conflicts(&resolution.conflicts, logged);
    desired_tx.send_if_modified(|current| {
        let same_conflicts = conflict_keys(&current.conflicts) == conflict_keys(&resolution.conflicts);
        if current.desired == resolution.desired && same_conflicts {
            return false;
        }
        if current.desired != resolution.desired {
            info!(desired = ?resolution.desired, "desired state changed");
        }
        *current = Arc::new(resolution);
        true
    })
}

fn conflict_keys(conflicts: &[ScheduleConflict]) -> Vec<ConflictKey> {
    conflicts.iter().map(ScheduleConflict::key).collect()
}

/// Log each distinct conflict once while it persists. A conflict that
/// disappears and comes back is logged again.
fn log_new_conflicts(conflicts: &[ScheduleConflict], logged: &mut HashSet<ConflictKey>) {
    let current: HashSet<ConflictKey> = conflicts.iter().map(ScheduleConflict::key).collect();
    for conflict in conflicts {
        if logged.contains(&conflict.key()) {
            continue;
        }
        let competing: Vec<&str> = conflict
            .competing
            .iter()
            .map(|c| c.source.as_str())
            .collect();
        warn!(
            pane = conflict.pane,
            at = %conflict.at,
            kind = ?conflict.kind,
            ?competing,
            winner = conflict.winner.as_ref().map(|w| w.source.as_str()),
            "schedule conflict"
        );
    }
    *logged = current;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    const CONFIG: &str = r#"{
        "sources": [
            {"id": "news", "type": "remote", "url": "http://news.invalid/"},
            {"id": "day", "type": "remote", "url": "http://day.invalid/"},
            {"id": "lunch", "type": "remote", "url": "http://lunch.invalid/"}
        ],
        "panes": [{"fallback": "news"}],
        "rotations": [
            {"name": "office", "entries": [
                {"pane": 0, "source": "day", "start": "08:00", "end": "18:00"}
            ]},
            {"name": "canteen", "entries": [
                {"pane": 0, "source": "lunch", "start": "12:00", "end": "13:00"}
            ]}
        ]
    }"#;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .expect("valid timestamp")
    }

    struct Harness {
        now: Arc<Mutex<NaiveDateTime>>,
        config_tx: watch::Sender<Arc<KioskConfig>>,
        desired_rx: watch::Receiver<Arc<Resolution>>,
        cancel: CancellationToken,
    }

    fn start(config: &str, now: NaiveDateTime) -> Harness {
        let now = Arc::new(Mutex::new(now));
        let clock: Clock = {
            let now = Arc::clone(&now);
            Arc::new(move || *now.lock().expect("clock"))
        };
        let config = Arc::new(KioskConfig::from_json(config).expect("config"));
        let (config_tx, config_rx) = watch::channel(config);
        let (desired_tx, desired_rx) = watch::channel(Arc::new(Resolution::default()));
        let cancel = CancellationToken::new();
        tokio::spawn(run_scheduler(config_rx, desired_tx, clock, cancel.clone()));
        Harness {
            now,
            config_tx,
            desired_rx,
            cancel,
        }
    }

    impl Harness {
        async fn next(&mut self) -> Arc<Resolution> {
            tokio::time::timeout(Duration::from_secs(60), self.desired_rx.changed())
                .await
                .expect("published in time")
                .expect("scheduler alive");
            self.desired_rx.borrow_and_update().clone()
        }

        fn set_clock(&self, now: NaiveDateTime) {
            *self.now.lock().expect("clock") = now;
        }
    }

    fn source_of(resolution: &Resolution, pane: PaneIndex) -> Option<&str> {
        resolution.desired.get(&pane).map(SourceId::as_str)
    }

    #[tokio::test(start_paused = true)]
    async fn follows_the_clock_across_boundaries() {
        let mut h = start(CONFIG, at(7, 59, 30));
        assert_eq!(source_of(&*h.next().await, 0), Some("news"));

        h.set_clock(at(8, 0, 0));
        assert_eq!(source_of(&*h.next().await, 0), Some("day"));

        // Overlap: the narrower lunch window wins and the conflict is published.
        h.set_clock(at(12, 30, 0));
        let r = h.next().await;
        assert_eq!(source_of(&*r, 0), Some("lunch"));
        assert_eq!(r.conflicts.len(), 1);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_resolution_is_not_republished() {
        let mut h = start(CONFIG, at(10, 0, 0));
        h.next().await;
        h.set_clock(at(10, 0, 5));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!h.desired_rx.has_changed().expect("scheduler alive"));
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn config_change_is_applied_immediately() {
        let mut h = start(CONFIG, at(20, 0, 0));
        assert_eq!(source_of(&*h.next().await, 0), Some("news"));

        let edited = CONFIG.replace(r#"[{"fallback": "news"}]"#, r#"[{"fallback": "day"}]"#);
        h.config_tx
            .send_replace(Arc::new(KioskConfig::from_json(&edited).expect("config")));
        assert_eq!(source_of(&*h.next().await, 0), Some("day"));
        h.cancel.cancel();
    }

    #[test]
    fn persisting_conflict_logged_once() {
        let config = KioskConfig::from_json(CONFIG).expect("config");
        let schedule = config.schedule();
        let mut logged = HashSet::new();
        let (tx, _rx) = watch::channel(Arc::new(Resolution::default()));

        assert!(publish(&tx, resolve(&schedule, at(12, 10, 0)), &mut logged));
        assert_eq!(logged.len(), 1);
        // Same conflict one tick later: different timestamp, same key.
        assert!(!publish(&tx, resolve(&schedule, at(12, 10, 1)), &mut logged));
        assert_eq!(logged.len(), 1);
        // Resolved: forgotten.
        assert!(publish(&tx, resolve(&schedule, at(14, 0, 0)), &mut logged));
        assert!(logged.is_empty());
    }
}
