//! Pure schedule resolution: `(schedule, now) -> desired pane mapping`.
//!
//! Overlapping entries for one pane are resolved by a total order:
//! narrowest active window first, then earlier rotation, then earlier entry
//! inside the rotation. Every overlap is reported as a [`ScheduleConflict`].
//!
//! Native applications own a single window, so an exclusive source can only
//! be desired by one pane. The lowest pane index keeps it; any other pane
//! drops to its static fallback and an exclusive-source conflict is reported.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::schedule::{ActiveWindow, Schedule};
use crate::types::{PaneIndex, SourceId};

/// Scheduler output: the source each pane should show. Panes with neither an
/// active entry nor a fallback are absent.
pub type DesiredState = BTreeMap<PaneIndex, SourceId>;

// ─── Candidates & conflicts ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum CandidateOrigin {
    Rotation {
        rotation: String,
        rotation_pos: usize,
        entry_pos: usize,
        window: ActiveWindow,
    },
    Fallback,
}

/// A source competing for a pane, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub source: SourceId,
    #[serde(flatten)]
    pub origin: CandidateOrigin,
}

impl Candidate {
    fn fallback(source: SourceId) -> Self {
        Self {
            source,
            origin: CandidateOrigin::Fallback,
        }
    }

    /// Tie-break key; smaller wins.
    fn rank(&self) -> (u32, usize, usize) {
        match &self.origin {
            CandidateOrigin::Rotation {
                rotation_pos,
                entry_pos,
                window,
                ..
            } => (window.duration_minutes(), *rotation_pos, *entry_pos),
            CandidateOrigin::Fallback => (u32::MAX, usize::MAX, usize::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictKind {
    /// Several active entries target the same pane.
    OverlappingEntries,
    /// The winning source is already shown by a lower pane.
    ExclusiveSource { holder: PaneIndex },
}

/// A resolved ambiguity. Reported for diagnostics only, never stored as
/// authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleConflict {
    pub pane: PaneIndex,
    pub at: NaiveDateTime,
    #[serde(flatten)]
    pub kind: ConflictKind,
    /// Competing candidates, best first.
    pub competing: Vec<Candidate>,
    pub winner: Option<Candidate>,
}

impl ScheduleConflict {
    /// Identity of the conflict ignoring the timestamp, so a loop can log a
    /// persisting conflict once instead of on every tick.
    pub fn key(&self) -> (PaneIndex, ConflictKind, Vec<SourceId>) {
        (
            self.pane,
            self.kind,
            self.competing.iter().map(|c| c.source.clone()).collect(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub desired: DesiredState,
    pub conflicts: Vec<ScheduleConflict>,
}

// ─── Resolve ─────────────────────────────────────────────────────

/// Resolve the desired source of every pane at `now`.
///
/// Pure: identical inputs give identical mapping and conflict list.
pub fn resolve(schedule: &Schedule, now: NaiveDateTime) -> Resolution {
    let mut per_pane: Vec<Vec<Candidate>> = vec![Vec::new(); schedule.pane_count()];

    for (rotation_pos, rotation) in schedule.rotations.iter().enumerate() {
        if !rotation.enabled {
            continue;
        }
        for (entry_pos, entry) in rotation.entries.iter().enumerate() {
            let Some(slot) = per_pane.get_mut(entry.pane) else {
                continue;
            };
            if entry.is_active(now) {
                slot.push(Candidate {
                    source: entry.source.clone(),
                    origin: CandidateOrigin::Rotation {
                        rotation: rotation.name.clone(),
                        rotation_pos,
                        entry_pos,
                        window: entry.window,
                    },
                });
            }
        }
    }

    let mut resolution = Resolution::default();
    // Exclusive source -> pane currently holding it.
    let mut held: HashMap<SourceId, PaneIndex> = HashMap::new();

    for (pane, mut candidates) in per_pane.into_iter().enumerate() {
        candidates.sort_by_key(Candidate::rank);

        let winner = match candidates.len() {
            0 => schedule.fallback(pane).cloned().map(Candidate::fallback),
            1 => candidates.first().cloned(),
            _ => {
                let winner = candidates.first().cloned();
                resolution.conflicts.push(ScheduleConflict {
                    pane,
                    at: now,
                    kind: ConflictKind::OverlappingEntries,
                    competing: candidates,
                    winner: winner.clone(),
                });
                winner
            }
        };
        let Some(winner) = winner else {
            continue;
        };

        let chosen = match exclusive_holder(schedule, &held, &winner.source) {
            None => Some(winner),
            Some(holder) => {
                let replacement = schedule
                    .fallback(pane)
                    .filter(|fb| exclusive_holder(schedule, &held, fb).is_none())
                    .cloned()
                    .map(Candidate::fallback);
                resolution.conflicts.push(ScheduleConflict {
                    pane,
                    at: now,
                    kind: ConflictKind::ExclusiveSource { holder },
                    competing: vec![winner],
                    winner: replacement.clone(),
                });
                replacement
            }
        };

        if let Some(chosen) = chosen {
            if schedule.exclusive.contains(&chosen.source) {
                held.insert(chosen.source.clone(), pane);
            }
            resolution.desired.insert(pane, chosen.source);
        }
    }

    resolution
}

fn exclusive_holder(
    schedule: &Schedule,
    held: &HashMap<SourceId, PaneIndex>,
    source: &SourceId,
) -> Option<PaneIndex> {
    if schedule.exclusive.contains(source) {
        held.get(source).copied()
    } else {
        None
    }
}

/// The next wall-clock minute after `now` at which any enabled entry can
/// change activity. `None` when the schedule has no time-dependent entry.
pub fn next_boundary(schedule: &Schedule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let mut edges: Vec<u16> = schedule
        .rotations
        .iter()
        .filter(|r| r.enabled)
        .flat_map(|r| r.entries.iter())
        .flat_map(|e| e.edges())
        .map(|t| t.minutes())
        .collect();
    edges.sort_unstable();
    edges.dedup();

    let current = crate::schedule::ClockTime::of(now).minutes();
    let (day, minute) = match edges.iter().find(|&&m| m > current) {
        Some(&m) => (now.date(), m),
        None => (now.date().succ_opt()?, *edges.first()?),
    };
    let time = NaiveTime::from_hms_opt(u32::from(minute / 60), u32::from(minute % 60), 0)?;
    Some(day.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{DayMask, Rotation, RotationEntry};
    use chrono::NaiveDate;
    use proptest::prelude::*;

    // 2024-01-01 is a Monday.
    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .expect("valid timestamp")
    }

    fn entry(pane: PaneIndex, source: &str, start: &str, end: &str) -> RotationEntry {
        RotationEntry {
            pane,
            source: source.into(),
            window: ActiveWindow::Span {
                start: start.parse().expect("start"),
                end: end.parse().expect("end"),
            },
            days: DayMask::ALL,
        }
    }

    fn rotation(name: &str, entries: Vec<RotationEntry>) -> Rotation {
        Rotation {
            name: name.to_string(),
            enabled: true,
            entries,
        }
    }

    fn fallbacks(ids: &[Option<&str>]) -> Vec<Option<SourceId>> {
        ids.iter().map(|id| id.map(SourceId::from)).collect()
    }

    // ── Basic resolution ────────────────────────────────────────

    #[test]
    fn no_entries_uses_fallback_without_conflict() {
        let schedule = Schedule::new(fallbacks(&[Some("a"), None]), Vec::new());
        let res = resolve(&schedule, at(1, 12, 0));
        assert_eq!(res.desired.get(&0), Some(&"a".into()));
        assert!(!res.desired.contains_key(&1));
        assert!(res.conflicts.is_empty());
    }

    #[test]
    fn single_active_entry_wins_over_fallback() {
        let schedule = Schedule::new(
            fallbacks(&[Some("a")]),
            vec![rotation("r", vec![entry(0, "b", "09:00", "10:00")])],
        );
        assert_eq!(resolve(&schedule, at(1, 9, 30)).desired[&0], "b".into());
        assert_eq!(resolve(&schedule, at(1, 10, 0)).desired[&0], "a".into());
    }

    #[test]
    fn disabled_rotation_is_ignored() {
        let mut r = rotation("r", vec![entry(0, "b", "00:00", "23:59")]);
        r.enabled = false;
        let schedule = Schedule::new(fallbacks(&[Some("a")]), vec![r]);
        assert_eq!(resolve(&schedule, at(1, 12, 0)).desired[&0], "a".into());
    }

    #[test]
    fn entries_for_missing_panes_are_skipped() {
        let schedule = Schedule::new(
            fallbacks(&[Some("a")]),
            vec![rotation("r", vec![entry(3, "b", "00:00", "23:59")])],
        );
        let res = resolve(&schedule, at(1, 12, 0));
        assert_eq!(res.desired.len(), 1);
    }

    // ── Tie-break ───────────────────────────────────────────────

    #[test]
    fn narrower_window_wins_overlap() {
        let schedule = Schedule::new(
            fallbacks(&[None]),
            vec![
                rotation("office", vec![entry(0, "wide", "08:00", "18:00")]),
                rotation("lunch", vec![entry(0, "narrow", "12:00", "13:00")]),
            ],
        );
        let res = resolve(&schedule, at(1, 12, 30));
        assert_eq!(res.desired[&0], "narrow".into());
        assert_eq!(res.conflicts.len(), 1);
        let conflict = &res.conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::OverlappingEntries);
        assert_eq!(conflict.competing.len(), 2);
        assert_eq!(conflict.competing[0].source, "narrow".into());
        assert_eq!(
            conflict.winner.as_ref().map(|c| &c.source),
            Some(&"narrow".into())
        );
    }

    #[test]
    fn equal_duration_prefers_earlier_rotation() {
        let schedule = Schedule::new(
            fallbacks(&[None]),
            vec![
                rotation("first", vec![entry(0, "x", "12:00", "14:00")]),
                rotation("second", vec![entry(0, "y", "11:00", "13:00")]),
            ],
        );
        assert_eq!(resolve(&schedule, at(1, 12, 30)).desired[&0], "x".into());
    }

    #[test]
    fn equal_duration_same_rotation_prefers_earlier_entry() {
        let schedule = Schedule::new(
            fallbacks(&[None]),
            vec![rotation(
                "only",
                vec![entry(0, "p", "12:00", "13:00"), entry(0, "q", "12:00", "13:00")],
            )],
        );
        assert_eq!(resolve(&schedule, at(1, 12, 30)).desired[&0], "p".into());
    }

    #[test]
    fn wrapping_window_competes_by_duration() {
        // 22:00-02:00 is 240 minutes; all-day is 1440.
        let mut all_day = entry(0, "day", "00:00", "00:00");
        all_day.window = ActiveWindow::AllDay;
        let schedule = Schedule::new(
            fallbacks(&[None]),
            vec![rotation("r", vec![all_day, entry(0, "night", "22:00", "02:00")])],
        );
        assert_eq!(resolve(&schedule, at(2, 1, 0)).desired[&0], "night".into());
        assert_eq!(resolve(&schedule, at(2, 3, 0)).desired[&0], "day".into());
    }

    // ── Exclusive sources ──────────────────────────────────────

    #[test]
    fn exclusive_source_goes_to_lowest_pane() {
        let schedule = Schedule::new(
            fallbacks(&[Some("a"), Some("b")]),
            vec![rotation(
                "r",
                vec![entry(1, "app", "08:00", "18:00"), entry(0, "app", "08:00", "18:00")],
            )],
        )
        .with_exclusive(["app".into()]);
        let res = resolve(&schedule, at(1, 9, 0));
        assert_eq!(res.desired[&0], "app".into());
        assert_eq!(res.desired[&1], "b".into());
        assert_eq!(res.conflicts.len(), 1);
        assert_eq!(res.conflicts[0].pane, 1);
        assert_eq!(
            res.conflicts[0].kind,
            ConflictKind::ExclusiveSource { holder: 0 }
        );
    }

    #[test]
    fn exclusive_loser_with_same_fallback_stays_empty() {
        let schedule = Schedule::new(
            fallbacks(&[None, Some("app")]),
            vec![rotation("r", vec![entry(0, "app", "08:00", "18:00")])],
        )
        .with_exclusive(["app".into()]);
        let res = resolve(&schedule, at(1, 9, 0));
        assert_eq!(res.desired.get(&0), Some(&"app".into()));
        assert!(!res.desired.contains_key(&1));
        assert!(res.conflicts[0].winner.is_none());
    }

    #[test]
    fn non_exclusive_source_may_repeat() {
        let schedule = Schedule::new(fallbacks(&[Some("web"), Some("web")]), Vec::new());
        let res = resolve(&schedule, at(1, 9, 0));
        assert_eq!(res.desired.len(), 2);
        assert!(res.conflicts.is_empty());
    }

    #[test]
    fn conflict_key_ignores_timestamp() {
        let schedule = Schedule::new(
            fallbacks(&[None]),
            vec![rotation(
                "r",
                vec![entry(0, "a", "08:00", "18:00"), entry(0, "b", "12:00", "13:00")],
            )],
        );
        let first = resolve(&schedule, at(1, 12, 10));
        let second = resolve(&schedule, at(1, 12, 40));
        assert_ne!(first.conflicts[0].at, second.conflicts[0].at);
        assert_eq!(first.conflicts[0].key(), second.conflicts[0].key());
    }

    // ── Boundaries ─────────────────────────────────────────────

    #[test]
    fn next_boundary_same_day_and_wrap() {
        let schedule = Schedule::new(
            fallbacks(&[None]),
            vec![rotation("r", vec![entry(0, "a", "08:00", "18:00")])],
        );
        assert_eq!(next_boundary(&schedule, at(1, 7, 59)), Some(at(1, 8, 0)));
        assert_eq!(next_boundary(&schedule, at(1, 8, 0)), Some(at(1, 18, 0)));
        assert_eq!(next_boundary(&schedule, at(1, 19, 0)), Some(at(2, 8, 0)));
    }

    #[test]
    fn next_boundary_none_without_timed_entries() {
        let schedule = Schedule::new(fallbacks(&[Some("a")]), Vec::new());
        assert_eq!(next_boundary(&schedule, at(1, 12, 0)), None);
    }

    #[test]
    fn weekday_mask_adds_midnight_boundary() {
        let mut e = entry(0, "a", "00:00", "00:00");
        e.window = ActiveWindow::AllDay;
        e.days = DayMask::from_days([chrono::Weekday::Tue]);
        let schedule = Schedule::new(fallbacks(&[None]), vec![rotation("r", vec![e])]);
        assert_eq!(next_boundary(&schedule, at(1, 15, 0)), Some(at(2, 0, 0)));
        assert!(resolve(&schedule, at(1, 15, 0)).desired.is_empty());
        assert_eq!(resolve(&schedule, at(2, 0, 0)).desired[&0], "a".into());
    }

    // ── Properties ─────────────────────────────────────────────

    fn arb_entry() -> impl Strategy<Value = RotationEntry> {
        (0usize..3, 0usize..4, 0u16..24, 0u16..24, 0u8..128, any::<bool>()).prop_map(
            |(pane, src, start, end, mask, all_day)| RotationEntry {
                pane,
                source: SourceId::new(format!("s{src}")),
                window: if all_day {
                    ActiveWindow::AllDay
                } else {
                    ActiveWindow::Span {
                        start: crate::schedule::ClockTime::new(start, 0).expect("hour"),
                        end: crate::schedule::ClockTime::new(end, 30).expect("hour"),
                    }
                },
                days: DayMask::from_days(
                    (0u8..7)
                        .filter(|i| mask & (1 << i) != 0)
                        .filter_map(|i| chrono::Weekday::try_from(i).ok()),
                ),
            },
        )
    }

    fn arb_schedule() -> impl Strategy<Value = Schedule> {
        (
            prop::collection::vec(prop::collection::vec(arb_entry(), 0..5), 0..4),
            prop::collection::vec(prop::option::of(0usize..4), 3),
            any::<bool>(),
        )
            .prop_map(|(rotations, fbs, exclusive)| {
                let rotations = rotations
                    .into_iter()
                    .enumerate()
                    .map(|(i, entries)| Rotation {
                        name: format!("r{i}"),
                        enabled: true,
                        entries,
                    })
                    .collect();
                let fallbacks = fbs
                    .into_iter()
                    .map(|f| f.map(|i| SourceId::new(format!("s{i}"))))
                    .collect();
                let schedule = Schedule::new(fallbacks, rotations);
                if exclusive {
                    schedule.with_exclusive([SourceId::from("s0")])
                } else {
                    schedule
                }
            })
    }

    proptest! {
        #[test]
        fn resolve_is_deterministic(schedule in arb_schedule(), day in 1u32..29, minute in 0u32..1440) {
            let now = at(day, minute / 60, minute % 60);
            prop_assert_eq!(resolve(&schedule, now), resolve(&schedule, now));
        }

        #[test]
        fn overlap_winner_has_narrowest_window(schedule in arb_schedule(), minute in 0u32..1440) {
            let now = at(3, minute / 60, minute % 60);
            for conflict in resolve(&schedule, now).conflicts {
                if conflict.kind != ConflictKind::OverlappingEntries {
                    continue;
                }
                let best = conflict.competing.iter().map(|c| c.rank().0).min();
                prop_assert_eq!(conflict.winner.map(|w| w.rank().0), best);
            }
        }

        #[test]
        fn exclusive_source_never_in_two_panes(schedule in arb_schedule(), minute in 0u32..1440) {
            let now = at(5, minute / 60, minute % 60);
            let res = resolve(&schedule, now);
            for source in &schedule.exclusive {
                let holders = res.desired.values().filter(|s| *s == source).count();
                prop_assert!(holders <= 1);
            }
        }
    }
}
