//! Reconcile planning: diff live sessions against desired state.

use std::collections::{BTreeMap, BTreeSet};

use kiosk_core::{DesiredState, PaneIndex, SourceId};

/// One pane-level action. Panes whose source is unchanged produce nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneChange {
    Start { pane: PaneIndex, source: SourceId },
    Stop { pane: PaneIndex, source: SourceId },
    /// Tear down `from` completely, then start `to`.
    Replace {
        pane: PaneIndex,
        from: SourceId,
        to: SourceId,
    },
}

impl PaneChange {
    pub fn pane(&self) -> PaneIndex {
        match self {
            Self::Start { pane, .. } | Self::Stop { pane, .. } | Self::Replace { pane, .. } => *pane,
        }
    }
}

/// Plan the changes that turn `live` into `desired`.
///
/// Sources listed in `rebuild` changed definition on reload; a pane running
/// one of them is replaced even though its id is unchanged.
pub fn plan(
    live: &BTreeMap<PaneIndex, SourceId>,
    desired: &DesiredState,
    rebuild: &BTreeSet<SourceId>,
) -> Vec<PaneChange> {
    let panes: BTreeSet<PaneIndex> = live.keys().chain(desired.keys()).copied().collect();
    panes
        .into_iter()
        .filter_map(|pane| match (live.get(&pane), desired.get(&pane)) {
            (None, Some(to)) => Some(PaneChange::Start {
                pane,
                source: to.clone(),
            }),
            (Some(from), None) => Some(PaneChange::Stop {
                pane,
                source: from.clone(),
            }),
            (Some(from), Some(to)) if from != to || rebuild.contains(to) => {
                Some(PaneChange::Replace {
                    pane,
                    from: from.clone(),
                    to: to.clone(),
                })
            }
            _ => None,
        })
        .collect()
}

// ─── Fallback overrides ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Override {
    /// Scheduler-desired source that failed.
    failed: SourceId,
    fallback: SourceId,
}

/// Scheduler-independent fallbacks installed after a session fails.
///
/// An override replaces the failed source with the pane's static fallback
/// for as long as the scheduler keeps asking for the failed source.
#[derive(Debug, Clone, Default)]
pub struct FallbackOverrides {
    overrides: BTreeMap<PaneIndex, Override>,
}

impl FallbackOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed session. Returns the fallback the pane switches to, or
    /// `None` if the pane must show a placeholder: no fallback, the fallback
    /// is the failed source, or the fallback itself just failed.
    pub fn on_failed(
        &mut self,
        pane: PaneIndex,
        failed: &SourceId,
        fallback: Option<&SourceId>,
    ) -> Option<SourceId> {
        if let Some(existing) = self.overrides.get(&pane)
            && existing.fallback == *failed
        {
            return None;
        }
        let fallback = fallback.filter(|fb| *fb != failed)?;
        self.overrides.insert(
            pane,
            Override {
                failed: failed.clone(),
                fallback: fallback.clone(),
            },
        );
        Some(fallback.clone())
    }

    /// Apply overrides to the scheduler's mapping, dropping any whose failed
    /// source is no longer desired. `exclusive` sources already shown by
    /// another pane are not duplicated.
    pub fn apply(&mut self, desired: &DesiredState, exclusive: &BTreeSet<SourceId>) -> DesiredState {
        self.overrides
            .retain(|pane, o| desired.get(pane) == Some(&o.failed));

        let mut effective = desired.clone();
        for (pane, o) in &self.overrides {
            let taken = exclusive.contains(&o.fallback)
                && effective
                    .iter()
                    .any(|(p, s)| p != pane && *s == o.fallback);
            if taken {
                effective.remove(pane);
            } else {
                effective.insert(*pane, o.fallback.clone());
            }
        }
        effective
    }

    pub fn is_overridden(&self, pane: PaneIndex) -> bool {
        self.overrides.contains_key(&pane)
    }

    /// Forget overrides for panes at or beyond `pane_count`.
    pub fn truncate(&mut self, pane_count: usize) {
        self.overrides.retain(|pane, _| *pane < pane_count);
    }
}
