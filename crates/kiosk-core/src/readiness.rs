//! Startup readiness gate.
//!
//! The terminal stays hidden until every assigned pane has rendered once or
//! the timeout elapses. Once ready, it stays ready for the rest of the
//! process lifetime.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::types::PaneIndex;

/// Per-pane "rendered at least once" record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadinessRecord {
    pub rendered_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyReason {
    AllRendered,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ReadinessTracker {
    started_ms: u64,
    timeout_ms: u64,
    /// `None` until the first desired state is known.
    assigned: Option<BTreeSet<PaneIndex>>,
    records: BTreeMap<PaneIndex, ReadinessRecord>,
    ready: Option<ReadyReason>,
}

impl ReadinessTracker {
    pub fn new(started_ms: u64, timeout_ms: u64) -> Self {
        Self {
            started_ms,
            timeout_ms,
            assigned: None,
            records: BTreeMap::new(),
            ready: None,
        }
    }

    /// Panes that currently have a source to render.
    pub fn set_assigned(&mut self, panes: impl IntoIterator<Item = PaneIndex>) {
        self.assigned = Some(panes.into_iter().collect());
    }

    /// Record a first successful render. Repeated reports keep the original
    /// timestamp.
    pub fn on_pane_rendered(&mut self, pane: PaneIndex, now_ms: u64) {
        self.records
            .entry(pane)
            .or_insert(ReadinessRecord {
                rendered_at_ms: now_ms,
            });
    }

    /// Advance the gate. Returns the reason exactly once, on the call that
    /// flips it to ready.
    pub fn evaluate(&mut self, now_ms: u64) -> Option<ReadyReason> {
        if self.ready.is_some() {
            return None;
        }
        let reason = if self.all_rendered() {
            ReadyReason::AllRendered
        } else if now_ms >= self.deadline_ms() {
            ReadyReason::TimedOut
        } else {
            return None;
        };
        self.ready = Some(reason);
        Some(reason)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_some()
    }

    pub fn reason(&self) -> Option<ReadyReason> {
        self.ready
    }

    pub fn deadline_ms(&self) -> u64 {
        self.started_ms.saturating_add(self.timeout_ms)
    }

    pub fn record(&self, pane: PaneIndex) -> Option<ReadinessRecord> {
        self.records.get(&pane).copied()
    }

    fn all_rendered(&self) -> bool {
        match &self.assigned {
            Some(assigned) => assigned.iter().all(|p| self.records.contains_key(p)),
            None => false,
        }
    }
}
