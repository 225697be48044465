//! Native window discovery: which window belongs to a launched app.
//!
//! Pure scoring over host snapshots (window list + process table). The
//! runtime polls the host and asks these functions to pick.

use std::collections::{HashSet, VecDeque};

use regex::{Regex, RegexBuilder};

use kiosk_core::types::NativeAppSpec;
use kiosk_core::{ProcessMap, WindowId, WindowInfo};

use crate::error::SessionError;

/// Compiled window patterns of one native app source.
#[derive(Debug, Clone)]
pub struct WindowMatcher {
    title: Option<Regex>,
    class: Option<Regex>,
    child_class: Option<Regex>,
    child_title: Option<Regex>,
    expected_exe: String,
}

/// Window patterns match case-insensitively.
fn compile(field: &'static str, pattern: Option<&String>) -> Result<Option<Regex>, SessionError> {
    pattern
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|source| SessionError::Pattern { field, source })
        })
        .transpose()
}

impl WindowMatcher {
    pub fn new(spec: &NativeAppSpec) -> Result<Self, SessionError> {
        Ok(Self {
            title: compile("window_title_pattern", spec.window_title_pattern.as_ref())?,
            class: compile("window_class_pattern", spec.window_class_pattern.as_ref())?,
            child_class: compile(
                "child_window_class_pattern",
                spec.child_window_class_pattern.as_ref(),
            )?,
            child_title: compile(
                "child_window_title_pattern",
                spec.child_window_title_pattern.as_ref(),
            )?,
            expected_exe: spec.expected_exe(),
        })
    }

    /// Title and class patterns (each only when configured).
    pub fn matches(&self, window: &WindowInfo) -> bool {
        self.title.as_ref().is_none_or(|re| re.is_match(&window.title))
            && self.class.as_ref().is_none_or(|re| re.is_match(&window.class))
    }

    /// The owning process runs the configured executable. Windows of
    /// unknown processes never pass.
    pub fn exe_matches(&self, window: &WindowInfo, processes: &ProcessMap) -> bool {
        window
            .pid
            .and_then(|pid| processes.get(&pid))
            .is_some_and(|p| p.exe_name() == self.expected_exe)
    }

    /// Best pattern-matching window owned by one of `pids`.
    ///
    /// Candidates are scored by title length, plus 5 when the window has a
    /// class; ties go to the lowest window id.
    pub fn pick_window(
        &self,
        windows: &[WindowInfo],
        pids: &HashSet<u32>,
        processes: &ProcessMap,
    ) -> Option<WindowId> {
        best_scored(windows.iter().filter(|w| {
            w.pid.is_some_and(|pid| pids.contains(&pid))
                && self.exe_matches(w, processes)
                && self.matches(w)
        }))
    }

    /// Imprecise last resort after the primary search timed out.
    ///
    /// First any window of the process tree that did not exist before launch,
    /// patterns ignored. Then a pattern-matching window of any process
    /// running the expected executable.
    pub fn pick_global(
        &self,
        windows: &[WindowInfo],
        pre_existing: &HashSet<WindowId>,
        pids: &HashSet<u32>,
        processes: &ProcessMap,
    ) -> Option<WindowId> {
        best_scored(windows.iter().filter(|w| {
            !pre_existing.contains(&w.id) && w.pid.is_some_and(|pid| pids.contains(&pid))
        }))
        .or_else(|| {
            best_scored(
                windows
                    .iter()
                    .filter(|w| self.exe_matches(w, processes) && self.matches(w)),
            )
        })
    }

    /// Preferred child of the top-level window to embed instead of the
    /// frame. Only used when a child pattern is configured.
    ///
    /// Class match scores 100, title match 50, plus up to 50 for title
    /// length. A child must match at least one pattern.
    pub fn pick_child(&self, children: &[WindowInfo]) -> Option<WindowId> {
        if self.child_class.is_none() && self.child_title.is_none() {
            return None;
        }
        children
            .iter()
            .filter_map(|w| {
                let class_hit = self.child_class.as_ref().is_some_and(|re| re.is_match(&w.class));
                let title_hit = self.child_title.as_ref().is_some_and(|re| re.is_match(&w.title));
                if !class_hit && !title_hit {
                    return None;
                }
                let score = u32::from(class_hit) * 100
                    + u32::from(title_hit) * 50
                    + w.title.chars().count().min(50) as u32;
                Some((score, std::cmp::Reverse(w.id), w.id))
            })
            .max()
            .map(|(_, _, id)| id)
    }
}

fn best_scored<'a>(candidates: impl Iterator<Item = &'a WindowInfo>) -> Option<WindowId> {
    candidates
        .map(|w| {
            let score = w.title.chars().count() + if w.class.is_empty() { 0 } else { 5 };
            (score, std::cmp::Reverse(w.id), w.id)
        })
        .max()
        .map(|(_, _, id)| id)
}

/// `root` plus every transitive child in the process table.
pub fn process_tree(root: u32, processes: &ProcessMap) -> HashSet<u32> {
    let mut tree = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(parent) = queue.pop_front() {
        for p in processes.values() {
            if p.ppid == parent && p.pid != parent && tree.insert(p.pid) {
                queue.push_back(p.pid);
            }
        }
    }
    tree
}
