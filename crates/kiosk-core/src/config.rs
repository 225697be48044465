//! Kiosk configuration document: sources, panes, rotations and tuning.
//!
//! Parsing and validation are all-or-nothing. A document that fails any
//! check is rejected as a whole so a hot reload never half-applies.

use std::collections::HashSet;
use std::path::Path;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::SourceRegistry;
use crate::schedule::{Rotation, Schedule};
use crate::types::{PaneConfig, Source, SourceKind};

// ─── Tuning ──────────────────────────────────────────────────────

/// Restart ceiling and backoff for a pane session.
///
/// At most `ceiling` restarts are attempted within the sliding
/// `window_ms`; the next failure is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Maximum restarts inside the window (default 5).
    pub ceiling: u32,
    /// Initial backoff delay in milliseconds (default 1000).
    pub initial_backoff_ms: u64,
    /// Backoff multiplier per attempt (default 2.0).
    pub multiplier: f64,
    /// Maximum backoff delay in milliseconds (default 30000).
    pub max_backoff_ms: u64,
    /// Sliding window for restart counting (default 600_000 = 10min).
    pub window_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            ceiling: 5,
            initial_backoff_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
            window_ms: 600_000,
        }
    }
}

/// Every timer, interval and retry bound used by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub schedule_poll_ms: u64,
    /// Grace period after spawning before the first window search.
    pub launch_settle_ms: u64,
    pub search_timeout_ms: u64,
    pub search_poll_ms: u64,
    pub search_log_interval_ms: u64,
    pub global_fallback_timeout_ms: u64,
    pub embed_attempts: u32,
    pub embed_backoff_ms: u64,
    /// Forced re-asserts after each geometry change.
    pub resize_retries: u32,
    pub resize_retry_ms: u64,
    /// Process / window liveness check interval for native apps.
    pub liveness_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub heartbeat_failure_threshold: u32,
    pub readiness_timeout_ms: u64,
    pub terminate_grace_ms: u64,
    pub restart: RestartPolicy,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            schedule_poll_ms: 1_000,
            launch_settle_ms: 600,
            search_timeout_ms: 30_000,
            search_poll_ms: 150,
            search_log_interval_ms: 2_500,
            global_fallback_timeout_ms: 5_000,
            embed_attempts: 3,
            embed_backoff_ms: 200,
            resize_retries: 3,
            resize_retry_ms: 120,
            liveness_interval_ms: 5_000,
            connect_timeout_ms: 15_000,
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 3_000,
            heartbeat_failure_threshold: 3,
            readiness_timeout_ms: 20_000,
            terminate_grace_ms: 3_000,
            restart: RestartPolicy::default(),
        }
    }
}

// ─── Document ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KioskConfig {
    pub sources: Vec<Source>,
    pub panes: Vec<PaneConfig>,
    #[serde(default)]
    pub rotations: Vec<Rotation>,
    #[serde(default)]
    pub tuning: Tuning,
}

impl KioskConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.panes.is_empty() {
            return Err(ConfigError::NoPanes);
        }

        let mut ids = HashSet::new();
        for (position, source) in self.sources.iter().enumerate() {
            if source.id.as_str().trim().is_empty() {
                return Err(ConfigError::EmptySourceId { position });
            }
            if !ids.insert(&source.id) {
                return Err(ConfigError::DuplicateSource(source.id.clone()));
            }
            validate_source(source)?;
        }

        for (pane, cfg) in self.panes.iter().enumerate() {
            if let Some(ref fallback) = cfg.fallback
                && !ids.contains(fallback)
            {
                return Err(ConfigError::UnknownSource {
                    source_id: fallback.clone(),
                    context: format!("pane {pane} fallback"),
                });
            }
        }

        let mut names = HashSet::new();
        for rotation in &self.rotations {
            if !names.insert(rotation.name.as_str()) {
                return Err(ConfigError::DuplicateRotation(rotation.name.clone()));
            }
            for (idx, entry) in rotation.entries.iter().enumerate() {
                if entry.pane >= self.panes.len() {
                    return Err(ConfigError::PaneOutOfRange {
                        rotation: rotation.name.clone(),
                        entry: idx,
                        pane: entry.pane,
                        pane_count: self.panes.len(),
                    });
                }
                if !ids.contains(&entry.source) {
                    return Err(ConfigError::UnknownSource {
                        source_id: entry.source.clone(),
                        context: format!("rotation {} entry #{idx}", rotation.name),
                    });
                }
            }
        }

        Ok(())
    }

    /// Source catalogue for this configuration.
    pub fn registry(&self) -> SourceRegistry {
        SourceRegistry::new(self.sources.clone())
    }

    /// Scheduler input derived from panes and rotations. Native app sources
    /// are exclusive: one window can only live in one pane.
    pub fn schedule(&self) -> Schedule {
        let fallbacks = self.panes.iter().map(|p| p.fallback.clone()).collect();
        let exclusive = self
            .sources
            .iter()
            .filter(|s| s.is_native())
            .map(|s| s.id.clone());
        Schedule::new(fallbacks, self.rotations.clone()).with_exclusive(exclusive)
    }
}

fn validate_source(source: &Source) -> Result<(), ConfigError> {
    let invalid = |detail: &str| ConfigError::InvalidSource {
        source_id: source.id.clone(),
        detail: detail.to_owned(),
    };
    match &source.kind {
        SourceKind::Remote(remote) => {
            if remote.url.trim().is_empty() {
                return Err(invalid("remote source needs a url"));
            }
        }
        SourceKind::NativeApp(app) => {
            if app.launch_cmd.trim().is_empty() {
                return Err(invalid("native app needs a launch_cmd"));
            }
            // Unbalanced quotes would only surface at launch time otherwise.
            if let Err(e) = shell_words::split(&app.args) {
                return Err(invalid(&format!("args: {e}")));
            }
            let patterns = [
                ("window_title_pattern", &app.window_title_pattern),
                ("window_class_pattern", &app.window_class_pattern),
                ("child_window_class_pattern", &app.child_window_class_pattern),
                ("child_window_title_pattern", &app.child_window_title_pattern),
            ];
            for (field, pattern) in patterns {
                if let Some(p) = pattern
                    && let Err(e) = RegexBuilder::new(p).case_insensitive(true).build()
                {
                    return Err(ConfigError::InvalidPattern {
                        source_id: source.id.clone(),
                        field,
                        detail: e.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}
