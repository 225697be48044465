//! Configuration error taxonomy.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{PaneIndex, SourceId};

/// A malformed or contradictory configuration. Always rejects the whole
/// document; nothing is partially applied.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("at least one pane must be configured")]
    NoPanes,

    #[error("source id must not be empty (source #{position})")]
    EmptySourceId { position: usize },

    #[error("duplicate source id: {0}")]
    DuplicateSource(SourceId),

    #[error("source {source_id}: {detail}")]
    InvalidSource { source_id: SourceId, detail: String },

    #[error("source {source_id}: invalid {field}: {detail}")]
    InvalidPattern {
        source_id: SourceId,
        field: &'static str,
        detail: String,
    },

    #[error("unknown source {source_id} referenced by {context}")]
    UnknownSource { source_id: SourceId, context: String },

    #[error("duplicate rotation name: {0}")]
    DuplicateRotation(String),

    #[error("rotation {rotation} entry #{entry}: pane {pane} out of range (pane count {pane_count})")]
    PaneOutOfRange {
        rotation: String,
        entry: usize,
        pane: PaneIndex,
        pane_count: usize,
    },

    #[error("invalid clock time {0:?}, expected HH:MM")]
    InvalidClockTime(String),

    #[error("invalid weekday {0:?}")]
    InvalidWeekday(String),

    #[error("rotation entry needs both start and end, or all_day")]
    MissingWindow,
}
