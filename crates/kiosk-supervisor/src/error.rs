//! Session failure taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionState;

/// Why a session reached `Failed`. Every variant is only surfaced after
/// local recovery (retry, reload, restart) was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[error("native window not found within timeout")]
    Discovery,
    #[error("process failed to spawn")]
    Process,
    #[error("content liveness lost")]
    ContentLiveness,
    #[error("window could not be embedded")]
    Embedding,
    #[error("restart ceiling reached")]
    RestartCeiling,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("event {event} not valid in state {state:?}")]
    InvalidTransition {
        state: SessionState,
        event: &'static str,
    },

    #[error("invalid window pattern {field}: {source}")]
    Pattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}
