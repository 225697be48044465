//! Error types for the host boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{program} failed: {detail}")]
    CommandFailed { program: String, detail: String },

    #[error("{program} did not finish within {after_ms}ms")]
    TimedOut { program: String, after_ms: u64 },

    #[error("failed to parse {what} line {line_num}: {detail}")]
    ParseError {
        what: &'static str,
        line_num: usize,
        detail: String,
    },

    #[error("invalid arguments {args:?}: {detail}")]
    InvalidArgs { args: String, detail: String },

    #[error("failed to spawn {cmd}: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("host io error: {0}")]
    Io(#[from] std::io::Error),
}
