//! kiosk-supervisor: per-pane session lifecycle as pure state machines.
//! Session transitions, restart ceiling and backoff, reconcile planning,
//! fallback overrides and native window discovery scoring. All time values
//! are passed in; the async runtime drives these with real IO.

pub mod discovery;
pub mod error;
pub mod reconcile;
pub mod restart;
pub mod session;

pub use discovery::{WindowMatcher, process_tree};
pub use error::{FailureKind, SessionError};
pub use reconcile::{FallbackOverrides, PaneChange, plan};
pub use restart::{RestartDecision, RestartTracker};
pub use session::{Directive, EmbeddingSession, SessionEvent, SessionKind, SessionState, Transition};
