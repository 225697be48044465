//! kiosk-core: data model and pure decision logic for the pane orchestrator.
//! Source catalogue, rotation schedule, scheduler resolution, readiness
//! gating and heartbeat health. No async, no process or window IO.

pub mod config;
pub mod error;
pub mod health;
pub mod readiness;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod types;

pub use config::{KioskConfig, RestartPolicy, Tuning};
pub use error::ConfigError;
pub use health::{HeartbeatMonitor, HeartbeatPolicy, HeartbeatVerdict, ProbeOutcome};
pub use readiness::{ReadinessTracker, ReadyReason};
pub use registry::SourceRegistry;
pub use schedule::Schedule;
pub use scheduler::{DesiredState, Resolution, ScheduleConflict, next_boundary, resolve};
pub use types::{
    Geometry, PaneIndex, Placement, ProcessInfo, ProcessMap, Source, SourceId, SourceKind,
    WindowId, WindowInfo,
};
