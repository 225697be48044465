//! Remote content heartbeat finite state machine.
//!
//! Pure and side-effect free. The [`transition_heartbeat`] function is the
//! single entry point for all state changes; callers perform the reload or
//! restart the returned verdict asks for.
//!
//! ```text
//! Healthy --fail--> Degraded --fail x threshold--> Reloading
//!    ^                 |                              |
//!    +------ok---------+            ok (Recovered) ---+--- fail --> Unhealthy
//! ```

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatPhase {
    #[default]
    Healthy,
    Degraded,
    /// A silent reload was issued; the next probe decides.
    Reloading,
    /// Reload did not restore liveness. Terminal until [`HeartbeatHealth::reset`].
    Unhealthy,
}

/// Result of one liveness probe against loaded content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
    Timeout,
}

impl ProbeOutcome {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// What the session driver should do after a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    Healthy,
    /// Failing, still under the threshold. Keep probing.
    Degraded { consecutive_failures: u32 },
    /// Threshold reached: reload content silently, then probe again.
    Reload,
    /// The reload restored liveness.
    Recovered,
    /// The reload did not help: escalate to a visible restart.
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Consecutive failures that trigger a silent reload.
    pub failure_threshold: u32,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatHealth {
    pub phase: HeartbeatPhase,
    pub consecutive_failures: u32,
    /// Silent reloads issued over the lifetime of the session.
    pub reloads: u32,
}

impl HeartbeatHealth {
    pub fn reset(&mut self) {
        self.phase = HeartbeatPhase::Healthy;
        self.consecutive_failures = 0;
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Pure state machine: next heartbeat state and verdict for a probe outcome.
#[must_use]
pub fn transition_heartbeat(
    previous: &HeartbeatHealth,
    outcome: ProbeOutcome,
    policy: &HeartbeatPolicy,
) -> (HeartbeatHealth, HeartbeatVerdict) {
    // Threshold of 0 would reload on the first probe; treat it as 1.
    let threshold = policy.failure_threshold.max(1);
    let mut next = previous.clone();

    if previous.phase == HeartbeatPhase::Unhealthy {
        return (next, HeartbeatVerdict::Unhealthy);
    }

    if outcome.is_success() {
        let verdict = if previous.phase == HeartbeatPhase::Reloading {
            HeartbeatVerdict::Recovered
        } else {
            HeartbeatVerdict::Healthy
        };
        next.phase = HeartbeatPhase::Healthy;
        next.consecutive_failures = 0;
        return (next, verdict);
    }

    next.consecutive_failures = previous.consecutive_failures.saturating_add(1);
    let verdict = match previous.phase {
        HeartbeatPhase::Reloading => {
            next.phase = HeartbeatPhase::Unhealthy;
            HeartbeatVerdict::Unhealthy
        }
        _ if next.consecutive_failures >= threshold => {
            next.phase = HeartbeatPhase::Reloading;
            next.reloads = previous.reloads.saturating_add(1);
            HeartbeatVerdict::Reload
        }
        _ => {
            next.phase = HeartbeatPhase::Degraded;
            HeartbeatVerdict::Degraded {
                consecutive_failures: next.consecutive_failures,
            }
        }
    };
    (next, verdict)
}

/// Convenience wrapper owning the state between probes.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMonitor {
    policy: HeartbeatPolicy,
    health: HeartbeatHealth,
}

impl HeartbeatMonitor {
    pub fn new(policy: HeartbeatPolicy) -> Self {
        Self {
            policy,
            health: HeartbeatHealth::default(),
        }
    }

    pub fn observe(&mut self, outcome: ProbeOutcome) -> HeartbeatVerdict {
        let (next, verdict) = transition_heartbeat(&self.health, outcome, &self.policy);
        self.health = next;
        verdict
    }

    pub fn health(&self) -> &HeartbeatHealth {
        &self.health
    }

    pub fn reset(&mut self) {
        self.health.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(threshold: u32) -> HeartbeatMonitor {
        HeartbeatMonitor::new(HeartbeatPolicy {
            failure_threshold: threshold,
        })
    }

    #[test]
    fn below_threshold_then_success_stays_healthy() {
        let mut m = monitor(3);
        assert_eq!(
            m.observe(ProbeOutcome::Failure),
            HeartbeatVerdict::Degraded {
                consecutive_failures: 1
            }
        );
        assert_eq!(
            m.observe(ProbeOutcome::Timeout),
            HeartbeatVerdict::Degraded {
                consecutive_failures: 2
            }
        );
        assert_eq!(m.observe(ProbeOutcome::Success), HeartbeatVerdict::Healthy);
        assert_eq!(m.health().consecutive_failures, 0);
        assert_eq!(m.health().reloads, 0);
    }

    #[test]
    fn threshold_triggers_reload_then_unhealthy() {
        let mut m = monitor(3);
        m.observe(ProbeOutcome::Failure);
        m.observe(ProbeOutcome::Failure);
        assert_eq!(m.observe(ProbeOutcome::Failure), HeartbeatVerdict::Reload);
        assert_eq!(m.health().phase, HeartbeatPhase::Reloading);
        assert_eq!(m.observe(ProbeOutcome::Failure), HeartbeatVerdict::Unhealthy);
        // Stays unhealthy until reset.
        assert_eq!(m.observe(ProbeOutcome::Success), HeartbeatVerdict::Unhealthy);
        m.reset();
        assert_eq!(m.observe(ProbeOutcome::Success), HeartbeatVerdict::Healthy);
    }

    #[test]
    fn successful_reload_recovers() {
        let mut m = monitor(1);
        assert_eq!(m.observe(ProbeOutcome::Timeout), HeartbeatVerdict::Reload);
        assert_eq!(m.observe(ProbeOutcome::Success), HeartbeatVerdict::Recovered);
        assert_eq!(m.health().phase, HeartbeatPhase::Healthy);
        assert_eq!(m.health().reloads, 1);
    }

    #[test]
    fn zero_threshold_treated_as_one() {
        let mut m = monitor(0);
        assert_eq!(m.observe(ProbeOutcome::Failure), HeartbeatVerdict::Reload);
    }

    #[test]
    fn transition_is_pure() {
        let start = HeartbeatHealth::default();
        let policy = HeartbeatPolicy::default();
        let a = transition_heartbeat(&start, ProbeOutcome::Failure, &policy);
        let b = transition_heartbeat(&start, ProbeOutcome::Failure, &policy);
        assert_eq!(a, b);
        assert_eq!(start, HeartbeatHealth::default());
    }
}
