//! Restart ceiling with exponential backoff.
//!
//! Pure, deterministic state machine. All time values are passed in as
//! parameters (no system clock access).

use kiosk_core::RestartPolicy;

/// Decision returned after recording a session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart after `after_ms`. `attempt` is 1-based within the window.
    Restart { after_ms: u64, attempt: u32 },
    /// Ceiling reached; the session must not restart again.
    Exhausted { restarts_in_window: u32 },
}

/// Counts restarts of one session over a sliding window.
///
/// With a ceiling of `C`, the first `C` failures inside the window each get
/// a restart; failure `C + 1` is terminal.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    policy: RestartPolicy,
    restart_timestamps: Vec<u64>,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            restart_timestamps: Vec::new(),
        }
    }

    /// Record a failure at `now_ms` and decide whether to restart.
    pub fn record_failure(&mut self, now_ms: u64) -> RestartDecision {
        self.prune(now_ms);

        let used = self.restart_timestamps.len() as u32;
        if used >= self.policy.ceiling {
            return RestartDecision::Exhausted {
                restarts_in_window: used,
            };
        }

        self.restart_timestamps.push(now_ms);
        let attempt = used + 1;
        RestartDecision::Restart {
            after_ms: self.backoff_ms(attempt),
            attempt,
        }
    }

    /// Restarts counted in the window ending at `now_ms`.
    pub fn restarts_in_window(&self, now_ms: u64) -> u32 {
        let window_start = now_ms.saturating_sub(self.policy.window_ms);
        self.restart_timestamps
            .iter()
            .filter(|&&ts| ts >= window_start)
            .count() as u32
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    fn prune(&mut self, now_ms: u64) {
        let window_start = now_ms.saturating_sub(self.policy.window_ms);
        self.restart_timestamps.retain(|&ts| ts >= window_start);
    }

    /// `initial * multiplier^(attempt - 1)`, capped at `max_backoff_ms`.
    fn backoff_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = (self.policy.initial_backoff_ms as f64) * self.policy.multiplier.powi(exp);
        if !raw.is_finite() || raw >= self.policy.max_backoff_ms as f64 {
            self.policy.max_backoff_ms
        } else {
            (raw.max(0.0) as u64).min(self.policy.max_backoff_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(ceiling: u32) -> RestartPolicy {
        RestartPolicy {
            ceiling,
            initial_backoff_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 5_000,
            window_ms: 60_000,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut t = RestartTracker::new(policy(10));
        let delays: Vec<u64> = (0..5)
            .map(|i| match t.record_failure(i * 10) {
                RestartDecision::Restart { after_ms, .. } => after_ms,
                RestartDecision::Exhausted { .. } => panic!("unexpected exhaustion"),
            })
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 5_000, 5_000]);
    }

    #[test]
    fn exactly_ceiling_restarts_then_exhausted() {
        let mut t = RestartTracker::new(policy(3));
        for attempt in 1..=3 {
            assert!(matches!(
                t.record_failure(u64::from(attempt) * 100),
                RestartDecision::Restart { attempt: a, .. } if a == attempt
            ));
        }
        assert_eq!(
            t.record_failure(400),
            RestartDecision::Exhausted {
                restarts_in_window: 3
            }
        );
        // Still exhausted on the next failure too.
        assert!(matches!(
            t.record_failure(500),
            RestartDecision::Exhausted { .. }
        ));
    }

    #[test]
    fn window_slides() {
        let mut t = RestartTracker::new(policy(2));
        t.record_failure(0);
        t.record_failure(1_000);
        assert_eq!(t.restarts_in_window(1_000), 2);
        // Both restarts fell out of the 60s window.
        assert_eq!(t.restarts_in_window(62_000), 0);
        assert!(matches!(
            t.record_failure(62_000),
            RestartDecision::Restart { attempt: 1, after_ms: 1_000 }
        ));
    }

    #[test]
    fn zero_ceiling_never_restarts() {
        let mut t = RestartTracker::new(policy(0));
        assert!(matches!(
            t.record_failure(0),
            RestartDecision::Exhausted { restarts_in_window: 0 }
        ));
    }
}
