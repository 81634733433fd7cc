//! Restart delay policy.
//!
//! Delays grow geometrically from `initial` by `multiplier` and are clamped
//! at `max`. One [`Backoff`] is kept per folder so a crashing helper in one
//! folder never slows down or speeds up restarts in another.

use std::time::Duration;

/// Restart delay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(15),
            multiplier: 1.5,
            max: Duration::from_secs(5 * 60),
        }
    }
}

/// Retry state for one recovery unit.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    /// A multiplier below 1.0 is treated as 1.0 so the sequence never shrinks.
    #[must_use]
    pub fn new(mut policy: BackoffPolicy) -> Self {
        if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
            policy.multiplier = 1.0;
        }
        let current = policy.initial.min(policy.max);
        Self { policy, current }
    }

    /// Delay the next restart would wait.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay for this failure and grow the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown_ms = (delay.as_millis() as f64 * self.policy.multiplier).round() as u64;
        self.current = Duration::from_millis(grown_ms).min(self.policy.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial.min(self.policy.max);
    }
}
