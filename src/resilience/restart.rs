//! Bounded restart budget for the backend child.

use std::time::Duration;

use crate::config::RestartConfig;
use crate::resilience::backoff::calculate_backoff;

/// Tracks consecutive restart attempts.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    config: RestartConfig,
    attempts: u32,
}

impl RestartPolicy {
    pub fn new(config: RestartConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// Record that a child exited after running for `uptime`.
    ///
    /// A run of at least `stable_after_secs` resets the budget.
    pub fn record_exit(&mut self, uptime: Duration) {
        if uptime >= Duration::from_secs(self.config.stable_after_secs) {
            if self.attempts > 0 {
                tracing::debug!(attempts = self.attempts, uptime = ?uptime, "Backend ran stably, resetting restart budget");
            }
            self.attempts = 0;
        }
    }

    /// Consume one attempt and return the delay before it.
    ///
    /// `None` once `max_attempts` consecutive attempts have been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(calculate_backoff(
            self.attempts,
            self.config.base_delay_ms,
            self.config.max_delay_ms,
        ))
    }

    /// Attempts consumed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
