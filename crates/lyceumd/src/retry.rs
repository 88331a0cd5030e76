//! Bounded retry for optimistic transactions.
//!
//! A transaction that loses a compare-and-swap race re-reads and recomputes.
//! Between attempts it sleeps with exponential backoff and jitter; once the
//! attempt budget is spent the caller gets `GachaError::Conflict`.

use lyceum_shared::{GachaError, GachaResult};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub factor: f64,
    pub jitter_percent: f64,
    pub max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_ms: 5,
            factor: 2.0,
            jitter_percent: 0.20,
            max_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Policy with no sleeping between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_ms: 0,
            factor: 1.0,
            jitter_percent: 0.0,
            max_ms: 0,
        }
    }

    /// Calculate backoff duration with jitter
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base_backoff =
            (self.base_ms as f64 * self.factor.powi(attempt as i32)).min(self.max_ms as f64);

        let jitter_range = base_backoff * self.jitter_percent;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        let backoff_ms = (base_backoff + jitter).max(0.0) as u64;
        Duration::from_millis(backoff_ms)
    }

    /// Start tracking attempts for one transaction
    pub fn start(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempts: 1,
        }
    }
}

/// Attempt counter for a single transaction
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
}

impl RetryState<'_> {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a lost race on `key`; sleep before the next attempt or give up
    pub async fn backoff(&mut self, key: &str) -> GachaResult<()> {
        if self.attempts >= self.policy.max_attempts {
            warn!(key, attempts = self.attempts, "transaction retries exhausted");
            return Err(GachaError::Conflict {
                key: key.to_string(),
                attempts: self.attempts,
            });
        }
        let delay = self.policy.calculate_backoff(self.attempts - 1);
        debug!(key, attempt = self.attempts, delay_ms = delay.as_millis() as u64, "write conflict, retrying");
        self.attempts += 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
