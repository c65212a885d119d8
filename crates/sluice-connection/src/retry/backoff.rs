//! Delay schedule between statement retries

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponentially growing pause between retries.
///
/// Retry `n` (zero-based) waits `initial * multiplier^n`, never more than
/// the ceiling. With jitter on, each pause is scaled by a random factor in
/// `0.75..=1.25` so clients failing together do not retry together.
///
/// # Example
///
/// ```
/// use sluice_connection::retry::BackoffStrategy;
/// use std::time::Duration;
///
/// let backoff = BackoffStrategy::default();
///
/// assert_eq!(backoff.calculate_delay(0), Duration::from_secs(1));
/// assert_eq!(backoff.calculate_delay(2), Duration::from_secs(4));
/// assert!(backoff.calculate_delay(20) <= Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffStrategy {
    initial: Duration,
    ceiling: Duration,
    multiplier: f64,
    jitter: bool,
}

impl BackoffStrategy {
    /// A doubling schedule starting at `initial_ms`, capped at `max_ms`
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        let initial = Duration::from_millis(initial_ms.max(1));
        Self {
            initial,
            ceiling: Duration::from_millis(max_ms).max(initial),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Growth factor per retry; values below 1 are treated as 1
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pause before retry number `attempt`, counting from 0
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let growth = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = self.initial.as_millis() as f64 * growth;
        let delay = if delay_ms >= self.ceiling.as_millis() as f64 {
            self.ceiling
        } else {
            Duration::from_millis(delay_ms.round() as u64)
        };

        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.75..=1.25))
        } else {
            delay
        }
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial
    }

    pub fn max_delay(&self) -> Duration {
        self.ceiling
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn has_jitter(&self) -> bool {
        self.jitter
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::new(1_000, 30_000)
    }
}
