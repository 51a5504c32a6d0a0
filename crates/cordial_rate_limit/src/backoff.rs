//! Exponential backoff with jitter.

use std::time::Duration;
use tokio_retry2::strategy::jitter_range;

/// Capped exponential backoff.
///
/// Attempt `n` (1-based) waits `first * 2^(n-1)`, capped at `max`. With
/// jitter enabled the delay is drawn from `[d/2, d)` so retries from many
/// lanes or shards do not line up.
///
/// # Example
///
/// ```
/// use cordial_rate_limit::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(30));
/// assert_eq!(backoff.delay(1), Duration::from_secs(2));
/// assert_eq!(backoff.delay(3), Duration::from_secs(8));
/// assert_eq!(backoff.delay(10), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    first: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    /// Backoff without jitter.
    pub fn new(first: Duration, max: Duration) -> Self {
        Self {
            first,
            max: max.max(first),
            jitter: false,
        }
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Upper bound on any delay.
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Delay before attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self.first.saturating_mul(1u32 << exponent).min(self.max);
        if self.jitter {
            jitter_range(0.5, 1.0)(base).min(self.max)
        } else {
            base
        }
    }
}
