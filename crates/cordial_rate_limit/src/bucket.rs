//! Per-bucket window accounting.

use crate::RateLimitHeaders;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may be dispatched now
    Granted,
    /// The request must wait at least this long before asking again
    Deferred(Duration),
}

impl Admission {
    /// True when the request may proceed.
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }

    /// Time left to wait; zero when granted.
    pub fn wait(&self) -> Duration {
        match self {
            Admission::Granted => Duration::ZERO,
            Admission::Deferred(wait) => *wait,
        }
    }

    /// Combine two checks: the stricter one wins.
    ///
    /// ```
    /// use cordial_rate_limit::Admission;
    /// use std::time::Duration;
    ///
    /// let bucket = Admission::Deferred(Duration::from_millis(200));
    /// let global = Admission::Deferred(Duration::from_secs(1));
    /// assert_eq!(bucket.max(global), Admission::Deferred(Duration::from_secs(1)));
    /// assert_eq!(Admission::Granted.max(bucket), bucket);
    /// ```
    pub fn max(self, other: Admission) -> Admission {
        match (self, other) {
            (Admission::Granted, Admission::Granted) => Admission::Granted,
            (a, b) => Admission::Deferred(a.wait().max(b.wait())),
        }
    }
}

/// Window state for one rate-limit bucket.
///
/// Starts with no knowledge and admits freely until the server reports a
/// limit. After that, at most `limit` requests are admitted before
/// `reset_at`; once `reset_at` passes the bucket is treated as freshly reset
/// until the next response says otherwise.
#[derive(Debug, Clone, Default)]
pub struct RateLimitBucket {
    limit: Option<u32>,
    remaining: Option<u32>,
    reset_at: Option<Instant>,
    window: Option<Duration>,
}

impl RateLimitBucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests allowed per window, once known.
    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Requests left in the current window, once known.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// When the current window ends, once known.
    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    /// Check admission and, when granted, count the request against the window.
    pub fn try_admit(&mut self, now: Instant) -> Admission {
        self.roll_window(now);

        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset_at)) if now < reset_at => {
                let wait = reset_at - now;
                trace!(?wait, "Bucket exhausted");
                Admission::Deferred(wait)
            }
            (Some(remaining), _) => {
                self.remaining = Some(remaining.saturating_sub(1));
                Admission::Granted
            }
            (None, _) => Admission::Granted,
        }
    }

    /// Apply what a response reported.
    ///
    /// `observed_at` is when the response arrived; `reset_after` is turned
    /// into a deadline relative to it exactly once. Fields the response did
    /// not carry are left untouched.
    pub fn update(&mut self, headers: &RateLimitHeaders, observed_at: Instant) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(reset_after) = headers.reset_after {
            self.reset_at = Some(observed_at + reset_after);
            self.window = Some(self.window.map_or(reset_after, |w| w.max(reset_after)));
        }
    }

    /// Mark the bucket exhausted for `retry_after` after a 429.
    pub fn exhaust(&mut self, retry_after: Duration, observed_at: Instant) {
        let deadline = observed_at + retry_after;
        self.remaining = Some(0);
        self.reset_at = Some(self.reset_at.map_or(deadline, |r| r.max(deadline)));
    }

    fn roll_window(&mut self, now: Instant) {
        match self.reset_at {
            Some(reset_at) if now >= reset_at => {
                self.remaining = self.limit;
                self.reset_at = self.window.map(|window| now + window);
                trace!(limit = ?self.limit, "Bucket window reset");
            }
            _ => {}
        }
    }
}
