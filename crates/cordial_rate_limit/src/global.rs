//! API-wide rate limiting shared by every bucket.
//!
//! The global limiter combines three gates:
//! - the server-signalled global window (a 429 with the global flag blocks
//!   every bucket until its deadline)
//! - a proactive requests-per-second quota via governor (GCRA)
//! - a cap on concurrent in-flight requests via a Tokio Semaphore

use crate::{Admission, RateLimitHeaders};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use parking_lot::Mutex;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

type DirectRateLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Process-wide limiter consulted before every dispatch.
///
/// # Example
///
/// ```rust,ignore
/// use cordial_rate_limit::GlobalRateLimiter;
///
/// let global = GlobalRateLimiter::new(12, Some(50));
/// if global.try_admit(tokio::time::Instant::now()).is_granted() {
///     let _permit = global.acquire().await;
///     // dispatch...
/// }
/// ```
pub struct GlobalRateLimiter {
    blocked_until: Mutex<Option<Instant>>,
    per_second: Option<Arc<DirectRateLimiter>>,
    concurrency: Arc<Semaphore>,
}

impl GlobalRateLimiter {
    /// Create a limiter with a concurrency cap and an optional per-second quota.
    pub fn new(max_concurrent: usize, requests_per_second: Option<u32>) -> Self {
        let per_second = requests_per_second
            .and_then(NonZeroU32::new)
            .map(|n| Arc::new(GovernorRateLimiter::direct(Quota::per_second(n))));

        debug!(
            max_concurrent,
            ?requests_per_second,
            "Creating global rate limiter"
        );

        Self {
            blocked_until: Mutex::new(None),
            per_second,
            concurrency: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Limiter with no proactive quota, only server-signalled global windows.
    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS, None)
    }

    /// Check the server-signalled global window.
    pub fn try_admit(&self, now: Instant) -> Admission {
        match *self.blocked_until.lock() {
            Some(until) if now < until => Admission::Deferred(until - now),
            _ => Admission::Granted,
        }
    }

    /// Block every bucket for `retry_after` from `observed_at`.
    pub fn rate_limited_for(&self, retry_after: Duration, observed_at: Instant) {
        let deadline = observed_at + retry_after;
        let mut blocked = self.blocked_until.lock();
        if blocked.is_none_or(|until| until < deadline) {
            warn!(?retry_after, "Global rate limit hit");
            *blocked = Some(deadline);
        }
    }

    /// Apply a response; only acts when the response signals the global limit.
    pub fn update(&self, headers: &RateLimitHeaders, observed_at: Instant) {
        if !headers.global {
            return;
        }
        if let Some(retry_after) = headers.retry_after.or(headers.reset_after) {
            self.rate_limited_for(retry_after, observed_at);
        }
    }

    /// Wait for the per-second quota and a concurrency slot.
    ///
    /// The returned permit releases the slot when dropped.
    pub async fn acquire(&self) -> GlobalPermit {
        if let Some(limiter) = &self.per_second {
            limiter.until_ready().await;
        }
        // The semaphore is never closed
        let permit = self.concurrency.clone().acquire_owned().await.ok();
        GlobalPermit { _permit: permit }
    }

    /// Number of concurrency slots currently free.
    pub fn available_slots(&self) -> usize {
        self.concurrency.available_permits()
    }
}

impl std::fmt::Debug for GlobalRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalRateLimiter")
            .field("blocked_until", &*self.blocked_until.lock())
            .field("per_second", &self.per_second.is_some())
            .field("available_slots", &self.concurrency.available_permits())
            .finish()
    }
}

impl Default for GlobalRateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// RAII guard for a concurrency slot.
#[derive(Debug)]
pub struct GlobalPermit {
    _permit: Option<OwnedSemaphorePermit>,
}
