//! Limiter for cold session starts (Identify).
//!
//! Two limits apply to every shard in a group at once:
//! - a rolling-window cap on total identify attempts
//! - a minimum spacing, allowing `max_concurrency` identifies per slot
//!
//! Resumes never touch this limiter.

use crate::Admission;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// One identify counted against the window.
///
/// Seeded attempts have no start time and never affect spacing.
#[derive(Debug, Clone, Copy)]
struct Attempt {
    started: Option<Instant>,
    expires: Instant,
}

/// Shared identify limiter.
///
/// # Example
///
/// ```rust,ignore
/// use cordial_rate_limit::IdentifyLimiter;
/// use std::time::Duration;
///
/// let limiter = IdentifyLimiter::new(1000, Duration::from_secs(86_400), Duration::from_secs(5), 1);
/// limiter.reserve().await; // waits for spacing and window
/// // send Identify...
/// ```
#[derive(Debug)]
pub struct IdentifyLimiter {
    attempts: Mutex<VecDeque<Attempt>>,
    max_per_window: u32,
    window: Duration,
    spacing: Duration,
    max_concurrency: u32,
}

impl IdentifyLimiter {
    /// Create a limiter.
    ///
    /// * `max_per_window` - identify attempts allowed per rolling `window`
    /// * `spacing` - minimum time between identify slots
    /// * `max_concurrency` - identifies allowed within one `spacing` slot
    pub fn new(max_per_window: u32, window: Duration, spacing: Duration, max_concurrency: u32) -> Self {
        debug!(
            max_per_window,
            ?window,
            ?spacing,
            max_concurrency,
            "Creating identify limiter"
        );
        Self {
            attempts: Mutex::new(VecDeque::new()),
            max_per_window: max_per_window.max(1),
            window,
            spacing,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Account for identifies already spent before this process started.
    ///
    /// `used` attempts are recorded so that they age out of the window after
    /// `expires_in`, matching the server's reported session start limit.
    pub fn seed_used(&self, used: u32, expires_in: Duration, now: Instant) {
        let seeded = Attempt {
            started: None,
            expires: now + expires_in.min(self.window),
        };
        let mut attempts = self.attempts.lock();
        for _ in 0..used {
            attempts.push_front(seeded);
        }
        debug!(used, ?expires_in, "Seeded identify limiter");
    }

    /// Reserve an identify slot if both limits allow it now.
    pub fn try_reserve(&self, now: Instant) -> Admission {
        let mut attempts = self.attempts.lock();

        while let Some(oldest) = attempts.front() {
            if oldest.expires <= now {
                attempts.pop_front();
            } else {
                break;
            }
        }

        let window_wait = if attempts.len() >= self.max_per_window as usize {
            let idx = attempts.len() - self.max_per_window as usize;
            attempts[idx].expires.saturating_duration_since(now)
        } else {
            Duration::ZERO
        };

        let concurrency = self.max_concurrency as usize;
        let spacing_wait = if attempts.len() >= concurrency {
            let idx = attempts.len() - concurrency;
            attempts[idx]
                .started
                .map(|started| (started + self.spacing).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        let wait = window_wait.max(spacing_wait);
        if wait.is_zero() {
            attempts.push_back(Attempt {
                started: Some(now),
                expires: now + self.window,
            });
            trace!(used = attempts.len(), "Identify slot reserved");
            Admission::Granted
        } else {
            trace!(?wait, "Identify slot deferred");
            Admission::Deferred(wait)
        }
    }

    /// Wait until a slot is reserved.
    #[instrument(skip(self))]
    pub async fn reserve(&self) {
        loop {
            match self.try_reserve(Instant::now()) {
                Admission::Granted => return,
                Admission::Deferred(wait) => {
                    debug!(?wait, "Waiting for identify slot");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Attempts still counted against the rolling window.
    pub fn used(&self) -> usize {
        self.attempts.lock().len()
    }
}
