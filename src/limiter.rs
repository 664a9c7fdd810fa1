//! The single-key rate limiter.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep};

use crate::cursor::{Cursor, duration_nanos};
use crate::error::ThrottleError;
use crate::rates::RateSpec;

/// Serializes concurrent callers against one [`RateSpec`].
///
/// The lock only covers the deadline reservation. Callers sleep after
/// releasing it, so a burst of `N` callers is admitted at
/// `0, interval, 2 * interval, ...` in lock-acquisition order.
///
/// # Thread Safety
///
/// `RateLimiter` is `Send + Sync`; share it behind an [`Arc`](std::sync::Arc).
#[derive(Debug)]
pub struct RateLimiter {
    rate: RateSpec,
    cursor: Mutex<Cursor>,
    start_instant: Instant,
}

impl RateLimiter {
    /// Create a limiter with no prior state. The first caller never waits.
    #[must_use]
    pub fn new(rate: RateSpec) -> Self {
        Self {
            rate,
            cursor: Mutex::new(Cursor::default()),
            start_instant: Instant::now(),
        }
    }

    /// Create a limiter allowing `n_requests` evenly spaced over `per`.
    pub fn from_uniform_rate(n_requests: u32, per: Duration) -> Result<Self, ThrottleError> {
        RateSpec::constant(n_requests, per).map(Self::new)
    }

    pub fn rate(&self) -> &RateSpec {
        &self.rate
    }

    #[inline]
    fn now_nanos(&self) -> u64 {
        duration_nanos(self.start_instant.elapsed())
    }

    /// Reserve the caller's slot without sleeping and return the wait.
    ///
    /// The caller is responsible for waiting out the returned duration.
    /// [`RatesController`](crate::RatesController) uses this to reserve on
    /// every matched limiter and then sleep once.
    pub fn reserve(&self) -> Duration {
        let interval = duration_nanos(self.rate.interval());
        let mut cursor = self.cursor.lock();
        let now = self.now_nanos();
        Duration::from_nanos(cursor.reserve(now, interval))
    }

    /// Wait until this caller's turn and return how long it waited.
    pub async fn maybe_sleep(&self) -> Duration {
        let wait = self.reserve();
        if !wait.is_zero() {
            sleep(wait).await;
        }
        wait
    }

    /// Hold back the next caller for `duration` from now.
    ///
    /// Does not block. Waits already handed out are unaffected.
    pub fn pause(&self, duration: Duration) {
        let mut cursor = self.cursor.lock();
        let now = self.now_nanos();
        cursor.pause(now, duration);
    }

    /// Returns `true` if the next caller would not wait.
    pub fn is_idle(&self) -> bool {
        let cursor = self.cursor.lock();
        cursor.is_idle(self.now_nanos())
    }
}
