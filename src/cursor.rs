//! The admission cursor shared by local and distributed limiters.
//!
//! A cursor holds the next time a caller may proceed and an optional pause
//! deadline. All timestamps are nanoseconds on whatever clock the owner uses:
//! a limiter-local monotonic clock for [`RateLimiter`](crate::RateLimiter),
//! the store's clock for [`DistTargetRateLimiters`](crate::DistTargetRateLimiters).

use std::time::Duration;

/// Next-allowed time plus pause deadline for one throttled target.
///
/// The cursor never sleeps. [`Cursor::reserve`] hands out the caller's wait and
/// advances the deadline for whoever comes next, so the owner can release its
/// lock (or commit its store write) before sleeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// When the next caller may proceed. `None` until the first reservation.
    pub next_allowed: Option<u64>,
    /// A pause deadline set by [`Cursor::pause`], consumed by the next reservation.
    pub paused_until: Option<u64>,
}

impl Cursor {
    /// Reserve a slot at `now_nanos` and return how long the caller must wait.
    ///
    /// The deadline for the following caller is moved forward by
    /// `interval_nanos` before returning, so successive reservations from one
    /// instant are spaced `0, interval, 2 * interval, ...`.
    pub fn reserve(&mut self, now_nanos: u64, interval_nanos: u64) -> u64 {
        if let Some(paused_until) = self.paused_until.take() {
            if paused_until > now_nanos {
                // A pause never pulls forward a slot that is already reserved later.
                let resume = paused_until.max(self.next_allowed.unwrap_or(0));
                self.next_allowed = Some(resume.saturating_add(interval_nanos));
                return resume - now_nanos;
            }
        }

        match self.next_allowed {
            Some(next) if next > now_nanos => {
                self.next_allowed = Some(next.saturating_add(interval_nanos));
                next - now_nanos
            }
            _ => {
                self.next_allowed = Some(now_nanos.saturating_add(interval_nanos));
                0
            }
        }
    }

    /// Hold back the next caller until `now_nanos + duration`.
    pub fn pause(&mut self, now_nanos: u64, duration: Duration) {
        self.paused_until = Some(now_nanos.saturating_add(duration_nanos(duration)));
    }

    /// Returns `true` if a caller arriving at `now_nanos` would not wait.
    pub fn is_idle(&self, now_nanos: u64) -> bool {
        self.next_allowed.is_none_or(|next| next <= now_nanos)
            && self.paused_until.is_none_or(|until| until <= now_nanos)
    }

    /// How long the cursor must outlive `now_nanos` to keep its pending
    /// deadlines, plus `slack`.
    pub fn retention(&self, now_nanos: u64, slack: Duration) -> Duration {
        let latest = self
            .next_allowed
            .unwrap_or(0)
            .max(self.paused_until.unwrap_or(0));
        Duration::from_nanos(latest.saturating_sub(now_nanos)) + slack
    }
}

/// Saturating conversion used for every clock reading and interval.
#[inline]
pub(crate) fn duration_nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    #[test]
    fn test_first_reservation_is_free() {
        let mut cursor = Cursor::default();
        assert_eq!(cursor.reserve(0, 100 * MS), 0);
        assert_eq!(cursor.next_allowed, Some(100 * MS));
    }

    #[test]
    fn test_burst_is_evenly_spaced() {
        let mut cursor = Cursor::default();
        let waits: Vec<u64> = (0..5).map(|_| cursor.reserve(0, 100 * MS)).collect();
        assert_eq!(waits, vec![0, 100 * MS, 200 * MS, 300 * MS, 400 * MS]);
        assert_eq!(cursor.next_allowed, Some(500 * MS));
    }

    #[test]
    fn test_recovers_after_idle() {
        let mut cursor = Cursor::default();
        cursor.reserve(0, 100 * MS);
        cursor.reserve(0, 100 * MS);

        // Well past the reserved deadline: no wait, fresh deadline.
        assert_eq!(cursor.reserve(1_000 * MS, 100 * MS), 0);
        assert_eq!(cursor.next_allowed, Some(1_100 * MS));
    }

    #[test]
    fn test_partial_wait() {
        let mut cursor = Cursor::default();
        cursor.reserve(0, 100 * MS);
        assert_eq!(cursor.reserve(30 * MS, 100 * MS), 70 * MS);
    }

    #[test]
    fn test_pause_delays_next_caller_then_resumes_cadence() {
        let mut cursor = Cursor::default();
        assert_eq!(cursor.reserve(0, 1_000 * MS), 0);

        cursor.pause(0, Duration::from_secs(2));
        assert_eq!(cursor.reserve(0, 1_000 * MS), 2_000 * MS);
        assert_eq!(cursor.paused_until, None);

        // Normal cadence after the pause.
        assert_eq!(cursor.reserve(0, 1_000 * MS), 3_000 * MS);
    }

    #[test]
    fn test_pause_does_not_shorten_reserved_slots() {
        let mut cursor = Cursor::default();
        for _ in 0..5 {
            cursor.reserve(0, 1_000 * MS);
        }
        cursor.pause(0, Duration::from_secs(1));
        assert_eq!(cursor.reserve(0, 1_000 * MS), 5_000 * MS);
    }

    #[test]
    fn test_expired_pause_is_ignored() {
        let mut cursor = Cursor::default();
        cursor.pause(0, Duration::from_millis(10));
        assert_eq!(cursor.reserve(50 * MS, 100 * MS), 0);
        assert_eq!(cursor.paused_until, None);
    }

    #[test]
    fn test_idle_and_retention() {
        let mut cursor = Cursor::default();
        assert!(cursor.is_idle(0));

        cursor.reserve(0, 100 * MS);
        assert!(!cursor.is_idle(50 * MS));
        assert!(cursor.is_idle(100 * MS));
        assert_eq!(
            cursor.retention(0, Duration::from_secs(1)),
            Duration::from_millis(1_100)
        );

        cursor.pause(0, Duration::from_secs(3));
        assert!(!cursor.is_idle(200 * MS));
        assert_eq!(
            cursor.retention(0, Duration::from_secs(1)),
            Duration::from_secs(4)
        );
    }
}
