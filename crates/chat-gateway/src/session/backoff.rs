//! Reconnect delays

use rand::Rng;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Wait before re-handshaking after an InvalidSession
pub const INVALID_SESSION_WAIT: RangeInclusive<Duration> =
    Duration::from_secs(1)..=Duration::from_secs(5);

/// Exponential backoff, jittered within the upper half of the ceiling
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Upper bound of the delay after `failures` consecutive failed attempts
    #[must_use]
    pub fn ceiling(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures.saturating_sub(1).min(16));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Random delay in `[ceiling / 2, ceiling]`
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let ceiling = self.ceiling(failures);
        if ceiling.is_zero() {
            return ceiling;
        }
        rand::thread_rng().gen_range(ceiling / 2..=ceiling)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Random wait from [`INVALID_SESSION_WAIT`]
#[must_use]
pub fn invalid_session_wait() -> Duration {
    rand::thread_rng().gen_range(INVALID_SESSION_WAIT)
}
