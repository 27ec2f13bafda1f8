//! Outbound command throttling

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

const fn nonzero(n: u32) -> NonZeroU32 {
    match NonZeroU32::new(n) {
        Some(n) => n,
        None => panic!("quota must be non-zero"),
    }
}

/// Application commands per connection per minute
pub const COMMANDS_PER_MINUTE: NonZeroU32 = nonzero(120);

/// Identify attempts per minute (one every five seconds)
pub const IDENTIFIES_PER_MINUTE: NonZeroU32 = nonzero(12);

/// Quotas for gateway commands. Heartbeats are never throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLimits {
    pub commands: Quota,
    pub identify: Quota,
}

impl CommandLimits {
    #[must_use]
    pub fn new(commands: Quota, identify: Quota) -> Self {
        Self { commands, identify }
    }

    pub(crate) fn command_limiter(&self) -> DefaultDirectRateLimiter {
        RateLimiter::direct(self.commands)
    }

    pub(crate) fn identify_limiter(&self) -> DefaultDirectRateLimiter {
        RateLimiter::direct(self.identify)
    }
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            commands: Quota::per_minute(COMMANDS_PER_MINUTE),
            identify: Quota::per_minute(IDENTIFIES_PER_MINUTE).allow_burst(nonzero(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_burst() {
        let limiter = CommandLimits::default().command_limiter();
        for _ in 0..120 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_identify_allows_one_at_a_time() {
        let limiter = CommandLimits::default().identify_limiter();
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
