//! Session-wide throttle tripped by a global 429

use super::AdmissionContext;
use chat_common::ClientResult;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Bucket label reported for global rate limits
pub const GLOBAL_BUCKET: &str = "global";

/// A single shared "blocked until" timestamp.
///
/// Checked before any bucket is touched. While tripped, every submission
/// waits; otherwise it costs one uncontended lock.
#[derive(Debug, Default)]
pub struct GlobalGate {
    blocked_until: Mutex<Option<Instant>>,
}

impl GlobalGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block all submissions until `until`; an earlier reset never shortens an active block
    pub fn trip(&self, until: Instant) {
        let mut blocked = self.blocked_until.lock();
        let extended = blocked.map_or(true, |current| until > current);
        if extended {
            *blocked = Some(until);
            tracing::warn!(
                retry_after_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Global rate limit hit"
            );
        }
    }

    /// Convenience for `trip(now + retry_after)`
    pub fn trip_for(&self, retry_after: Duration) {
        self.trip(Instant::now() + retry_after);
    }

    /// Reset instant if the gate is closed at `now`
    pub fn blocked_until(&self, now: Instant) -> Option<Instant> {
        let mut blocked = self.blocked_until.lock();
        match *blocked {
            Some(until) if until > now => Some(until),
            Some(_) => {
                *blocked = None;
                None
            }
            None => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.blocked_until(Instant::now()).is_none()
    }

    /// Wait for the gate under a request's deadline and retry policy
    pub async fn acquire(&self, ctx: &AdmissionContext) -> ClientResult<()> {
        loop {
            ctx.check()?;
            match self.blocked_until(Instant::now()) {
                None => return Ok(()),
                Some(until) => ctx.wait_rate_limit(GLOBAL_BUCKET, until).await?,
            }
        }
    }

    /// Wait for the gate with no deadline (gateway commands)
    pub async fn wait_open(&self) {
        while let Some(until) = self.blocked_until(Instant::now()) {
            tokio::time::sleep_until(until).await;
        }
    }
}
