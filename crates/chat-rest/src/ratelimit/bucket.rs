//! Per-domain admission counter with adaptive reset

use super::{AdmissionContext, BucketKey, RateLimitInfo};
use chat_common::ClientResult;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default wait before retrying admission on a bucket whose reset time is unknown
pub const DEFAULT_PREEMPTIVE_BACKOFF: Duration = Duration::from_millis(750);

/// A later reset within this distance of the known one belongs to the same window
const RESET_TOLERANCE: Duration = Duration::from_millis(250);

/// Outcome of one admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Exhausted; try again at this instant
    WaitUntil(Instant),
}

#[derive(Debug)]
struct BucketState {
    limit: i64,
    /// Never negative once the state lock is released
    remaining: i64,
    reset_at: Option<Instant>,
    /// A response with no rate-limit metadata was seen
    unlimited: bool,
    /// Limits have been learned from at least one response
    learned: bool,
    hash: Option<String>,
    last_attempt: Instant,
}

/// One rate-limit domain.
///
/// Unknown buckets start with a window of one so only a single request
/// probes the endpoint until its limits are learned. Admission order is FIFO:
/// waiters queue on `turn` and only the head of the queue sleeps on the reset.
#[derive(Debug)]
pub struct RequestBucket {
    key: BucketKey,
    preemptive_backoff: Duration,
    turn: tokio::sync::Mutex<()>,
    state: Mutex<BucketState>,
}

impl RequestBucket {
    #[must_use]
    pub fn new(key: BucketKey, preemptive_backoff: Duration) -> Self {
        Self {
            key,
            preemptive_backoff,
            turn: tokio::sync::Mutex::new(()),
            state: Mutex::new(BucketState {
                limit: 1,
                remaining: 1,
                reset_at: None,
                unlimited: false,
                learned: false,
                hash: None,
                last_attempt: Instant::now(),
            }),
        }
    }

    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    /// Server hash if revealed, otherwise the provisional key
    pub fn label(&self) -> String {
        self.state
            .lock()
            .hash
            .clone()
            .unwrap_or_else(|| self.key.to_string())
    }

    /// Take one slot if available, refilling first when the reset has passed
    pub fn try_admit(&self, now: Instant) -> Admission {
        let mut state = self.state.lock();
        state.last_attempt = now;

        if state.unlimited {
            return Admission::Granted;
        }

        if state.reset_at.is_some_and(|reset| reset <= now) {
            state.remaining = state.limit;
            state.reset_at = None;
        }

        state.remaining -= 1;
        if state.remaining >= 0 {
            tracing::trace!(bucket = %self.key, remaining = state.remaining, "Admitted request");
            return Admission::Granted;
        }

        state.remaining += 1;
        // Exhausted with no known reset: refill after the pre-emptive backoff
        let until = *state
            .reset_at
            .get_or_insert(now + self.preemptive_backoff);
        Admission::WaitUntil(until)
    }

    /// Wait for a slot in FIFO order under the request's deadline and policy
    pub async fn admit(&self, ctx: &AdmissionContext) -> ClientResult<()> {
        let _turn = ctx.bounded(self.turn.lock()).await?;

        loop {
            ctx.check()?;
            match self.try_admit(Instant::now()) {
                Admission::Granted => return Ok(()),
                Admission::WaitUntil(until) => ctx.wait_rate_limit(&self.label(), until).await?,
            }
        }
    }

    /// Apply the rate-limit metadata of a completed response
    pub fn update(&self, info: &RateLimitInfo, now: Instant) {
        let mut state = self.state.lock();
        if state.unlimited {
            return;
        }

        if !info.has_metadata() {
            state.unlimited = true;
            tracing::debug!(bucket = %self.key, "Response carried no rate limit; bucket is now unlimited");
            return;
        }

        if let Some(limit) = info.limit {
            state.limit = i64::from(limit);
        }

        let new_reset = info.reset_after.map(|after| now + after);
        let new_window = match (new_reset, state.reset_at) {
            (Some(new), Some(current)) => new > current + RESET_TOLERANCE,
            _ => false,
        };

        if let Some(remaining) = info.remaining {
            let remaining = i64::from(remaining);
            // Responses from the current window can only lower the count
            state.remaining = if !state.learned || new_window {
                remaining
            } else {
                state.remaining.min(remaining)
            };
        }

        if let Some(new) = new_reset {
            state.reset_at = Some(match state.reset_at {
                Some(current) if state.learned && !new_window => current.max(new),
                _ => new,
            });
        }

        state.remaining = state.remaining.clamp(0, state.limit.max(0));
        if state.remaining == 0 && state.reset_at.is_none() {
            state.reset_at = Some(now + self.preemptive_backoff);
        }
        state.learned = true;
        if let Some(hash) = &info.bucket {
            state.hash = Some(hash.clone());
        }

        tracing::debug!(
            bucket = %self.key,
            limit = state.limit,
            remaining = state.remaining,
            reset_in_ms = state
                .reset_at
                .map_or(0, |reset| reset.saturating_duration_since(now).as_millis() as u64),
            "Updated rate limit bucket"
        );
    }

    /// A 429 on this bucket: nothing is admitted until `now + retry_after`
    pub fn rate_limited(&self, retry_after: Duration, now: Instant) {
        let mut state = self.state.lock();
        state.remaining = 0;
        state.reset_at = Some(now + retry_after);
        state.learned = true;
        state.unlimited = false;
        tracing::warn!(
            bucket = %self.key,
            retry_after_ms = retry_after.as_millis() as u64,
            "Bucket rate limited"
        );
    }

    /// Take one slot without waiting (accounts for a request that passed through a merged bucket)
    pub fn consume(&self) {
        let mut state = self.state.lock();
        if !state.unlimited {
            state.remaining = (state.remaining - 1).max(0);
        }
    }

    /// Return a slot that was admitted but never used
    pub fn refund(&self) {
        let mut state = self.state.lock();
        if !state.unlimited {
            state.remaining = (state.remaining + 1).min(state.limit);
        }
    }

    pub fn remaining(&self) -> u32 {
        u32::try_from(self.state.lock().remaining).unwrap_or(0)
    }

    pub fn limit(&self) -> u32 {
        u32::try_from(self.state.lock().limit).unwrap_or(0)
    }

    pub fn reset_at(&self) -> Option<Instant> {
        self.state.lock().reset_at
    }

    pub fn hash(&self) -> Option<String> {
        self.state.lock().hash.clone()
    }

    pub fn is_unlimited(&self) -> bool {
        self.state.lock().unlimited
    }

    pub fn last_attempt(&self) -> Instant {
        self.state.lock().last_attempt
    }

    /// No admission for `ttl` and nobody waiting
    pub fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        let quiet = self.last_attempt() + ttl <= now;
        quiet && self.turn.try_lock().is_ok()
    }
}
