//! Shared wait-point logic for the global gate and bucket admission

use crate::request::{RequestOptions, RetryMode};
use chat_common::{ClientError, ClientResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Close signal shared by every submission of one queue
#[derive(Debug, Default)]
pub(crate) struct CloseSignal {
    token: CancellationToken,
    reason: parking_lot::Mutex<Option<ClientError>>,
}

impl CloseSignal {
    /// Record `reason` and wake every waiter; the first reason wins
    pub(crate) fn close(&self, reason: ClientError) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn error(&self) -> ClientError {
        self.reason
            .lock()
            .as_ref()
            .map_or_else(|| ClientError::transport_closed("request queue closed"), ClientError::duplicate)
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Deadline, policy, and abort signals of one in-progress submission
#[derive(Debug, Clone)]
pub struct AdmissionContext {
    deadline: Instant,
    retry: RetryMode,
    cancel: CancellationToken,
    closed: Arc<CloseSignal>,
}

impl AdmissionContext {
    pub(crate) fn new(options: &RequestOptions, closed: Arc<CloseSignal>) -> Self {
        Self {
            deadline: Instant::now() + options.timeout,
            retry: options.retry,
            cancel: options.cancel.clone(),
            closed,
        }
    }

    /// Standalone context for driving a bucket directly
    #[must_use]
    pub fn detached(timeout: Duration, retry: RetryMode) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            retry,
            cancel: CancellationToken::new(),
            closed: Arc::new(CloseSignal::default()),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn retry(&self) -> RetryMode {
        self.retry
    }

    /// Fail fast if the request was canceled, the queue closed, or time ran out
    pub fn check(&self) -> ClientResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Canceled);
        }
        if self.closed.is_closed() {
            return Err(self.closed.error());
        }
        if Instant::now() >= self.deadline {
            return Err(ClientError::Timeout);
        }
        Ok(())
    }

    /// Sleep until `until` on behalf of rate limit `bucket`.
    ///
    /// Fails instead of sleeping when the policy forbids waiting out rate
    /// limits or the wake-up would land past the deadline.
    pub async fn wait_rate_limit(&self, bucket: &str, until: Instant) -> ClientResult<()> {
        self.check()?;

        let now = Instant::now();
        let retry_after = until.saturating_duration_since(now);
        if !self.retry.contains(RetryMode::RATE_LIMITS) || until > self.deadline {
            return Err(ClientError::rate_limited(bucket, Some(retry_after)));
        }

        tracing::trace!(bucket = %bucket, wait_ms = retry_after.as_millis() as u64, "Waiting for rate limit");
        self.sleep_until(until).await
    }

    /// Sleep without rate-limit policy checks (retry backoff), still abortable
    pub async fn sleep_until(&self, until: Instant) -> ClientResult<()> {
        tokio::select! {
            () = tokio::time::sleep_until(until) => Ok(()),
            () = self.cancel.cancelled() => Err(ClientError::Canceled),
            () = self.closed.token().cancelled() => Err(self.closed.error()),
        }
    }

    /// Race `fut` against cancellation and queue shutdown
    pub async fn abortable<F, T>(&self, fut: F) -> ClientResult<T>
    where
        F: std::future::Future<Output = ClientResult<T>>,
    {
        tokio::select! {
            result = fut => result,
            () = self.cancel.cancelled() => Err(ClientError::Canceled),
            () = self.closed.token().cancelled() => Err(self.closed.error()),
        }
    }

    /// Like [`abortable`](Self::abortable) but also bounded by the deadline
    pub async fn bounded<F, T>(&self, fut: F) -> ClientResult<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            value = fut => Ok(value),
            () = tokio::time::sleep_until(self.deadline) => Err(ClientError::Timeout),
            () = self.cancel.cancelled() => Err(ClientError::Canceled),
            () = self.closed.token().cancelled() => Err(self.closed.error()),
        }
    }
}
