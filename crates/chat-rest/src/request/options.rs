//! Per-request retry policy, deadline, and cancellation

use bitflags::bitflags;
use chat_common::RetrySettings;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default overall deadline for one request, waits included
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

bitflags! {
    /// Which failures a request waits out or retries instead of returning
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RetryMode: u8 {
        /// Retry when the transport reports a timeout
        const TIMEOUTS = 1 << 0;
        /// Sleep through bucket and global rate limits, including 429 responses
        const RATE_LIMITS = 1 << 1;
        /// Retry 502-class responses
        const BAD_GATEWAY = 1 << 2;

        const ALWAYS = Self::TIMEOUTS.bits() | Self::RATE_LIMITS.bits() | Self::BAD_GATEWAY.bits();
    }
}

impl Default for RetryMode {
    fn default() -> Self {
        Self::RATE_LIMITS | Self::BAD_GATEWAY
    }
}

impl From<RetrySettings> for RetryMode {
    fn from(settings: RetrySettings) -> Self {
        let mut mode = Self::empty();
        mode.set(Self::TIMEOUTS, settings.timeouts);
        mode.set(Self::RATE_LIMITS, settings.rate_limits);
        mode.set(Self::BAD_GATEWAY, settings.bad_gateway);
        mode
    }
}

/// Options attached to a single submission
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Overall deadline measured from submission
    pub timeout: Duration,
    pub retry: RetryMode,
    /// Trips to abort the request at any wait point or mid-send
    pub cancel: CancellationToken,
    /// Audit-log reason forwarded as a header
    pub reason: Option<String>,
}

impl RequestOptions {
    #[must_use]
    pub fn new(timeout: Duration, retry: RetryMode) -> Self {
        Self {
            timeout,
            retry,
            cancel: CancellationToken::new(),
            reason: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryMode) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT, RetryMode::default())
    }
}
