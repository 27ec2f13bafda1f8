//! Client error types
//!
//! The typed failure every public operation of the client resolves to. The
//! variants separate "retry yourself" conditions from "the session is gone".

use std::time::Duration;

/// Application-visible error type
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    // Per-request, transient
    #[error("Rate limited on {bucket} (retry after {retry_after:?})")]
    RateLimited {
        bucket: String,
        retry_after: Option<Duration>,
    },

    #[error("Request timed out")]
    Timeout,

    #[error("Request canceled")]
    Canceled,

    // Session-wide
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    #[error("Session failed permanently: {0}")]
    SessionFatal(String),

    // Remote
    #[error("Server error {status}: {reason}")]
    ServerError {
        status: u16,
        /// Service-specific JSON error code, when the body carried one
        code: Option<u64>,
        reason: String,
    },

    // Local
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl ClientError {
    /// Conditions the caller may retry on its own
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout => true,
            Self::ServerError { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// The session is gone; reconnect logic has already run or given up
    #[must_use]
    pub fn is_session_gone(&self) -> bool {
        matches!(self, Self::TransportClosed(_) | Self::SessionFatal(_))
    }

    /// HTTP status associated with this error, if any
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Stable machine-readable code
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Timeout => "TIMEOUT",
            Self::Canceled => "CANCELED",
            Self::TransportClosed(_) => "TRANSPORT_CLOSED",
            Self::SessionFatal(_) => "SESSION_FATAL",
            Self::ServerError { .. } => "SERVER_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub fn rate_limited(bucket: impl std::fmt::Display, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            bucket: bucket.to_string(),
            retry_after,
        }
    }

    #[must_use]
    pub fn transport_closed(reason: impl std::fmt::Display) -> Self {
        Self::TransportClosed(reason.to_string())
    }

    /// Create an internal error from any error
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }

    /// Duplicate a session-wide error so it can be broadcast to many waiters.
    ///
    /// Variants carrying non-cloneable sources collapse to `Internal` with
    /// the same message.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::RateLimited {
                bucket,
                retry_after,
            } => Self::RateLimited {
                bucket: bucket.clone(),
                retry_after: *retry_after,
            },
            Self::Timeout => Self::Timeout,
            Self::Canceled => Self::Canceled,
            Self::TransportClosed(r) => Self::TransportClosed(r.clone()),
            Self::SessionFatal(r) => Self::SessionFatal(r.clone()),
            Self::ServerError {
                status,
                code,
                reason,
            } => Self::ServerError {
                status: *status,
                code: *code,
                reason: reason.clone(),
            },
            Self::Http(r) => Self::Http(r.clone()),
            Self::Config(r) => Self::Config(r.clone()),
            Self::Serialization(e) => Self::Internal(anyhow::anyhow!(e.to_string())),
            Self::Internal(e) => Self::Internal(anyhow::anyhow!(e.to_string())),
        }
    }
}

impl From<crate::ConfigError> for ClientError {
    fn from(err: crate::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
