//! Gateway error types

use crate::protocol::{describe_close, ProtocolError};
use chat_common::ClientError;
use thiserror::Error;

/// Session-internal failure
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Opening the connection failed
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed
    #[error("Send failed: {0}")]
    Send(String),

    /// No connection is open
    #[error("Not connected")]
    NotConnected,

    /// An outbound frame could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// An inbound frame violated the protocol
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server closed with a non-recoverable code
    #[error("Fatal close: {}", describe_close(*.0))]
    FatalClose(u16),

    /// Too many consecutive reconnect attempts failed
    #[error("Gave up after {0} failed reconnect attempts")]
    ReconnectsExhausted(u32),

    /// The session was shut down locally
    #[error("Session closed")]
    Closed,
}

impl GatewayError {
    /// Whether the session cannot recover from this error on its own
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalClose(_) | Self::ReconnectsExhausted(_))
    }
}

impl From<GatewayError> for ClientError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Encode(e) => ClientError::Serialization(e),
            e if e.is_fatal() => ClientError::SessionFatal(e.to_string()),
            e => ClientError::TransportClosed(e.to_string()),
        }
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
