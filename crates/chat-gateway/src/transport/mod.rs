//! Frame transport underneath the session
//!
//! The session only sees complete inbound messages and a single `Closed`
//! notification per connection. Every (re)connect hands out a fresh event
//! receiver, so nothing from a dead connection reaches the new one.

mod websocket;

pub use websocket::{chunk_frames, WebSocketTransport};

use crate::error::GatewayResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code sent by the peer; `None` for resets and local errors
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({code})", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Inbound notification from a connection's read loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete message, reassembled from continuation frames if needed
    Message(Vec<u8>),
    /// The read loop ended; sent at most once per connection
    Closed(CloseInfo),
}

/// Receiver for one connection's inbound events
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Bidirectional frame channel over one connection at a time
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url`, replacing any prior one
    async fn connect(&self, url: &str) -> GatewayResult<TransportEvents>;

    /// Write one message. Concurrent callers are serialized; payloads above
    /// the frame size limit are split into continuation frames.
    async fn send(&self, payload: Vec<u8>, text: bool) -> GatewayResult<()>;

    /// Best-effort close with `code`, then stop the read loop
    async fn disconnect(&self, code: u16);
}
