//! # chat-gateway
//!
//! Client side of the real-time gateway.
//!
//! ## Features
//!
//! - **Session machine**: Identify, resume, and reconnect driven by one transition function
//! - **Heartbeats**: Jittered first beat, missed-ack detection
//! - **Command limits**: Per-connection command quota and identify spacing
//! - **Dispatch queue**: Ordered delivery to the application, queued or inline
//! - **Transport**: WebSocket with frame chunking for oversized payloads
//!
//! ## Example
//!
//! ```ignore
//! use chat_gateway::{EventDispatchQueue, DispatchMode, GatewayOptions, GatewaySession, WebSocketTransport};
//!
//! let options = GatewayOptions::from_config(&config)?;
//! let transport = Arc::new(WebSocketTransport::from_config(&config.gateway));
//! let dispatch = EventDispatchQueue::new(DispatchMode::default(), handler);
//! let gateway = GatewaySession::start(options, transport, dispatch, rest.global_gate().clone());
//! gateway.wait_until_ready().await?;
//! ```

pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use dispatch::{
    CloseCause, Delivery, DispatchMode, EventDispatchQueue, EventHandler, GatewayEvent, NextStep,
    NoopHandler,
};
pub use error::{GatewayError, GatewayResult};
pub use protocol::{GatewayMessage, OpCode, PresenceUpdatePayload, RequestGuildMembersPayload};
pub use session::{
    Backoff, CommandLimits, GatewayHandle, GatewayOptions, GatewaySession, SessionState,
};
pub use transport::{CloseInfo, Transport, TransportEvent, WebSocketTransport};
