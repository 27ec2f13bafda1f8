//! Gateway frame envelope
//!
//! Every frame is `{"op", "d", "s", "t"}`; `s` and `t` are only set on dispatches.

use super::{
    HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, ReadyPayload,
    RequestGuildMembersPayload, ResumePayload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why an inbound frame was dropped
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("Unexpected payload for {op}: {reason}")]
    BadPayload { op: OpCode, reason: String },
}

/// Gateway frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayMessage {
    pub op: OpCode,

    /// Event type (dispatch only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (dispatch only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Payload; serialized as `null` when absent
    pub d: Option<Value>,
}

/// Envelope with the opcode left raw so unknown opcodes can be told apart from bad JSON
#[derive(Deserialize)]
struct RawEnvelope {
    op: u8,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    d: Option<Value>,
}

impl GatewayMessage {
    fn command<T: Serialize>(op: OpCode, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op,
            t: None,
            s: None,
            d: Some(serde_json::to_value(payload)?),
        })
    }

    // === Client frames ===

    /// Heartbeat carrying the last sequence seen (op=1)
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            op: OpCode::Heartbeat,
            t: None,
            s: None,
            d: Some(last_sequence.map_or(Value::Null, |s| Value::Number(s.into()))),
        }
    }

    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Self::command(OpCode::Identify, payload)
    }

    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Self::command(OpCode::Resume, payload)
    }

    pub fn presence_update(payload: &PresenceUpdatePayload) -> Result<Self, serde_json::Error> {
        Self::command(OpCode::PresenceUpdate, payload)
    }

    pub fn request_guild_members(
        payload: &RequestGuildMembersPayload,
    ) -> Result<Self, serde_json::Error> {
        Self::command(OpCode::RequestGuildMembers, payload)
    }

    // === Server frames ===

    /// Dispatch frame (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    /// Hello frame (op=10)
    #[must_use]
    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self {
            op: OpCode::Hello,
            t: None,
            s: None,
            d: Some(serde_json::json!({ "heartbeat_interval": heartbeat_interval_ms })),
        }
    }

    /// Payload-less server frame (HeartbeatAck, Reconnect)
    #[must_use]
    pub fn bare(op: OpCode) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d: None,
        }
    }

    /// Invalid session frame (op=9)
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self {
            op: OpCode::InvalidSession,
            t: None,
            s: None,
            d: Some(Value::Bool(resumable)),
        }
    }

    // === Parsing ===

    pub fn as_hello(&self) -> Result<HelloPayload, ProtocolError> {
        self.payload_as(OpCode::Hello)
    }

    pub fn as_ready(&self) -> Result<ReadyPayload, ProtocolError> {
        self.payload_as(OpCode::Dispatch)
    }

    /// Whether an InvalidSession frame allows resuming; missing `d` means no
    #[must_use]
    pub fn invalid_session_resumable(&self) -> bool {
        self.op == OpCode::InvalidSession
            && self.d.as_ref().and_then(Value::as_bool).unwrap_or(false)
    }

    fn payload_as<T: serde::de::DeserializeOwned>(&self, op: OpCode) -> Result<T, ProtocolError> {
        if self.op != op {
            return Err(ProtocolError::BadPayload {
                op: self.op,
                reason: format!("expected {op}"),
            });
        }
        let data = self.d.clone().unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|e| ProtocolError::BadPayload {
            op,
            reason: e.to_string(),
        })
    }

    /// Event type name of a dispatch
    pub fn event_type(&self) -> Option<&str> {
        self.t.as_deref()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Self::from_slice(json.as_bytes())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)?;
        let op = OpCode::from_u8(raw.op).ok_or(ProtocolError::UnknownOpcode(raw.op))?;
        Ok(Self {
            op,
            t: raw.t,
            s: raw.s,
            d: raw.d,
        })
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
