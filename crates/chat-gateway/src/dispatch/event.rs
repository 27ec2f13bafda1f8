//! What the application handler receives

use serde_json::Value;
use std::fmt;

/// A decoded dispatch frame
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    /// Event type name, e.g. `MESSAGE_CREATE`
    pub kind: String,
    pub sequence: Option<u64>,
    pub data: Value,
}

impl GatewayEvent {
    #[must_use]
    pub fn new(kind: impl Into<String>, sequence: Option<u64>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            sequence,
            data,
        }
    }

    /// Natural key for redelivery detection: `TYPE:id` for creation events.
    ///
    /// Other events have no stable identity and are never deduplicated.
    #[must_use]
    pub fn dedupe_key(&self) -> Option<String> {
        if !self.kind.ends_with("_CREATE") {
            return None;
        }
        let id = self.data.get("id")?;
        let id = match id {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(format!("{}:{id}", self.kind))
    }
}

/// What the session does after a connection ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Resume,
    Reidentify,
    Fatal,
    Shutdown,
}

/// Cause passed to `on_closed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseCause {
    pub code: Option<u16>,
    pub reason: String,
    pub next: NextStep,
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({code}), next: {:?}", self.reason, self.next),
            None => write!(f, "{}, next: {:?}", self.reason, self.next),
        }
    }
}
