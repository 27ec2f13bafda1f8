//! Heartbeat ack tracking and latency

use std::time::Duration;
use tokio::time::Instant;

/// Tracks the outstanding heartbeat of one connection
#[derive(Debug, Default, Clone)]
pub struct HeartbeatTracker {
    interval: Option<Duration>,
    /// Send time of the heartbeat still waiting for its ack
    pending_since: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for a new connection; forgets any outstanding heartbeat
    pub fn start(&mut self, interval: Duration) {
        self.interval = Some(interval);
        self.pending_since = None;
    }

    pub fn stop(&mut self) {
        self.interval = None;
        self.pending_since = None;
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// A heartbeat sent earlier has not been acked yet
    pub fn is_awaiting_ack(&self) -> bool {
        self.pending_since.is_some()
    }

    pub fn record_sent(&mut self, at: Instant) {
        self.pending_since = Some(at);
    }

    /// Record the ack; returns the round trip if a heartbeat was outstanding
    pub fn record_ack(&mut self, at: Instant) -> Option<Duration> {
        let sent = self.pending_since.take()?;
        let rtt = at.saturating_duration_since(sent);
        self.latency = Some(rtt);
        Some(rtt)
    }

    /// Round trip of the last acked heartbeat
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}
