//! Application callback seam

use super::{CloseCause, GatewayEvent};
use async_trait::async_trait;

/// Receives session output in server order, one call at a time
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn on_event(&self, event: GatewayEvent);

    /// Handshake completed; `resumed` is false for a fresh identify
    async fn on_connected(&self, _resumed: bool) {}

    async fn on_closed(&self, _cause: CloseCause) {}
}

/// Handler that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {
    async fn on_event(&self, _event: GatewayEvent) {}
}
