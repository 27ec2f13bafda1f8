//! Chat client entry point
//!
//! Run with:
//! ```bash
//! CHAT_TOKEN=... cargo run -p chat-client
//! ```
//!
//! Configuration is loaded from environment variables.

use async_trait::async_trait;
use chat_client::ChatClient;
use chat_common::{try_init_tracing_with_config, ClientConfig, TracingConfig};
use chat_gateway::{CloseCause, EventHandler, GatewayEvent, SessionState};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Logs every event
struct LogHandler;

#[async_trait]
impl EventHandler for LogHandler {
    async fn on_event(&self, event: GatewayEvent) {
        info!(event = %event.kind, seq = ?event.sequence, "Event");
    }

    async fn on_connected(&self, resumed: bool) {
        info!(resumed, "Connected");
    }

    async fn on_closed(&self, cause: CloseCause) {
        warn!(cause = %cause, "Connection closed");
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Client failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    if let Err(e) = try_init_tracing_with_config(&TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.app.env,
        shard = config.shard.index,
        shards = config.shard.count,
        "Configuration loaded"
    );

    let client = ChatClient::start(&config, Arc::new(LogHandler))?;
    let gateway = client.gateway().clone();

    let result = tokio::select! {
        state = gateway.closed() => match state {
            SessionState::Fatal => Err(anyhow::anyhow!(
                "session failed: {}",
                gateway.fatal_reason().unwrap_or_default()
            )),
            _ => Ok(()),
        },
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl-C, shutting down");
            Ok(())
        }
    };

    client.shutdown().await;
    result
}
