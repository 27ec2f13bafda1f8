//! Client facade

use crate::cache_handler::{CachingHandler, StoredMessage};
use chat_cache::{MessageCache, SharedUserRegistry};
use chat_common::{ClientConfig, ClientError, ClientResult};
use chat_gateway::{
    DispatchMode, EventDispatchQueue, EventHandler, GatewayHandle, GatewayOptions, GatewaySession,
    SessionState, Transport, WebSocketTransport,
};
use chat_rest::{RequestQueue, RestClient, RestTransport};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// REST channel, gateway session, and caches sharing one configuration
pub struct ChatClient {
    rest: RestClient,
    gateway: GatewayHandle,
    messages: Arc<MessageCache<StoredMessage>>,
    users: SharedUserRegistry,
    background: Vec<JoinHandle<()>>,
}

impl ChatClient {
    /// Build everything from `config` and start connecting.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(config: &ClientConfig, handler: Arc<dyn EventHandler>) -> ClientResult<Self> {
        let rest = RestClient::new(&config.rest, &config.auth.token)?;
        let transport = Arc::new(WebSocketTransport::from_config(&config.gateway));
        Self::assemble(config, handler, rest, transport)
    }

    /// Same as [`start`](Self::start) over caller-supplied transports
    pub fn start_with(
        config: &ClientConfig,
        handler: Arc<dyn EventHandler>,
        rest_transport: Arc<dyn RestTransport>,
        gateway_transport: Arc<dyn Transport>,
    ) -> ClientResult<Self> {
        let rest = RestClient::with_transport(&config.rest, rest_transport);
        Self::assemble(config, handler, rest, gateway_transport)
    }

    fn assemble(
        config: &ClientConfig,
        handler: Arc<dyn EventHandler>,
        rest: RestClient,
        transport: Arc<dyn Transport>,
    ) -> ClientResult<Self> {
        let options = GatewayOptions::from_config(config)?;

        let messages = Arc::new(MessageCache::new(config.cache.message_capacity));
        let users = SharedUserRegistry::new();
        let handler = Arc::new(CachingHandler::new(
            handler,
            Arc::clone(&messages),
            users.clone(),
        ));
        let dispatch = EventDispatchQueue::new(
            DispatchMode::from_config(
                config.gateway.dispatch_mode,
                config.gateway.dispatch_capacity,
            ),
            handler,
        );

        let gateway = GatewaySession::start(
            options,
            transport,
            dispatch,
            Arc::clone(rest.global_gate()),
        );

        let ttl = config.rest.bucket_idle_ttl();
        let background = vec![
            rest.queue().spawn_cleanup(ttl, ttl),
            tokio::spawn(close_queue_when_session_ends(
                gateway.clone(),
                Arc::clone(rest.queue()),
            )),
        ];

        tracing::info!(
            app = %config.app.name,
            gateway = %config.gateway.url,
            api = %config.rest.base_url,
            "Client started"
        );

        Ok(Self {
            rest,
            gateway,
            messages,
            users,
            background,
        })
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn gateway(&self) -> &GatewayHandle {
        &self.gateway
    }

    pub fn messages(&self) -> &Arc<MessageCache<StoredMessage>> {
        &self.messages
    }

    pub fn users(&self) -> &SharedUserRegistry {
        &self.users
    }

    pub fn state(&self) -> SessionState {
        self.gateway.state()
    }

    pub async fn wait_until_ready(&self) -> ClientResult<()> {
        self.gateway.wait_until_ready().await
    }

    /// Close the gateway, fail outstanding requests, and stop background tasks
    pub async fn shutdown(self) {
        self.gateway.shutdown().await;
        if !self.rest.queue().is_closed() {
            self.rest
                .queue()
                .close(ClientError::transport_closed("client shut down"));
        }
        for task in self.background {
            task.abort();
        }
        tracing::info!("Client stopped");
    }
}

/// Session-wide failures reach every pending REST caller
async fn close_queue_when_session_ends(gateway: GatewayHandle, queue: Arc<RequestQueue>) {
    let state = gateway.closed().await;
    let reason = match state {
        SessionState::Fatal => ClientError::SessionFatal(
            gateway
                .fatal_reason()
                .unwrap_or_else(|| "session failed".to_string()),
        ),
        _ => ClientError::transport_closed("session closed"),
    };
    queue.close(reason);
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("state", &self.state())
            .field("rest", &self.rest)
            .field("messages", &self.messages.len())
            .field("users", &self.users.len())
            .finish()
    }
}
