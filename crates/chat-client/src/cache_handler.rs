//! Keeps the message cache and shared user records in step with dispatches
//!
//! Wraps the application's handler: caches are updated first, then the
//! event is forwarded unchanged.

use async_trait::async_trait;
use chat_cache::{MessageCache, SharedUserRegistry, UserHandle, UserProfile};
use chat_core::Snowflake;
use chat_gateway::{CloseCause, EventHandler, GatewayEvent};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// A cached message; holds a reference on its author's shared record
#[derive(Debug)]
pub struct StoredMessage {
    pub author: Option<UserHandle>,
    pub data: Value,
}

impl StoredMessage {
    pub fn content(&self) -> Option<&str> {
        self.data.get("content").and_then(Value::as_str)
    }
}

/// Cache-maintaining wrapper around an application handler
pub struct CachingHandler {
    inner: Arc<dyn EventHandler>,
    messages: Arc<MessageCache<StoredMessage>>,
    users: SharedUserRegistry,
}

impl CachingHandler {
    pub fn new(
        inner: Arc<dyn EventHandler>,
        messages: Arc<MessageCache<StoredMessage>>,
        users: SharedUserRegistry,
    ) -> Self {
        Self {
            inner,
            messages,
            users,
        }
    }

    fn apply(&self, event: &GatewayEvent) {
        match event.kind.as_str() {
            "MESSAGE_CREATE" => self.message_created(&event.data),
            "MESSAGE_UPDATE" => self.message_updated(&event.data),
            "MESSAGE_DELETE" => {
                if let Some(id) = snowflake(&event.data, "id") {
                    self.messages.remove(id);
                }
            }
            "USER_UPDATE" => {
                if let Some(profile) = profile(&event.data) {
                    self.users.update(profile.id, |user| *user = profile.clone());
                }
            }
            _ => {}
        }
    }

    fn message_created(&self, data: &Value) {
        let Some(id) = snowflake(data, "id") else {
            tracing::debug!("MESSAGE_CREATE without an id, not cached");
            return;
        };
        let timestamp = data
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or_else(|| id.created_at(), |t| t.with_timezone(&Utc));

        let author = data.get("author").and_then(profile).map(|profile| {
            let handle = self.users.get_or_create(profile.id, || profile.clone());
            *handle.write() = profile;
            handle
        });

        let stored = StoredMessage {
            author,
            data: data.clone(),
        };
        if !self.messages.add(id, timestamp, stored) {
            tracing::trace!(message_id = %id, "Message already cached");
        }
    }

    /// Merge partial update fields into the cached copy
    fn message_updated(&self, data: &Value) {
        let Some(id) = snowflake(data, "id") else {
            return;
        };
        let Some(existing) = self.messages.get(id) else {
            return;
        };

        let mut merged = existing.data.clone();
        if let (Some(target), Some(fields)) = (merged.as_object_mut(), data.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        self.messages.replace(
            id,
            StoredMessage {
                author: existing.author.clone(),
                data: merged,
            },
        );
    }
}

fn snowflake(data: &Value, field: &str) -> Option<Snowflake> {
    serde_json::from_value(data.get(field)?.clone()).ok()
}

fn profile(data: &Value) -> Option<UserProfile> {
    serde_json::from_value(data.clone()).ok()
}

#[async_trait]
impl EventHandler for CachingHandler {
    async fn on_event(&self, event: GatewayEvent) {
        self.apply(&event);
        self.inner.on_event(event).await;
    }

    async fn on_connected(&self, resumed: bool) {
        self.inner.on_connected(resumed).await;
    }

    async fn on_closed(&self, cause: CloseCause) {
        self.inner.on_closed(cause).await;
    }
}

impl std::fmt::Debug for CachingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingHandler")
            .field("messages", &self.messages)
            .field("users", &self.users)
            .finish()
    }
}
