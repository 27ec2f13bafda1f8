//! Session construction parameters

use super::backoff::Backoff;
use super::limits::CommandLimits;
use crate::protocol::{IdentifyPayload, IdentifyProperties, PresenceUpdatePayload};
use chat_cache::DEFAULT_DEDUPE_CAPACITY;
use chat_common::{ClientConfig, ConfigError};
use chat_core::Intents;

/// Everything a [`GatewaySession`](super::GatewaySession) needs besides its collaborators
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// URL for fresh identifies; resumes use the URL from READY when given
    pub url: String,
    pub identify: IdentifyPayload,
    pub backoff: Backoff,
    pub max_reconnect_failures: u32,
    pub dedupe_capacity: usize,
    pub limits: CommandLimits,
}

impl GatewayOptions {
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>, intents: Intents) -> Self {
        Self {
            url: url.into(),
            identify: IdentifyPayload::new(token, intents),
            backoff: Backoff::default(),
            max_reconnect_failures: 10,
            dedupe_capacity: DEFAULT_DEDUPE_CAPACITY,
            limits: CommandLimits::default(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let gateway = &config.gateway;
        let identify = IdentifyPayload::new(config.auth.token.clone(), gateway.intents())
            .with_shard(config.shard.shard_info()?);

        Ok(Self {
            url: gateway.url.clone(),
            identify: IdentifyPayload {
                properties: IdentifyProperties::new(config.app.name.clone()),
                ..identify
            },
            backoff: Backoff::new(gateway.reconnect_base_delay(), gateway.reconnect_max_delay()),
            max_reconnect_failures: gateway.max_reconnect_failures,
            dedupe_capacity: gateway.dedupe_capacity,
            limits: CommandLimits::default(),
        })
    }

    #[must_use]
    pub fn with_presence(mut self, presence: PresenceUpdatePayload) -> Self {
        self.identify = self.identify.with_presence(presence);
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: CommandLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_failures(mut self, max: u32) -> Self {
        self.max_reconnect_failures = max;
        self
    }
}
