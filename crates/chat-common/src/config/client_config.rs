//! Client configuration structs
//!
//! Loads configuration from environment variables, falling back to defaults
//! for everything except the auth token.

use chat_core::{Intents, ShardInfo};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    pub rest: RestConfig,
    pub cache: CacheConfig,
    pub shard: ShardConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Credentials sent in Identify/Resume and the REST `Authorization` header
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub token: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").field("token", &"<redacted>").finish()
    }
}

/// How decoded events reach the application handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchKind {
    /// Separate worker drains an ordered queue
    #[default]
    Queued,
    /// Handler runs on the read path
    Inline,
}

/// Gateway connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default = "default_intents")]
    pub intents: u64,
    /// Consecutive failed (re)connect attempts before the session goes Fatal
    #[serde(default = "default_max_reconnect_failures")]
    pub max_reconnect_failures: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Limit on TCP connect plus WebSocket handshake; expiry counts as a failed attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Outbound frames larger than this are split into continuation frames
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default)]
    pub dispatch_mode: DispatchKind,
    /// 0 = unbounded
    #[serde(default)]
    pub dispatch_capacity: usize,
    #[serde(default = "default_dedupe_capacity")]
    pub dedupe_capacity: usize,
}

impl GatewayConfig {
    #[must_use]
    pub fn intents(&self) -> Intents {
        Intents::from_bits_truncate(self.intents)
    }

    #[must_use]
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    #[must_use]
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            intents: default_intents(),
            max_reconnect_failures: default_max_reconnect_failures(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_frame_size: default_max_frame_size(),
            dispatch_mode: DispatchKind::default(),
            dispatch_capacity: 0,
            dedupe_capacity: default_dedupe_capacity(),
        }
    }
}

/// Per-request retry defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetrySettings {
    pub timeouts: bool,
    pub rate_limits: bool,
    pub bad_gateway: bool,
}

impl RetrySettings {
    pub const NEVER: Self = Self {
        timeouts: false,
        rate_limits: false,
        bad_gateway: false,
    };

    pub const ALWAYS: Self = Self {
        timeouts: true,
        rate_limits: true,
        bad_gateway: true,
    };
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            timeouts: false,
            rate_limits: true,
            bad_gateway: true,
        }
    }
}

impl FromStr for RetrySettings {
    type Err = ConfigError;

    /// Accepts `always`, `never`, or a comma list of `timeouts`, `ratelimit`, `502`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => return Ok(Self::ALWAYS),
            "never" | "" => return Ok(Self::NEVER),
            _ => {}
        }

        let mut settings = Self::NEVER;
        for part in s.split(',').map(str::trim) {
            match part.to_lowercase().as_str() {
                "timeouts" | "timeout" => settings.timeouts = true,
                "ratelimit" | "ratelimits" | "rate_limit" => settings.rate_limits = true,
                "502" | "bad_gateway" => settings.bad_gateway = true,
                other => {
                    return Err(ConfigError::InvalidValue(
                        "CHAT_RETRY_MODE",
                        other.to_string(),
                    ))
                }
            }
        }
        Ok(settings)
    }
}

/// REST channel settings
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Wait applied to buckets whose limits have not been learned yet
    #[serde(default = "default_preemptive_backoff_ms")]
    pub preemptive_backoff_ms: u64,
    #[serde(default = "default_bucket_idle_ttl_secs")]
    pub bucket_idle_ttl_secs: u64,
}

impl RestConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn preemptive_backoff(&self) -> Duration {
        Duration::from_millis(self.preemptive_backoff_ms)
    }

    #[must_use]
    pub fn bucket_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_ttl_secs)
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            request_timeout_ms: default_request_timeout_ms(),
            retry: RetrySettings::default(),
            preemptive_backoff_ms: default_preemptive_backoff_ms(),
            bucket_idle_ttl_secs: default_bucket_idle_ttl_secs(),
        }
    }
}

/// Bounded cache capacities
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_message_capacity")]
    pub message_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            message_capacity: default_message_capacity(),
        }
    }
}

/// Shard tokens carried in Identify
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ShardConfig {
    #[serde(default)]
    pub index: u32,
    #[serde(default = "default_shard_count")]
    pub count: u32,
}

impl ShardConfig {
    pub fn shard_info(&self) -> Result<ShardInfo, ConfigError> {
        ShardInfo::new(self.index, self.count)
            .map_err(|e| ConfigError::InvalidValue("CHAT_SHARD_INDEX", e.to_string()))
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            index: 0,
            count: default_shard_count(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "chat-client".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.example.com/?v=10&encoding=json".to_string()
}

fn default_api_url() -> String {
    "https://api.example.com/v10".to_string()
}

fn default_intents() -> u64 {
    Intents::default().bits()
}

fn default_max_reconnect_failures() -> u32 {
    10
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_frame_size() -> usize {
    4096
}

fn default_dedupe_capacity() -> usize {
    16
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_preemptive_backoff_ms() -> u64 {
    750
}

fn default_bucket_idle_ttl_secs() -> u64 {
    60
}

fn default_message_capacity() -> usize {
    100
}

fn default_shard_count() -> u32 {
    1
}

/// Read and parse an optional variable; a present but unparsable value is an error
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    /// Configuration with defaults everywhere except the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            app: AppSettings {
                name: default_app_name(),
                env: Environment::default(),
            },
            auth: AuthConfig {
                token: token.into(),
            },
            gateway: GatewayConfig::default(),
            rest: RestConfig::default(),
            cache: CacheConfig::default(),
            shard: ShardConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CHAT_TOKEN` is missing or any present variable fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let token = env::var("CHAT_TOKEN").map_err(|_| ConfigError::MissingVar("CHAT_TOKEN"))?;
        let mut config = Self::new(token);

        if let Ok(name) = env::var("CHAT_APP_NAME") {
            config.app.name = name;
        }
        config.app.env = env::var("CHAT_ENV")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "production" => Some(Environment::Production),
                "staging" => Some(Environment::Staging),
                "development" => Some(Environment::Development),
                _ => None,
            })
            .unwrap_or_default();

        let gateway = &mut config.gateway;
        if let Ok(url) = env::var("CHAT_GATEWAY_URL") {
            gateway.url = url;
        }
        if let Some(v) = parse_var("CHAT_INTENTS")? {
            gateway.intents = v;
        }
        if let Some(v) = parse_var("CHAT_MAX_RECONNECT_FAILURES")? {
            gateway.max_reconnect_failures = v;
        }
        if let Some(v) = parse_var("CHAT_RECONNECT_BASE_DELAY_MS")? {
            gateway.reconnect_base_delay_ms = v;
        }
        if let Some(v) = parse_var("CHAT_RECONNECT_MAX_DELAY_MS")? {
            gateway.reconnect_max_delay_ms = v;
        }
        if let Some(v) = parse_var("CHAT_CONNECT_TIMEOUT_MS")? {
            gateway.connect_timeout_ms = v;
        }
        if let Some(v) = parse_var("CHAT_MAX_FRAME_SIZE")? {
            gateway.max_frame_size = v;
        }
        if let Ok(mode) = env::var("CHAT_DISPATCH_MODE") {
            gateway.dispatch_mode = match mode.to_lowercase().as_str() {
                "queued" => DispatchKind::Queued,
                "inline" => DispatchKind::Inline,
                _ => return Err(ConfigError::InvalidValue("CHAT_DISPATCH_MODE", mode)),
            };
        }
        if let Some(v) = parse_var("CHAT_DISPATCH_CAPACITY")? {
            gateway.dispatch_capacity = v;
        }
        if let Some(v) = parse_var("CHAT_DEDUPE_CAPACITY")? {
            gateway.dedupe_capacity = v;
        }

        let rest = &mut config.rest;
        if let Ok(url) = env::var("CHAT_API_URL") {
            rest.base_url = url;
        }
        if let Some(v) = parse_var("CHAT_REQUEST_TIMEOUT_MS")? {
            rest.request_timeout_ms = v;
        }
        if let Some(v) = parse_var("CHAT_RETRY_MODE")? {
            rest.retry = v;
        }
        if let Some(v) = parse_var("CHAT_PREEMPTIVE_BACKOFF_MS")? {
            rest.preemptive_backoff_ms = v;
        }
        if let Some(v) = parse_var("CHAT_BUCKET_IDLE_TTL_SECS")? {
            rest.bucket_idle_ttl_secs = v;
        }

        if let Some(v) = parse_var("CHAT_MESSAGE_CACHE_SIZE")? {
            config.cache.message_capacity = v;
        }

        if let Some(v) = parse_var("CHAT_SHARD_INDEX")? {
            config.shard.index = v;
        }
        if let Some(v) = parse_var("CHAT_SHARD_COUNT")? {
            config.shard.count = v;
        }
        config.shard.shard_info()?;

        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
