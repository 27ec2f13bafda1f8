//! Configuration structs

mod client_config;

pub use client_config::{
    AppSettings, AuthConfig, CacheConfig, ClientConfig, ConfigError, DispatchKind, Environment,
    GatewayConfig, RestConfig, RetrySettings, ShardConfig,
};
