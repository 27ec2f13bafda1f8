//! # chat-common
//!
//! Shared utilities for the client crates: configuration, the typed client
//! error, and telemetry setup.

pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppSettings, AuthConfig, CacheConfig, ClientConfig, ConfigError, DispatchKind, Environment,
    GatewayConfig, RestConfig, RetrySettings, ShardConfig,
};
pub use error::{ClientError, ClientResult};
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
