//! # chat-client
//!
//! One entry point over the REST channel, the gateway session, and the
//! in-memory caches, all built from a single [`ClientConfig`](chat_common::ClientConfig).
//!
//! ## Example
//!
//! ```ignore
//! use chat_client::ChatClient;
//!
//! let config = ClientConfig::from_env()?;
//! let client = ChatClient::start(&config, Arc::new(MyHandler))?;
//! client.wait_until_ready().await?;
//!
//! let me: serde_json::Value = client.rest().get(Route::fixed("/users/@me")).await?;
//! ```

pub mod cache_handler;
pub mod client;

pub use cache_handler::{CachingHandler, StoredMessage};
pub use client::ChatClient;
