//! # chat-core
//!
//! Value types shared by the gateway, REST and cache layers of the client.
//! This crate performs no IO and has no runtime dependencies.

pub mod value_objects;

pub use value_objects::{Intents, InvalidShard, ShardInfo, Snowflake, SnowflakeParseError};
