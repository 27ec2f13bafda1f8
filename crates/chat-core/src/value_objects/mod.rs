//! Value objects - small immutable types shared by every layer of the client

mod intents;
mod shard;
mod snowflake;

pub use intents::Intents;
pub use shard::{InvalidShard, ShardInfo};
pub use snowflake::{Snowflake, SnowflakeParseError};
