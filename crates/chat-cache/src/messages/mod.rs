//! Recent-message cache

mod message_cache;

pub use message_cache::{CachedMessage, MessageCache, DEFAULT_MESSAGE_CAPACITY};
