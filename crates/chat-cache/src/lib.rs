//! # chat-cache
//!
//! Bounded in-memory caches used by the client runtime.
//!
//! ## Features
//!
//! - **Dedupe**: Fixed-capacity "seen recently" set for dropping repeated dispatches
//! - **Messages**: Recent-message cache with strict arrival-order eviction
//! - **Users**: Reference-counted user records shared between entities
//!
//! ## Example
//!
//! ```ignore
//! use chat_cache::{DedupeSet, MessageCache, SharedUserRegistry, UserProfile};
//!
//! let seen = DedupeSet::new(1000);
//! if seen.try_add(format!("MESSAGE_CREATE:{id}")) {
//!     messages.add(id, timestamp, message);
//! }
//!
//! let author = users.get_or_create(author_id, || UserProfile::new(author_id, name));
//! ```

pub mod dedupe;
pub mod messages;
pub mod users;

pub use dedupe::{DedupeSet, DEFAULT_DEDUPE_CAPACITY};
pub use messages::{CachedMessage, MessageCache, DEFAULT_MESSAGE_CAPACITY};
pub use users::{SharedUserRegistry, UserHandle, UserProfile};
