//! Capacity-bounded recent-message cache.
//!
//! Entries are evicted strictly by arrival order, oldest first. Reads do not
//! refresh an entry's position; this is not an LRU.

use chat_core::Snowflake;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Default number of messages kept per cache
pub const DEFAULT_MESSAGE_CAPACITY: usize = 100;

/// A cached message with its arrival metadata
#[derive(Debug)]
pub struct CachedMessage<V> {
    pub id: Snowflake,
    pub timestamp: DateTime<Utc>,
    pub value: Arc<V>,
}

impl<V> Clone for CachedMessage<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            timestamp: self.timestamp,
            value: Arc::clone(&self.value),
        }
    }
}

struct Slot<V> {
    message: CachedMessage<V>,
    /// Arrival number; matches exactly one live entry in `order`
    arrival: u64,
}

struct CacheInner<V> {
    entries: HashMap<Snowflake, Slot<V>>,
    /// Arrival queue; may hold stale `(id, arrival)` pairs left by `remove`
    order: VecDeque<(Snowflake, u64)>,
    next_arrival: u64,
}

impl<V> CacheInner<V> {
    fn evict_overflow(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            let Some((id, arrival)) = self.order.pop_front() else {
                break;
            };
            let live = self
                .entries
                .get(&id)
                .is_some_and(|slot| slot.arrival == arrival);
            if live {
                self.entries.remove(&id);
                tracing::trace!(message_id = %id, "Evicted message from cache");
            }
        }
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order.retain(|(id, arrival)| {
            entries
                .get(id)
                .is_some_and(|slot| slot.arrival == *arrival)
        });
    }
}

/// Bounded message cache keyed by message ID
pub struct MessageCache<V> {
    capacity: usize,
    inner: RwLock<CacheInner<V>>,
}

impl<V> MessageCache<V> {
    /// Create a cache holding at most `capacity` messages; 0 disables caching
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(CacheInner {
                entries: HashMap::with_capacity(capacity.min(4096)),
                order: VecDeque::with_capacity(capacity.min(4096)),
                next_arrival: 0,
            }),
        }
    }

    /// Insert a message.
    ///
    /// Returns `false` if the ID is already cached (the existing entry is kept)
    /// or caching is disabled. Inserting past capacity evicts the earliest
    /// arrival still present.
    pub fn add(&self, id: Snowflake, timestamp: DateTime<Utc>, value: V) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let mut inner = self.inner.write();
        if inner.entries.contains_key(&id) {
            return false;
        }

        let arrival = inner.next_arrival;
        inner.next_arrival += 1;
        inner.entries.insert(
            id,
            Slot {
                message: CachedMessage {
                    id,
                    timestamp,
                    value: Arc::new(value),
                },
                arrival,
            },
        );
        inner.order.push_back((id, arrival));
        inner.evict_overflow(self.capacity);
        true
    }

    /// Replace the payload of a cached message without changing its position
    pub fn replace(&self, id: Snowflake, value: V) -> bool {
        let mut inner = self.inner.write();
        match inner.entries.get_mut(&id) {
            Some(slot) => {
                slot.message.value = Arc::new(value);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Snowflake) -> Option<Arc<V>> {
        self.inner
            .read()
            .entries
            .get(&id)
            .map(|slot| Arc::clone(&slot.message.value))
    }

    pub fn get_entry(&self, id: Snowflake) -> Option<CachedMessage<V>> {
        self.inner
            .read()
            .entries
            .get(&id)
            .map(|slot| slot.message.clone())
    }

    pub fn remove(&self, id: Snowflake) -> Option<Arc<V>> {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(&id).map(|slot| slot.message.value);

        // Keep the arrival queue from growing without bound under churn
        if inner.order.len() > self.capacity.saturating_mul(2) + 16 {
            inner.compact();
        }
        removed
    }

    /// Up to `limit` cached messages with IDs strictly below `before`
    /// (or all, when `None`), newest first.
    pub fn get_many(&self, before: Option<Snowflake>, limit: usize) -> Vec<CachedMessage<V>> {
        let inner = self.inner.read();
        let mut matching: Vec<CachedMessage<V>> = inner
            .entries
            .values()
            .filter(|slot| before.map_or(true, |cursor| slot.message.id < cursor))
            .map(|slot| slot.message.clone())
            .collect();
        matching.sort_unstable_by(|a, b| b.id.cmp(&a.id));
        matching.truncate(limit);
        matching
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.inner.read().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
    }
}

impl<V> Default for MessageCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_CAPACITY)
    }
}

impl<V> std::fmt::Debug for MessageCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
