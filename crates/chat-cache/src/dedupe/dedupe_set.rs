//! Fixed-capacity set of recently seen keys with FIFO eviction.
//!
//! Used by the gateway to drop events the server redelivers after a resume
//! race. Keys are natural event keys (event type + entity id), not sequence
//! numbers, since sequence numbers restart with every new session.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Default number of keys remembered
pub const DEFAULT_DEDUPE_CAPACITY: usize = 16;

struct DedupeInner<K> {
    seen: HashSet<K>,
    order: VecDeque<K>,
}

/// Small insertion-ordered dedupe set
pub struct DedupeSet<K = String> {
    capacity: usize,
    inner: Mutex<DedupeInner<K>>,
}

impl<K> DedupeSet<K>
where
    K: Eq + Hash + Clone,
{
    /// Create a set remembering at most `capacity` keys (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(DedupeInner {
                seen: HashSet::with_capacity(capacity + 1),
                order: VecDeque::with_capacity(capacity + 1),
            }),
        }
    }

    /// Insert `key` unless already present.
    ///
    /// Returns `false` (and inserts nothing) for a duplicate. Inserting past
    /// capacity evicts the single oldest key.
    pub fn try_add(&self, key: K) -> bool {
        let mut inner = self.inner.lock();
        if inner.seen.contains(&key) {
            return false;
        }

        inner.seen.insert(key.clone());
        inner.order.push_back(key);

        if inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.seen.clear();
        inner.order.clear();
    }
}

impl<K> Default for DedupeSet<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_DEDUPE_CAPACITY)
    }
}

impl<K> std::fmt::Debug for DedupeSet<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupeSet")
            .field("capacity", &self.capacity)
            .field("len", &self.inner.lock().order.len())
            .finish()
    }
}
