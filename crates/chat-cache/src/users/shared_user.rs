//! Reference-counted shared user records.
//!
//! Many higher-level entities (members, message authors, DM recipients)
//! point at the same user. Each holder owns a [`UserHandle`]; the record
//! leaves the registry exactly when the last handle is dropped.
//!
//! Find-or-create-and-increment and decrement-and-maybe-remove each run
//! under the map shard lock for that ID, so a record is never removed while
//! a concurrent `get_or_create` for the same ID is in flight.

use chat_core::Snowflake;
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Mutable profile fields of a user shared across entities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl UserProfile {
    #[must_use]
    pub fn new(id: Snowflake, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            ..Self::default()
        }
    }

    /// Name shown in clients: global display name if set, else username
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

struct Slot<T> {
    record: Arc<RwLock<T>>,
    refs: usize,
}

struct RegistryInner<T> {
    records: DashMap<Snowflake, Slot<T>>,
}

impl<T> RegistryInner<T> {
    /// Decrement and remove at zero, atomically for this ID.
    fn release(&self, id: Snowflake) -> bool {
        let removed = self
            .records
            .remove_if_mut(&id, |_, slot| {
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs == 0
            })
            .is_some();

        if removed {
            tracing::trace!(user_id = %id, "Released last reference to shared user");
        }
        removed
    }
}

/// Registry of shared user records keyed by user ID
pub struct SharedUserRegistry<T = UserProfile> {
    inner: Arc<RegistryInner<T>>,
}

impl<T> SharedUserRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                records: DashMap::new(),
            }),
        }
    }

    /// Take a reference to the record for `id`, creating it with `factory` if absent.
    ///
    /// `factory` runs while the shard for `id` is locked and must not call
    /// back into this registry.
    pub fn get_or_create<F>(&self, id: Snowflake, factory: F) -> UserHandle<T>
    where
        F: FnOnce() -> T,
    {
        let record = {
            let mut slot = self.inner.records.entry(id).or_insert_with(|| {
                tracing::trace!(user_id = %id, "Created shared user record");
                Slot {
                    record: Arc::new(RwLock::new(factory())),
                    refs: 0,
                }
            });
            slot.refs += 1;
            Arc::clone(&slot.record)
        };

        UserHandle {
            id,
            record,
            registry: Some(Arc::clone(&self.inner)),
        }
    }

    /// Take a reference to an existing record without creating one
    pub fn get(&self, id: Snowflake) -> Option<UserHandle<T>> {
        let record = {
            let mut slot = self.inner.records.get_mut(&id)?;
            slot.refs += 1;
            Arc::clone(&slot.record)
        };

        Some(UserHandle {
            id,
            record,
            registry: Some(Arc::clone(&self.inner)),
        })
    }

    /// Drop a handle explicitly; returns `true` if it was the last reference
    pub fn release(&self, handle: UserHandle<T>) -> bool {
        handle.release()
    }

    /// Mutate a live record in place; returns `false` if nobody holds it
    pub fn update<F>(&self, id: Snowflake, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        // Clone the Arc out so the shard lock is not held while writing
        let record = match self.inner.records.get(&id) {
            Some(slot) => Arc::clone(&slot.record),
            None => return false,
        };
        f(&mut record.write());
        true
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.inner.records.contains_key(&id)
    }

    /// Current number of live handles for `id` (0 when absent)
    pub fn ref_count(&self, id: Snowflake) -> usize {
        self.inner.records.get(&id).map_or(0, |slot| slot.refs)
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }
}

impl<T> Default for SharedUserRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SharedUserRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for SharedUserRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedUserRegistry")
            .field("records", &self.inner.records.len())
            .finish()
    }
}

/// Counted handle to a shared record; dropping it releases the reference
pub struct UserHandle<T = UserProfile> {
    id: Snowflake,
    record: Arc<RwLock<T>>,
    /// `None` once the reference has been released explicitly
    registry: Option<Arc<RegistryInner<T>>>,
}

impl<T> UserHandle<T> {
    pub fn id(&self) -> Snowflake {
        self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.record.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.record.write()
    }

    /// Release now; returns `true` if this was the last reference
    pub fn release(mut self) -> bool {
        self.registry
            .take()
            .is_some_and(|registry| registry.release(self.id))
    }
}

impl<T> Clone for UserHandle<T> {
    fn clone(&self) -> Self {
        if let Some(registry) = &self.registry {
            if let Some(mut slot) = registry.records.get_mut(&self.id) {
                slot.refs += 1;
            }
        }
        Self {
            id: self.id,
            record: Arc::clone(&self.record),
            registry: self.registry.clone(),
        }
    }
}

impl<T> Drop for UserHandle<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.release(self.id);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for UserHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserHandle")
            .field("id", &self.id)
            .field("record", &*self.record.read())
            .finish()
    }
}
