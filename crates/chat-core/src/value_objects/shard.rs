//! Shard identity carried in Identify

use serde::{Deserialize, Serialize};
use std::fmt;

/// `[index, count]` pair; the client only carries it, it does not coordinate shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardInfo {
    index: u32,
    count: u32,
}

/// Shard index must be smaller than shard count
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid shard {index} of {count}")]
pub struct InvalidShard {
    pub index: u32,
    pub count: u32,
}

impl ShardInfo {
    /// Single-shard session
    pub const ONE: Self = Self { index: 0, count: 1 };

    pub fn new(index: u32, count: u32) -> Result<Self, InvalidShard> {
        if count == 0 || index >= count {
            return Err(InvalidShard { index, count });
        }
        Ok(Self { index, count })
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn count(self) -> u32 {
        self.count
    }
}

impl Default for ShardInfo {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for ShardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}]", self.index, self.count)
    }
}

impl Serialize for ShardInfo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        [self.index, self.count].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ShardInfo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let [index, count] = <[u32; 2]>::deserialize(deserializer)?;
        Self::new(index, count).map_err(serde::de::Error::custom)
    }
}
