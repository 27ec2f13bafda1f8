//! Dedupe set for redelivered gateway events

mod dedupe_set;

pub use dedupe_set::{DedupeSet, DEFAULT_DEDUPE_CAPACITY};
