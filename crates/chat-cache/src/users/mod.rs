//! Shared, reference-counted user records

mod shared_user;

pub use shared_user::{SharedUserRegistry, UserHandle, UserProfile};
