//! Error types shared across the client crates

mod client_error;

pub use client_error::{ClientError, ClientResult};
