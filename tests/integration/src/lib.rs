//! Integration test support
//!
//! In-process fake gateway and REST servers plus small event recorders.

pub mod helpers;

pub use helpers::*;
