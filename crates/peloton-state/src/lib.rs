//! Persistent state for the Peloton scheduler.
//!
//! The store is the source of truth: in-memory component state is a cache
//! rebuilt from here on startup, before any scheduling decision is made.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
