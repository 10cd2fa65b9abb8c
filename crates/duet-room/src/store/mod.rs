//! Synchronized hierarchical store used for presence, messages and call
//! signaling.
//!
//! Everything above this module talks to a `SharedStore` trait object, so a
//! hosted backend can replace the in-process `MemoryStore` without touching
//! room or call logic.

mod memory;
mod path;
mod types;

pub use memory::{MemoryConnection, MemoryStore};
pub use types::{SharedStore, StoreError, StoreResult, StoreWatch};
