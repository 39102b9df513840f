//! Transactional storage boundary of the hold engine.
//!
//! This module defines the one seam where the engine talks to external
//! storage, without making any assumptions about the backing database. The
//! engine only needs point lookups and conditional updates on inventory
//! counter rows, insert/lookup of hold and hold-item rows, and a
//! transaction-scoped lock-timeout setter.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryHoldStore;
pub use r#trait::{HoldStore, HoldTx, StoreError};
