//! `stockhold-engine` — transactional inventory hold engine.
//!
//! Lets a checkout flow provisionally claim stock before payment completes
//! without overselling and without permanently locking stock when the buyer
//! walks away. Quantities are guarded by conditional decrements inside store
//! transactions; abandoned holds are reclaimed by TTL-based expiry.
//!
//! The engine is parameterized over a [`store::HoldStore`]; production wiring
//! lives in `stockhold-infra`, tests run against
//! [`store::InMemoryHoldStore`].

pub mod classify;
pub mod config;
pub mod error;
pub mod manager;
pub mod normalize;
pub mod reaper;
pub mod store;
pub mod types;
pub mod variant;

mod integration_tests;

pub use config::HoldConfig;
pub use error::{HoldError, HoldResult};
pub use manager::{CreateHoldOptions, HoldManager};
pub use normalize::{normalize_requests, NormalizedLine};
pub use reaper::release_expired_holds;
pub use store::{HoldStore, HoldTx, InMemoryHoldStore, StoreError};
pub use types::{
    CreatedHold, ExtendOutcome, HoldRequest, HoldStatus, InsufficientLine, InventoryHold,
    InventoryHoldItem, InventoryItem, ReleaseOutcome,
};
pub use variant::variant_key;
