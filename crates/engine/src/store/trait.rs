use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use stockhold_core::{HoldId, ShopId};

use crate::types::{HoldStatus, InventoryHold, InventoryHoldItem, InventoryItem};

/// Storage operation error.
///
/// Carries the backend's error code (e.g. a SQLSTATE) when one exists so the
/// busy classifier can distinguish transient contention from hard failures.
/// Nothing outside the classifier inspects these internals.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store lacks the inventory capability entirely (configuration
    /// error, e.g. a closed pool). Fatal, not retryable.
    #[error("inventory backend unavailable: {0}")]
    Unavailable(String),

    /// A query or transaction control statement failed.
    #[error("{message}")]
    Query {
        /// Backend error code (SQLSTATE for SQL stores), if any.
        code: Option<String>,
        message: String,
    },
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query {
            code: None,
            message: msg.into(),
        }
    }

    pub fn query_with_code(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Query {
            code: Some(code.into()),
            message: msg.into(),
        }
    }
}

/// Transactional store the hold engine runs against.
///
/// Implementations must provide serializable-enough semantics for the
/// conditional updates on [`HoldTx`]: two transactions racing on the same
/// inventory row must not both observe the pre-decrement quantity. Row-level
/// locking (SQL) or full transaction serialization (in-memory) both qualify.
#[async_trait]
pub trait HoldStore: Send + Sync {
    /// Open a transaction scoping all hold-engine operations atomically.
    async fn begin(&self) -> Result<Box<dyn HoldTx>, StoreError>;

    /// Shops that currently have active holds past their expiry, for the
    /// standalone reaper sweep. Runs outside any transaction.
    async fn shops_with_expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ShopId>, StoreError>;
}

/// One open transaction.
///
/// Dropping a transaction without calling [`HoldTx::commit`] must discard all
/// of its writes.
#[async_trait]
pub trait HoldTx: Send {
    /// Bound how long subsequent statements may wait on a row lock before
    /// failing with a busy-classifiable error. Scoped to this transaction.
    async fn set_lock_timeout(&mut self, timeout: Duration) -> Result<(), StoreError>;

    /// Point lookup of an inventory counter row.
    async fn inventory_item(
        &mut self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
    ) -> Result<Option<InventoryItem>, StoreError>;

    /// Decrement the counter by `amount` only if the current quantity is at
    /// least `amount`. Returns whether a row changed; `false` means the guard
    /// failed (raced or insufficient) and the caller must re-read.
    async fn try_decrement(
        &mut self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
        amount: i64,
    ) -> Result<bool, StoreError>;

    /// Increment the counter of an existing row. Returns `false` when no row
    /// matched (the item was deleted out from under the hold).
    async fn increment(
        &mut self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
        amount: i64,
    ) -> Result<bool, StoreError>;

    /// Recreate a missing counter row (or add to a concurrently recreated
    /// one). Inventory provisioning is external, so rows may legitimately
    /// disappear while a hold is open.
    async fn upsert_item(&mut self, item: &InventoryItem) -> Result<(), StoreError>;

    async fn insert_hold(&mut self, hold: &InventoryHold) -> Result<(), StoreError>;

    async fn hold(&mut self, hold_id: HoldId) -> Result<Option<InventoryHold>, StoreError>;

    /// Transition a hold out of `active`, stamping the matching timestamp
    /// column. Conditional on `(id, shop_id, status = active)`; returns
    /// whether this caller won the transition.
    async fn transition_hold(
        &mut self,
        shop_id: &ShopId,
        hold_id: HoldId,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Move an active hold's deadline. Conditional on
    /// `(id, shop_id, status = active)`; returns whether a row changed.
    async fn update_expiry(
        &mut self,
        shop_id: &ShopId,
        hold_id: HoldId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn insert_hold_items(&mut self, items: &[InventoryHoldItem]) -> Result<(), StoreError>;

    async fn hold_items(&mut self, hold_id: HoldId) -> Result<Vec<InventoryHoldItem>, StoreError>;

    /// Active holds in the shop with `expires_at <= now`, soonest-expired
    /// first, at most `limit`.
    async fn expired_holds(
        &mut self,
        shop_id: &ShopId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<InventoryHold>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> HoldStore for Arc<S>
where
    S: HoldStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn HoldTx>, StoreError> {
        (**self).begin().await
    }

    async fn shops_with_expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ShopId>, StoreError> {
        (**self).shops_with_expired_holds(now).await
    }
}
