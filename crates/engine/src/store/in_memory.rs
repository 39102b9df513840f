use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockhold_core::{HoldId, ShopId};

use super::r#trait::{HoldStore, HoldTx, StoreError};
use crate::types::{HoldStatus, InventoryHold, InventoryHoldItem, InventoryItem};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ItemKey {
    shop_id: ShopId,
    sku: String,
    variant_key: String,
}

impl ItemKey {
    fn new(shop_id: &ShopId, sku: &str, variant_key: &str) -> Self {
        Self {
            shop_id: shop_id.clone(),
            sku: sku.to_string(),
            variant_key: variant_key.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemState {
    items: HashMap<ItemKey, InventoryItem>,
    holds: HashMap<HoldId, InventoryHold>,
    hold_items: HashMap<HoldId, Vec<InventoryHoldItem>>,
}

/// In-memory transactional hold store.
///
/// Intended for tests/dev. Transactions are fully serialized behind one async
/// mutex: `begin` waits up to the acquire timeout for the previous transaction
/// to finish and then fails with a lock-timeout error that the busy classifier
/// recognizes, mimicking a row-lock wait bound. Writes land on a working copy
/// and become visible only on commit.
#[derive(Debug, Clone)]
pub struct InMemoryHoldStore {
    state: Arc<Mutex<MemState>>,
    acquire_timeout: Duration,
}

impl Default for InMemoryHoldStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHoldStore {
    pub fn new() -> Self {
        Self::with_acquire_timeout(Duration::from_secs(5))
    }

    /// Store whose transactions give up after `timeout` when another
    /// transaction is open. Useful for driving the busy path in tests.
    pub fn with_acquire_timeout(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState::default())),
            acquire_timeout: timeout,
        }
    }

    /// Seed or replace an inventory counter row (provisioning stand-in).
    pub async fn put_item(&self, item: InventoryItem) {
        let key = ItemKey::new(&item.shop_id, &item.sku, &item.variant_key);
        self.state.lock().await.items.insert(key, item);
    }

    /// Delete a counter row, simulating external provisioning removing it
    /// while a hold is open.
    pub async fn remove_item(&self, shop_id: &ShopId, sku: &str, variant_key: &str) {
        self.state
            .lock()
            .await
            .items
            .remove(&ItemKey::new(shop_id, sku, variant_key));
    }

    /// Committed quantity of a counter row, for assertions.
    pub async fn item_quantity(
        &self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
    ) -> Option<i64> {
        let state = self.state.lock().await;
        state
            .items
            .get(&ItemKey::new(shop_id, sku, variant_key))
            .map(|item| item.quantity)
    }

    /// Committed state of a hold row, for assertions.
    pub async fn hold_snapshot(&self, hold_id: HoldId) -> Option<InventoryHold> {
        self.state.lock().await.holds.get(&hold_id).cloned()
    }

    /// Committed hold-item rows, for assertions.
    pub async fn hold_item_snapshot(&self, hold_id: HoldId) -> Vec<InventoryHoldItem> {
        self.state
            .lock()
            .await
            .hold_items
            .get(&hold_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl HoldStore for InMemoryHoldStore {
    async fn begin(&self) -> Result<Box<dyn HoldTx>, StoreError> {
        let guard = tokio::time::timeout(self.acquire_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| {
                StoreError::query_with_code(
                    "55P03",
                    "lock timeout while opening inventory transaction",
                )
            })?;
        let work = guard.clone();
        Ok(Box::new(InMemoryTx { guard, work }))
    }

    async fn shops_with_expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ShopId>, StoreError> {
        let state = self.state.lock().await;
        let mut shops: Vec<ShopId> = state
            .holds
            .values()
            .filter(|hold| hold.status == HoldStatus::Active && hold.expires_at <= now)
            .map(|hold| hold.shop_id.clone())
            .collect();
        shops.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        shops.dedup();
        Ok(shops)
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<MemState>,
    work: MemState,
}

#[async_trait]
impl HoldTx for InMemoryTx {
    async fn set_lock_timeout(&mut self, _timeout: Duration) -> Result<(), StoreError> {
        // Lock waiting is bounded at `begin` here; nothing to scope per
        // statement.
        Ok(())
    }

    async fn inventory_item(
        &mut self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
    ) -> Result<Option<InventoryItem>, StoreError> {
        Ok(self
            .work
            .items
            .get(&ItemKey::new(shop_id, sku, variant_key))
            .cloned())
    }

    async fn try_decrement(
        &mut self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
        amount: i64,
    ) -> Result<bool, StoreError> {
        match self.work.items.get_mut(&ItemKey::new(shop_id, sku, variant_key)) {
            Some(item) if item.quantity >= amount => {
                item.quantity -= amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment(
        &mut self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
        amount: i64,
    ) -> Result<bool, StoreError> {
        match self.work.items.get_mut(&ItemKey::new(shop_id, sku, variant_key)) {
            Some(item) => {
                item.quantity += amount;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_item(&mut self, item: &InventoryItem) -> Result<(), StoreError> {
        let key = ItemKey::new(&item.shop_id, &item.sku, &item.variant_key);
        self.work
            .items
            .entry(key)
            .and_modify(|existing| existing.quantity += item.quantity)
            .or_insert_with(|| item.clone());
        Ok(())
    }

    async fn insert_hold(&mut self, hold: &InventoryHold) -> Result<(), StoreError> {
        if self.work.holds.contains_key(&hold.id) {
            return Err(StoreError::query_with_code(
                "23505",
                format!("duplicate hold id {}", hold.id),
            ));
        }
        self.work.holds.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn hold(&mut self, hold_id: HoldId) -> Result<Option<InventoryHold>, StoreError> {
        Ok(self.work.holds.get(&hold_id).cloned())
    }

    async fn transition_hold(
        &mut self,
        shop_id: &ShopId,
        hold_id: HoldId,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(hold) = self.work.holds.get_mut(&hold_id) else {
            return Ok(false);
        };
        if hold.shop_id != *shop_id || hold.status != HoldStatus::Active {
            return Ok(false);
        }
        hold.status = to;
        match to {
            HoldStatus::Committed => hold.committed_at = Some(at),
            HoldStatus::Released => hold.released_at = Some(at),
            HoldStatus::Expired => hold.expired_at = Some(at),
            HoldStatus::Active => {
                return Err(StoreError::query("invalid transition back to active"));
            }
        }
        Ok(true)
    }

    async fn update_expiry(
        &mut self,
        shop_id: &ShopId,
        hold_id: HoldId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.work.holds.get_mut(&hold_id) {
            Some(hold) if hold.shop_id == *shop_id && hold.status == HoldStatus::Active => {
                hold.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_hold_items(&mut self, items: &[InventoryHoldItem]) -> Result<(), StoreError> {
        for item in items {
            self.work
                .hold_items
                .entry(item.hold_id)
                .or_default()
                .push(item.clone());
        }
        Ok(())
    }

    async fn hold_items(&mut self, hold_id: HoldId) -> Result<Vec<InventoryHoldItem>, StoreError> {
        Ok(self
            .work
            .hold_items
            .get(&hold_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn expired_holds(
        &mut self,
        shop_id: &ShopId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<InventoryHold>, StoreError> {
        let mut expired: Vec<InventoryHold> = self
            .work
            .holds
            .values()
            .filter(|hold| {
                hold.shop_id == *shop_id
                    && hold.status == HoldStatus::Active
                    && hold.expires_at <= now
            })
            .cloned()
            .collect();
        expired.sort_by_key(|hold| hold.expires_at);
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut guard = this.guard;
        *guard = this.work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Dropping the guard discards the working copy.
        Ok(())
    }
}
