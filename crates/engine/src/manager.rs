//! Hold orchestration: create, extend, commit, release.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use stockhold_core::{HoldId, ShopId};

use crate::classify::{classify_store_error, FailureKind};
use crate::config::HoldConfig;
use crate::error::{HoldError, HoldResult};
use crate::normalize::normalize_requests;
use crate::reaper::{release_expired_holds, restore_hold_items};
use crate::store::{HoldStore, StoreError};
use crate::types::{
    CreatedHold, ExtendOutcome, HoldRequest, HoldStatus, InsufficientLine, InventoryHold,
    InventoryHoldItem, ReleaseOutcome,
};

/// Per-call knobs for [`HoldManager::create_hold`].
#[derive(Debug, Clone, Default)]
pub struct CreateHoldOptions {
    /// Hold TTL; defaults to the configured TTL, floored at the minimum.
    pub ttl: Option<Duration>,
    /// Overdue holds to reap inside this create transaction before
    /// decrementing. `Some(0)` disables the inline reap.
    pub reap_limit: Option<u32>,
}

/// The orchestrating component of the hold engine.
///
/// Provides no in-process locking of its own: all mutual exclusion is
/// delegated to the store's conditional updates plus a short transaction-local
/// lock timeout, so contention fails fast as a busy error instead of queueing.
/// Parameterized over any [`HoldStore`], injected at construction.
pub struct HoldManager<S> {
    store: S,
    config: HoldConfig,
}

impl<S: HoldStore> HoldManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, HoldConfig::default())
    }

    pub fn with_config(store: S, config: HoldConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &HoldConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Map a store failure into the caller-facing taxonomy: configuration
    /// failures stay fatal, classified contention becomes a busy error
    /// carrying the configured retry delay, everything else passes through.
    fn lift(&self, err: StoreError) -> HoldError {
        match err {
            StoreError::Unavailable(msg) => HoldError::Unavailable(msg),
            other => match classify_store_error(&other) {
                FailureKind::Busy => HoldError::Busy {
                    retry_after: self.config.retry_after,
                },
                FailureKind::Other => HoldError::Store(other),
            },
        }
    }

    /// Provisionally claim inventory for a checkout attempt.
    ///
    /// Normalizes the request, opens one transaction, opportunistically reaps
    /// overdue holds so their capacity can satisfy this very request, then
    /// conditionally decrements each line. Insufficiencies are collected
    /// across *all* lines before failing, so the caller sees the full
    /// picture. The hold row and its item rows are written in the same
    /// transaction as the decrements; there is no interim state where one is
    /// durable without the other.
    pub async fn create_hold(
        &self,
        shop: &str,
        requests: &[HoldRequest],
        options: CreateHoldOptions,
        now: DateTime<Utc>,
    ) -> HoldResult<CreatedHold> {
        let shop = ShopId::parse(shop)?;
        let lines = normalize_requests(requests);
        if lines.is_empty() {
            return Err(HoldError::MissingItems);
        }

        let ttl = self.config.clamp_ttl(options.ttl);
        let reap_limit = options.reap_limit.unwrap_or(self.config.create_reap_limit);
        let hold_id = HoldId::new();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        let mut tx = self.store.begin().await.map_err(|e| self.lift(e))?;
        tx.set_lock_timeout(self.config.lock_timeout)
            .await
            .map_err(|e| self.lift(e))?;

        if reap_limit > 0 {
            release_expired_holds(tx.as_mut(), &shop, now, reap_limit)
                .await
                .map_err(|e| self.lift(e))?;
        }

        let mut insufficient: Vec<InsufficientLine> = Vec::new();
        let mut staged: Vec<InventoryHoldItem> = Vec::new();

        for line in lines.values() {
            if line.requested <= 0 {
                continue;
            }
            let item = tx
                .inventory_item(&shop, &line.sku, &line.variant_key)
                .await
                .map_err(|e| self.lift(e))?;
            let Some(item) = item else {
                insufficient.push(InsufficientLine {
                    sku: line.sku.clone(),
                    variant_key: line.variant_key.clone(),
                    requested: line.requested,
                    available: 0,
                });
                continue;
            };
            if item.product_id.is_empty() || item.quantity < line.requested {
                insufficient.push(InsufficientLine {
                    sku: line.sku.clone(),
                    variant_key: line.variant_key.clone(),
                    requested: line.requested,
                    available: item.quantity,
                });
                continue;
            }

            let claimed = tx
                .try_decrement(&shop, &line.sku, &line.variant_key, line.requested)
                .await
                .map_err(|e| self.lift(e))?;
            if !claimed {
                // Raced between the lookup and the guard; re-read for the
                // quantity the caller should be told about.
                let fresh = tx
                    .inventory_item(&shop, &line.sku, &line.variant_key)
                    .await
                    .map_err(|e| self.lift(e))?;
                insufficient.push(InsufficientLine {
                    sku: line.sku.clone(),
                    variant_key: line.variant_key.clone(),
                    requested: line.requested,
                    available: fresh.map(|i| i.quantity).unwrap_or(0),
                });
                continue;
            }

            let variant_attributes = if line.variant_attributes.is_empty() {
                item.variant_attributes.clone()
            } else {
                line.variant_attributes.clone()
            };
            staged.push(InventoryHoldItem {
                hold_id,
                shop_id: shop.clone(),
                sku: line.sku.clone(),
                product_id: item.product_id.clone(),
                variant_key: line.variant_key.clone(),
                variant_attributes,
                quantity: line.requested,
            });
        }

        if !insufficient.is_empty() {
            tx.rollback().await.map_err(|e| self.lift(e))?;
            debug!(
                shop = %shop,
                lines = insufficient.len(),
                "hold rejected, insufficient inventory"
            );
            return Err(HoldError::insufficient(insufficient));
        }

        let hold = InventoryHold {
            id: hold_id,
            shop_id: shop.clone(),
            status: HoldStatus::Active,
            expires_at,
            created_at: now,
            committed_at: None,
            released_at: None,
            expired_at: None,
        };
        tx.insert_hold(&hold).await.map_err(|e| self.lift(e))?;
        tx.insert_hold_items(&staged)
            .await
            .map_err(|e| self.lift(e))?;
        tx.commit().await.map_err(|e| self.lift(e))?;

        info!(
            shop = %shop,
            hold_id = %hold_id,
            lines = staged.len(),
            expires_at = %expires_at,
            "created inventory hold"
        );
        Ok(CreatedHold {
            hold_id,
            expires_at,
        })
    }

    /// Push an active hold's deadline forward.
    ///
    /// The new expiry is `max(current, now) + ttl`, so repeated extends can
    /// never shrink the deadline. A non-active hold is not an error: the
    /// caller gets [`ExtendOutcome::NotActive`] with the terminal state and
    /// can branch on why the extension did not happen.
    pub async fn extend_hold(
        &self,
        shop: &str,
        hold_id: HoldId,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> HoldResult<ExtendOutcome> {
        let shop = ShopId::parse(shop)?;
        let mut tx = self.store.begin().await.map_err(|e| self.lift(e))?;
        tx.set_lock_timeout(self.config.lock_timeout)
            .await
            .map_err(|e| self.lift(e))?;

        let hold = self.load_hold(tx.as_mut(), &shop, hold_id).await?;
        if hold.status != HoldStatus::Active {
            tx.rollback().await.map_err(|e| self.lift(e))?;
            return Ok(ExtendOutcome::NotActive {
                status: hold.status,
            });
        }

        let ttl = self.config.clamp_ttl(ttl);
        let expires_at =
            hold.expires_at.max(now) + chrono::Duration::from_std(ttl).unwrap_or_default();
        let moved = tx
            .update_expiry(&shop, hold_id, expires_at)
            .await
            .map_err(|e| self.lift(e))?;
        if !moved {
            // Lost a race to a terminal transition; report where it ended up.
            let status = tx
                .hold(hold_id)
                .await
                .map_err(|e| self.lift(e))?
                .map(|h| h.status);
            tx.rollback().await.map_err(|e| self.lift(e))?;
            return match status {
                Some(status) => Ok(ExtendOutcome::NotActive { status }),
                None => Err(HoldError::NotFound),
            };
        }
        tx.commit().await.map_err(|e| self.lift(e))?;

        debug!(shop = %shop, hold_id = %hold_id, expires_at = %expires_at, "extended inventory hold");
        Ok(ExtendOutcome::Extended { expires_at })
    }

    /// Make a hold's decrement durable after payment success.
    ///
    /// Idempotent: committing an already-committed hold succeeds without side
    /// effects. Quantities are untouched — the decrement happened at creation
    /// and is intentionally durable through commit.
    pub async fn commit_hold(
        &self,
        shop: &str,
        hold_id: HoldId,
        now: DateTime<Utc>,
    ) -> HoldResult<()> {
        let shop = ShopId::parse(shop)?;
        let mut tx = self.store.begin().await.map_err(|e| self.lift(e))?;
        tx.set_lock_timeout(self.config.lock_timeout)
            .await
            .map_err(|e| self.lift(e))?;

        let hold = self.load_hold(tx.as_mut(), &shop, hold_id).await?;
        match hold.status {
            HoldStatus::Committed => {
                tx.rollback().await.map_err(|e| self.lift(e))?;
                Ok(())
            }
            HoldStatus::Released | HoldStatus::Expired => {
                tx.rollback().await.map_err(|e| self.lift(e))?;
                Err(HoldError::invalid_state(hold.status))
            }
            HoldStatus::Active => {
                let won = tx
                    .transition_hold(&shop, hold_id, HoldStatus::Committed, now)
                    .await
                    .map_err(|e| self.lift(e))?;
                if !won {
                    // A concurrent reaper or release got there first.
                    let status = tx
                        .hold(hold_id)
                        .await
                        .map_err(|e| self.lift(e))?
                        .map(|h| h.status);
                    tx.rollback().await.map_err(|e| self.lift(e))?;
                    return match status {
                        Some(HoldStatus::Committed) => Ok(()),
                        Some(status) => Err(HoldError::invalid_state(status)),
                        None => Err(HoldError::NotFound),
                    };
                }
                tx.commit().await.map_err(|e| self.lift(e))?;
                info!(shop = %shop, hold_id = %hold_id, "committed inventory hold");
                Ok(())
            }
        }
    }

    /// Give a hold's reserved quantity back (abandoned checkout, canceled
    /// payment).
    ///
    /// Idempotent: releasing an already-released or expired hold reports
    /// [`ReleaseOutcome::AlreadyReleased`] without touching quantities.
    /// Releasing a committed hold fails — that would double-restore stock
    /// already consumed by a completed sale.
    pub async fn release_hold(
        &self,
        shop: &str,
        hold_id: HoldId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> HoldResult<ReleaseOutcome> {
        let shop = ShopId::parse(shop)?;
        let mut tx = self.store.begin().await.map_err(|e| self.lift(e))?;
        tx.set_lock_timeout(self.config.lock_timeout)
            .await
            .map_err(|e| self.lift(e))?;

        let hold = self.load_hold(tx.as_mut(), &shop, hold_id).await?;
        match hold.status {
            HoldStatus::Committed => {
                tx.rollback().await.map_err(|e| self.lift(e))?;
                Err(HoldError::invalid_state(HoldStatus::Committed))
            }
            HoldStatus::Released | HoldStatus::Expired => {
                tx.rollback().await.map_err(|e| self.lift(e))?;
                Ok(ReleaseOutcome::AlreadyReleased)
            }
            HoldStatus::Active => {
                let won = tx
                    .transition_hold(&shop, hold_id, HoldStatus::Released, now)
                    .await
                    .map_err(|e| self.lift(e))?;
                if !won {
                    tx.rollback().await.map_err(|e| self.lift(e))?;
                    return Ok(ReleaseOutcome::AlreadyReleased);
                }
                let items = tx.hold_items(hold_id).await.map_err(|e| self.lift(e))?;
                restore_hold_items(tx.as_mut(), &items)
                    .await
                    .map_err(|e| self.lift(e))?;
                tx.commit().await.map_err(|e| self.lift(e))?;
                info!(
                    shop = %shop,
                    hold_id = %hold_id,
                    reason = reason.unwrap_or("unspecified"),
                    lines = items.len(),
                    "released inventory hold"
                );
                Ok(ReleaseOutcome::Released)
            }
        }
    }

    /// Load a hold and verify shop ownership; absence and mismatch are both
    /// surfaced as not-found so callers cannot probe other shops' holds.
    async fn load_hold(
        &self,
        tx: &mut dyn crate::store::HoldTx,
        shop: &ShopId,
        hold_id: HoldId,
    ) -> HoldResult<InventoryHold> {
        let hold = tx.hold(hold_id).await.map_err(|e| self.lift(e))?;
        match hold {
            Some(hold) if hold.shop_id == *shop => Ok(hold),
            _ => Err(HoldError::NotFound),
        }
    }
}
