//! Expiry reaping.
//!
//! A hold that is never committed or released is reclaimed once its deadline
//! passes: TTL is the domain-level cancellation mechanism, so no caller ever
//! has to cancel on a timer. The reaper runs in two places with the same
//! code: inline inside a create transaction with a small limit (an expiring
//! hold's capacity can satisfy the very request being created), and from the
//! periodic per-shop sweep with a larger one.

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use stockhold_core::ShopId;

use crate::store::{HoldTx, StoreError};
use crate::types::{HoldStatus, InventoryHoldItem, InventoryItem};

/// Expire up to `limit` overdue active holds in `shop_id` and restore their
/// reserved quantities, inside the caller's transaction.
///
/// Each hold is transitioned via a conditional update matching `status =
/// active`; a lost race is skipped silently. The only externally observable
/// effects are the status and quantity changes.
pub async fn release_expired_holds(
    tx: &mut dyn HoldTx,
    shop_id: &ShopId,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<(), StoreError> {
    if limit == 0 {
        return Ok(());
    }

    let overdue = tx.expired_holds(shop_id, now, limit).await?;
    for hold in overdue {
        if !tx
            .transition_hold(shop_id, hold.id, HoldStatus::Expired, now)
            .await?
        {
            trace!(shop = %shop_id, hold_id = %hold.id, "lost expiry race, skipping");
            continue;
        }
        let items = tx.hold_items(hold.id).await?;
        restore_hold_items(tx, &items).await?;
        debug!(
            shop = %shop_id,
            hold_id = %hold.id,
            expired_at = %now,
            lines = items.len(),
            "expired overdue inventory hold"
        );
    }

    Ok(())
}

/// Put a hold's reserved quantities back on their counter rows.
///
/// Increments the row when it still exists; recreates it when provisioning
/// deleted it while the hold was open.
pub(crate) async fn restore_hold_items(
    tx: &mut dyn HoldTx,
    items: &[InventoryHoldItem],
) -> Result<(), StoreError> {
    for item in items {
        let bumped = tx
            .increment(&item.shop_id, &item.sku, &item.variant_key, item.quantity)
            .await?;
        if !bumped {
            tx.upsert_item(&InventoryItem {
                shop_id: item.shop_id.clone(),
                sku: item.sku.clone(),
                product_id: item.product_id.clone(),
                variant_key: item.variant_key.clone(),
                variant_attributes: item.variant_attributes.clone(),
                quantity: item.quantity,
            })
            .await?;
        }
    }
    Ok(())
}
