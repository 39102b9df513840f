//! Periodic reaper sweep.
//!
//! The inline reap inside hold creation only reclaims capacity for shops that
//! are actively selling. This sweep covers the rest: it discovers every shop
//! with overdue active holds and expires them in a per-shop transaction, so
//! one wedged shop never blocks the others.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use stockhold_core::ShopId;
use stockhold_engine::reaper::release_expired_holds;
use stockhold_engine::store::{HoldStore, StoreError};

/// Tuning for one sweep pass.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Most holds expired per shop per pass. Leftovers wait for the next
    /// pass, keeping each transaction short.
    pub per_shop_limit: u32,
    /// Lock wait bound for each per-shop transaction.
    pub lock_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            per_shop_limit: 100,
            lock_timeout: Duration::from_millis(250),
        }
    }
}

/// What one sweep pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub shops_swept: usize,
    pub shops_failed: usize,
}

/// Run one reaper pass over every shop that has overdue active holds.
///
/// Each shop gets its own transaction; a failure there is logged and counted
/// but does not stop the sweep. Only the shop discovery error is fatal.
pub async fn run_reaper_sweep<S: HoldStore>(
    store: &S,
    config: &SweepConfig,
    now: DateTime<Utc>,
) -> Result<SweepStats, StoreError> {
    let shops = store.shops_with_expired_holds(now).await?;
    let mut stats = SweepStats::default();

    for shop in &shops {
        match sweep_shop(store, config, shop, now).await {
            Ok(()) => {
                stats.shops_swept += 1;
            }
            Err(err) => {
                warn!(shop = %shop, error = %err, "reaper sweep failed for shop");
                stats.shops_failed += 1;
            }
        }
    }

    debug!(
        shops_swept = stats.shops_swept,
        shops_failed = stats.shops_failed,
        "reaper sweep pass finished"
    );
    Ok(stats)
}

async fn sweep_shop<S: HoldStore>(
    store: &S,
    config: &SweepConfig,
    shop: &ShopId,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let mut tx = store.begin().await?;
    tx.set_lock_timeout(config.lock_timeout).await?;
    release_expired_holds(tx.as_mut(), shop, now, config.per_shop_limit).await?;
    tx.commit().await
}
