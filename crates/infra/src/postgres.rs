//! Postgres-backed hold store implementation.
//!
//! Mutual exclusion rides on row-level locking: every quantity mutation is a
//! guarded conditional `UPDATE`, and `SET LOCAL lock_timeout` bounds how long
//! a statement may queue behind a competing transaction before it fails with
//! a busy-classifiable SQLSTATE (55P03).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use stockhold_core::{HoldId, ShopId};
use stockhold_engine::store::{HoldStore, HoldTx, StoreError};
use stockhold_engine::types::{HoldStatus, InventoryHold, InventoryHoldItem, InventoryItem};

/// Postgres-backed [`HoldStore`].
///
/// Every query includes `shop_id` in the WHERE clause or as part of the
/// primary key, so cross-shop access is architecturally impossible.
pub struct PostgresHoldStore {
    pool: PgPool,
}

impl PostgresHoldStore {
    /// Create a store over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => StoreError::Query {
            code: db.code().map(|c| c.to_string()),
            message: db.message().to_string(),
        },
        sqlx::Error::PoolClosed => StoreError::unavailable("connection pool is closed"),
        sqlx::Error::Configuration(e) => StoreError::unavailable(e.to_string()),
        other => StoreError::query(other.to_string()),
    }
}

fn attributes_from_json(value: JsonValue) -> BTreeMap<String, String> {
    match value {
        JsonValue::Object(map) => map
            .into_iter()
            .filter_map(|(name, value)| match value {
                JsonValue::String(s) => Some((name, s)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn attributes_to_json(attributes: &BTreeMap<String, String>) -> JsonValue {
    serde_json::to_value(attributes).unwrap_or_default()
}

fn shop_from_row(row: &PgRow) -> Result<ShopId, StoreError> {
    let raw: String = row.try_get("shop_id").map_err(map_sqlx)?;
    ShopId::parse(&raw).map_err(|e| StoreError::query(format!("corrupt shop_id column: {e}")))
}

fn status_from_row(row: &PgRow) -> Result<HoldStatus, StoreError> {
    let raw: String = row.try_get("status").map_err(map_sqlx)?;
    HoldStatus::parse(&raw)
        .ok_or_else(|| StoreError::query(format!("unknown hold status '{raw}'")))
}

fn hold_from_row(row: &PgRow) -> Result<InventoryHold, StoreError> {
    Ok(InventoryHold {
        id: HoldId::from_uuid(row.try_get("id").map_err(map_sqlx)?),
        shop_id: shop_from_row(row)?,
        status: status_from_row(row)?,
        expires_at: row.try_get("expires_at").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        committed_at: row.try_get("committed_at").map_err(map_sqlx)?,
        released_at: row.try_get("released_at").map_err(map_sqlx)?,
        expired_at: row.try_get("expired_at").map_err(map_sqlx)?,
    })
}

fn item_from_row(row: &PgRow) -> Result<InventoryItem, StoreError> {
    Ok(InventoryItem {
        shop_id: shop_from_row(row)?,
        sku: row.try_get("sku").map_err(map_sqlx)?,
        product_id: row.try_get("product_id").map_err(map_sqlx)?,
        variant_key: row.try_get("variant_key").map_err(map_sqlx)?,
        variant_attributes: attributes_from_json(
            row.try_get("variant_attributes").map_err(map_sqlx)?,
        ),
        quantity: row.try_get("quantity").map_err(map_sqlx)?,
    })
}

fn hold_item_from_row(row: &PgRow) -> Result<InventoryHoldItem, StoreError> {
    Ok(InventoryHoldItem {
        hold_id: HoldId::from_uuid(row.try_get("hold_id").map_err(map_sqlx)?),
        shop_id: shop_from_row(row)?,
        sku: row.try_get("sku").map_err(map_sqlx)?,
        product_id: row.try_get("product_id").map_err(map_sqlx)?,
        variant_key: row.try_get("variant_key").map_err(map_sqlx)?,
        variant_attributes: attributes_from_json(
            row.try_get("variant_attributes").map_err(map_sqlx)?,
        ),
        quantity: row.try_get("quantity").map_err(map_sqlx)?,
    })
}

#[async_trait]
impl HoldStore for PostgresHoldStore {
    async fn begin(&self) -> Result<Box<dyn HoldTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(map_sqlx)?;
        Ok(Box::new(PgHoldTx { tx }))
    }

    async fn shops_with_expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ShopId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT shop_id
            FROM inventory_holds
            WHERE status = 'active' AND expires_at <= $1
            ORDER BY shop_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(shop_from_row).collect()
    }
}

struct PgHoldTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl HoldTx for PgHoldTx {
    async fn set_lock_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        // lock_timeout takes no bind parameters; the value is a formatted
        // integer, not caller input.
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
        sqlx::query(&statement)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn inventory_item(
        &mut self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
    ) -> Result<Option<InventoryItem>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT shop_id, sku, product_id, variant_key, variant_attributes, quantity
            FROM inventory_items
            WHERE shop_id = $1 AND sku = $2 AND variant_key = $3
            "#,
        )
        .bind(shop_id.as_str())
        .bind(sku)
        .bind(variant_key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn try_decrement(
        &mut self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
        amount: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_items
            SET quantity = quantity - $4
            WHERE shop_id = $1 AND sku = $2 AND variant_key = $3 AND quantity >= $4
            "#,
        )
        .bind(shop_id.as_str())
        .bind(sku)
        .bind(variant_key)
        .bind(amount)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn increment(
        &mut self,
        shop_id: &ShopId,
        sku: &str,
        variant_key: &str,
        amount: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_items
            SET quantity = quantity + $4
            WHERE shop_id = $1 AND sku = $2 AND variant_key = $3
            "#,
        )
        .bind(shop_id.as_str())
        .bind(sku)
        .bind(variant_key)
        .bind(amount)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn upsert_item(&mut self, item: &InventoryItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_items
                (shop_id, sku, product_id, variant_key, variant_attributes, quantity)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (shop_id, sku, variant_key)
            DO UPDATE SET quantity = inventory_items.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(item.shop_id.as_str())
        .bind(&item.sku)
        .bind(&item.product_id)
        .bind(&item.variant_key)
        .bind(attributes_to_json(&item.variant_attributes))
        .bind(item.quantity)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn insert_hold(&mut self, hold: &InventoryHold) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_holds
                (id, shop_id, status, expires_at, created_at, committed_at, released_at, expired_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*hold.id.as_uuid())
        .bind(hold.shop_id.as_str())
        .bind(hold.status.as_str())
        .bind(hold.expires_at)
        .bind(hold.created_at)
        .bind(hold.committed_at)
        .bind(hold.released_at)
        .bind(hold.expired_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn hold(&mut self, hold_id: HoldId) -> Result<Option<InventoryHold>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, shop_id, status, expires_at, created_at,
                   committed_at, released_at, expired_at
            FROM inventory_holds
            WHERE id = $1
            "#,
        )
        .bind(*hold_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(hold_from_row).transpose()
    }

    async fn transition_hold(
        &mut self,
        shop_id: &ShopId,
        hold_id: HoldId,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let statement = match to {
            HoldStatus::Committed => {
                r#"
                UPDATE inventory_holds
                SET status = 'committed', committed_at = $3
                WHERE id = $1 AND shop_id = $2 AND status = 'active'
                "#
            }
            HoldStatus::Released => {
                r#"
                UPDATE inventory_holds
                SET status = 'released', released_at = $3
                WHERE id = $1 AND shop_id = $2 AND status = 'active'
                "#
            }
            HoldStatus::Expired => {
                r#"
                UPDATE inventory_holds
                SET status = 'expired', expired_at = $3
                WHERE id = $1 AND shop_id = $2 AND status = 'active'
                "#
            }
            HoldStatus::Active => {
                return Err(StoreError::query("invalid hold transition back to active"));
            }
        };

        let result = sqlx::query(statement)
            .bind(*hold_id.as_uuid())
            .bind(shop_id.as_str())
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_expiry(
        &mut self,
        shop_id: &ShopId,
        hold_id: HoldId,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_holds
            SET expires_at = $3
            WHERE id = $1 AND shop_id = $2 AND status = 'active'
            "#,
        )
        .bind(*hold_id.as_uuid())
        .bind(shop_id.as_str())
        .bind(expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_hold_items(&mut self, items: &[InventoryHoldItem]) -> Result<(), StoreError> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO inventory_hold_items
                    (hold_id, shop_id, sku, product_id, variant_key, variant_attributes, quantity)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(*item.hold_id.as_uuid())
            .bind(item.shop_id.as_str())
            .bind(&item.sku)
            .bind(&item.product_id)
            .bind(&item.variant_key)
            .bind(attributes_to_json(&item.variant_attributes))
            .bind(item.quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        }
        Ok(())
    }

    async fn hold_items(&mut self, hold_id: HoldId) -> Result<Vec<InventoryHoldItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT hold_id, shop_id, sku, product_id, variant_key, variant_attributes, quantity
            FROM inventory_hold_items
            WHERE hold_id = $1
            "#,
        )
        .bind(*hold_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(hold_item_from_row).collect()
    }

    async fn expired_holds(
        &mut self,
        shop_id: &ShopId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<InventoryHold>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, shop_id, status, expires_at, created_at,
                   committed_at, released_at, expired_at
            FROM inventory_holds
            WHERE shop_id = $1 AND status = 'active' AND expires_at <= $2
            ORDER BY expires_at ASC
            LIMIT $3
            "#,
        )
        .bind(shop_id.as_str())
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(hold_from_row).collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_sqlx)
    }
}
