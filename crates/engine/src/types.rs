//! Rows and request/result types of the hold engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockhold_core::{HoldId, ShopId};

/// One inventory counter row per (shop, sku, variant key).
///
/// `quantity` is the *available* count. It is only ever mutated by the
/// conditional decrement at hold creation and the increment/upsert at
/// release/expiry, both scoped to the owning shop, and it never goes negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub shop_id: ShopId,
    pub sku: String,
    pub product_id: String,
    pub variant_key: String,
    pub variant_attributes: BTreeMap<String, String>,
    pub quantity: i64,
}

/// Hold lifecycle states.
///
/// Transitions are monotonic and one-directional: `active` can move to any of
/// the three terminal states, and nothing leaves a terminal state. Every
/// transition out of `active` is a conditional update matching both the hold
/// id and the `active` status, so only one caller wins a race.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Active,
    /// Payment succeeded; the decrement is durable.
    Committed,
    /// Buyer abandoned or payment was canceled; quantity restored.
    Released,
    /// TTL elapsed and the reaper reclaimed the quantity.
    Expired,
}

impl HoldStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HoldStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Active => "active",
            HoldStatus::Committed => "committed",
            HoldStatus::Released => "released",
            HoldStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(HoldStatus::Active),
            "committed" => Some(HoldStatus::Committed),
            "released" => Some(HoldStatus::Released),
            "expired" => Some(HoldStatus::Expired),
            _ => None,
        }
    }
}

impl core::fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reservation that successfully claimed stock.
///
/// Terminal holds are retained for audit and idempotency, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryHold {
    pub id: HoldId,
    pub shop_id: ShopId,
    pub status: HoldStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

/// One reserved line captured at hold-creation time; read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryHoldItem {
    pub hold_id: HoldId,
    pub shop_id: ShopId,
    pub sku: String,
    pub product_id: String,
    pub variant_key: String,
    pub variant_attributes: BTreeMap<String, String>,
    pub quantity: i64,
}

/// One caller-supplied line of a hold request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HoldRequest {
    pub sku: String,
    pub quantity: u32,
    #[serde(default)]
    pub variant_attributes: BTreeMap<String, String>,
    /// Precomputed variant key; overrides derivation from the attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_key: Option<String>,
}

/// A line the store could not satisfy, with the availability observed at
/// decrement time so callers can render a precise "only N left" message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientLine {
    pub sku: String,
    pub variant_key: String,
    pub requested: i64,
    pub available: i64,
}

/// Successful result of hold creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedHold {
    pub hold_id: HoldId,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of an extend attempt.
///
/// Extension of a non-active hold is not an error: the caller gets the
/// terminal state back and can branch on why the deadline did not move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtendOutcome {
    Extended { expires_at: DateTime<Utc> },
    NotActive { status: HoldStatus },
}

/// Outcome of a release attempt. Repeated releases are expected (webhook
/// retries) and report `AlreadyReleased` instead of failing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released,
    AlreadyReleased,
}
