//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Identifier of an inventory hold.
///
/// Holds are created at checkout time and later resolved by webhook handlers
/// that only know this id, so it must be globally unique and safe to generate
/// on the caller side.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoldId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(HoldId, "HoldId");

/// Validated shop identifier (multi-shop boundary).
///
/// Shops are addressed by a lowercase slug. Every public engine operation
/// validates the caller-supplied shop string through [`ShopId::parse`] before
/// touching storage, and the rejection propagates unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShopId(String);

const SHOP_ID_MAX_LEN: usize = 63;

impl ShopId {
    /// Validate and normalize a shop name.
    ///
    /// Accepts `[a-z0-9_-]` (uppercase input is lowered, surrounding
    /// whitespace trimmed), must start with an alphanumeric, at most 63 bytes.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(DomainError::validation("shop name cannot be empty"));
        }
        if normalized.len() > SHOP_ID_MAX_LEN {
            return Err(DomainError::validation(format!(
                "shop name exceeds {SHOP_ID_MAX_LEN} characters"
            )));
        }
        let mut chars = normalized.chars();
        let first = chars.next().unwrap_or_default();
        if !first.is_ascii_alphanumeric() {
            return Err(DomainError::validation(
                "shop name must start with a letter or digit",
            ));
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(DomainError::validation(
                "shop name may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ShopId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ShopId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
