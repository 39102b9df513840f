//! Request normalization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::HoldRequest;
use crate::variant::variant_key;

/// One aggregated requirement per variant key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedLine {
    pub sku: String,
    pub variant_key: String,
    pub variant_attributes: BTreeMap<String, String>,
    /// Total quantity requested across all lines with this variant key.
    pub requested: i64,
}

/// Collapse caller-supplied request lines into one requirement per variant
/// key, summing quantities and carrying the attributes forward.
///
/// Lines with a zero quantity contribute nothing. A request may name its
/// variant key directly; otherwise the key is derived from the attributes.
/// The `BTreeMap` keeps line processing order deterministic, though ordering
/// carries no correctness weight.
pub fn normalize_requests(requests: &[HoldRequest]) -> BTreeMap<String, NormalizedLine> {
    let mut lines: BTreeMap<String, NormalizedLine> = BTreeMap::new();

    for request in requests {
        if request.quantity == 0 {
            continue;
        }
        let key = match &request.variant_key {
            Some(key) => key.clone(),
            None => variant_key(&request.sku, &request.variant_attributes),
        };
        lines
            .entry(key.clone())
            .and_modify(|line| line.requested += i64::from(request.quantity))
            .or_insert_with(|| NormalizedLine {
                sku: request.sku.clone(),
                variant_key: key,
                variant_attributes: request.variant_attributes.clone(),
                requested: i64::from(request.quantity),
            });
    }

    lines
}
