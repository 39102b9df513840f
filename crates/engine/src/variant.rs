//! Canonical variant key derivation.

use std::collections::BTreeMap;

/// Derive the canonical key for a (sku, variant attributes) pair.
///
/// Two attribute maps with the same entries produce the same key regardless of
/// insertion order; any differing pair produces a different key. An empty map
/// collapses to the bare SKU. Format: `"{sku}:{name}={value},…"` with entries
/// sorted by attribute name.
pub fn variant_key(sku: &str, attributes: &BTreeMap<String, String>) -> String {
    if attributes.is_empty() {
        return sku.to_string();
    }
    let pairs: Vec<String> = attributes
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    format!("{sku}:{}", pairs.join(","))
}
