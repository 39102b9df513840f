//! Busy-error classification.
//!
//! The engine never inspects raw store failures directly; this module is the
//! single place that decides whether a transaction failure is transient
//! contention worth retrying or a hard error to propagate.

use crate::store::StoreError;

/// How a store failure should be treated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient contention (lock timeout, deadlock, serialization failure,
    /// statement timeout). The whole operation can be retried after a delay.
    Busy,
    /// Anything else; propagate unchanged.
    Other,
}

/// SQLSTATEs raised by lock contention: serialization_failure,
/// deadlock_detected, lock_not_available, query_canceled (statement timeout).
const BUSY_SQLSTATES: [&str; 4] = ["40001", "40P01", "55P03", "57014"];

/// Message fragments used when no structured code survives the driver.
const BUSY_PATTERNS: [&str; 4] = [
    "lock timeout",
    "deadlock",
    "could not serialize",
    "statement timeout",
];

/// Classify a store failure by error code, falling back to message sniffing.
pub fn classify_store_error(err: &StoreError) -> FailureKind {
    match err {
        StoreError::Unavailable(_) => FailureKind::Other,
        StoreError::Query { code, message } => {
            if let Some(code) = code {
                if BUSY_SQLSTATES.contains(&code.as_str()) {
                    return FailureKind::Busy;
                }
            }
            let lowered = message.to_ascii_lowercase();
            if BUSY_PATTERNS.iter().any(|p| lowered.contains(p)) {
                FailureKind::Busy
            } else {
                FailureKind::Other
            }
        }
    }
}
