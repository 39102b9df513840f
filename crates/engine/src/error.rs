//! Hold engine error taxonomy.

use std::time::Duration;

use thiserror::Error;

use stockhold_core::DomainError;

use crate::store::StoreError;
use crate::types::{HoldStatus, InsufficientLine};

/// Result type used across the hold engine.
pub type HoldResult<T> = Result<T, HoldError>;

/// Failure surfaced by hold operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HoldError {
    /// Shop-name validation rejected the caller's shop string; propagated
    /// unchanged from the domain layer.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The request normalized to zero positive-quantity lines.
    #[error("hold request contains no items")]
    MissingItems,

    /// One or more lines exceeded the available quantity at decrement time.
    /// Carries every insufficient line so the caller sees the full picture.
    /// Not retryable without changing the request.
    #[error("insufficient inventory for {} line(s)", .lines.len())]
    Insufficient { lines: Vec<InsufficientLine> },

    /// Transient store contention; retry the whole call after `retry_after`.
    #[error("inventory busy, retry in {retry_after:?}")]
    Busy { retry_after: Duration },

    /// The hold id does not exist or belongs to a different shop.
    #[error("hold not found")]
    NotFound,

    /// The hold is in a state that forbids the attempted operation, e.g.
    /// releasing a committed hold. Indicates a caller logic error.
    #[error("hold is {status}, operation requires a different state")]
    InvalidState { status: HoldStatus },

    /// The store lacks the inventory capability entirely. Fatal.
    #[error("inventory backend unavailable: {0}")]
    Unavailable(String),

    /// Any other storage failure, propagated unchanged.
    #[error(transparent)]
    Store(StoreError),
}

impl HoldError {
    pub fn insufficient(lines: Vec<InsufficientLine>) -> Self {
        Self::Insufficient { lines }
    }

    pub fn invalid_state(status: HoldStatus) -> Self {
        Self::InvalidState { status }
    }
}
