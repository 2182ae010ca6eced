//! # Error Taxonomy
//!
//! `EscrowError` is the single error type crossing crate boundaries in the
//! engine. Its categories map one-to-one onto client-visible outcomes:
//!
//! | Variant | HTTP | Retry |
//! |---|---|---|
//! | `Validation` | 400 | never |
//! | `Authorization` | 403 | never |
//! | `StateConflict` | 409 | refetch, then retry |
//! | `Gateway` | 502/503 | adapter retries with the same idempotency key |
//! | `NotFound` | 404 | never |
//! | `Storage` | 500 | operator |
//!
//! Crate-local errors (gateway, audit chain) convert into this taxonomy.

use thiserror::Error;

/// Top-level error type for the escrow engine.
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Malformed or out-of-range request.
    #[error("validation error: {0}")]
    Validation(String),

    /// The actor is not permitted to perform the operation.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Illegal transition, optimistic-concurrency conflict, or amount conflict.
    #[error("state conflict: {0}")]
    StateConflict(#[from] StateConflict),

    /// External settlement rail unavailable, timed out, or rejected the call.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Unknown escrow, dispute, movement, or transaction.
    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A request payload could not be canonicalized for hashing.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),
}

impl EscrowError {
    /// Stable machine-readable code for this error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Canonicalization(_) => "VALIDATION_ERROR",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether this is the expected loser of a compare-and-swap race.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(
            self,
            Self::StateConflict(StateConflict::VersionMismatch { .. })
        )
    }

    /// Whether a rejected attempt is recorded in the audit trail.
    ///
    /// Client-side rejections are; infrastructure failures and lookups of
    /// unknown records are not.
    pub fn is_audited_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Authorization(_)
                | Self::StateConflict(_)
                | Self::Canonicalization(_)
        )
    }
}

/// The three shapes of state conflict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateConflict {
    /// The operation has no edge out of the current state.
    #[error("operation {operation} is not permitted in state {from}")]
    IllegalTransition {
        /// Current state name.
        from: String,
        /// Attempted operation name.
        operation: String,
    },

    /// Another writer committed first.
    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch {
        /// Version the caller read.
        expected: u64,
        /// Version currently persisted.
        actual: u64,
    },

    /// The requested amount exceeds what is held.
    #[error("requested amount {requested} exceeds held amount {held}")]
    AmountConflict {
        /// Requested amount, decimal string.
        requested: String,
        /// Held amount, decimal string.
        held: String,
    },

    /// The current state blocks the operation for a reason other than the
    /// transition table (an unresolved dispute, a different funding
    /// transaction).
    #[error("{0}")]
    Blocked(String),
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical representations.
    #[error("float values are not permitted in canonical representations; use a decimal string: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}
