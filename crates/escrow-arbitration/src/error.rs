//! Errors raised by the dispute lifecycle.

use escrow_core::{EscrowError, StateConflict};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationError {
    /// The dispute is not in a state that permits the transition.
    #[error("invalid dispute transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// The dispute is already resolved.
    #[error("dispute {dispute_id} is in terminal state {state}")]
    TerminalState { dispute_id: String, state: String },

    /// Malformed filing or resolution.
    #[error("{0}")]
    Validation(String),

    /// An amount exceeds what the escrow currently holds.
    #[error("requested amount {requested} exceeds held amount {held}")]
    HeldExceeded { requested: String, held: String },

    /// A partial refund exceeds the amount the dispute contests.
    #[error("requested amount {requested} exceeds contested amount {contested}")]
    ContestedExceeded { requested: String, contested: String },
}

impl From<ArbitrationError> for EscrowError {
    fn from(err: ArbitrationError) -> Self {
        let message = err.to_string();
        match err {
            ArbitrationError::Validation(msg) => EscrowError::Validation(msg),
            ArbitrationError::HeldExceeded { requested, held } => {
                EscrowError::StateConflict(StateConflict::AmountConflict { requested, held })
            }
            ArbitrationError::ContestedExceeded { .. } => EscrowError::Validation(message),
            ArbitrationError::InvalidTransition { .. } | ArbitrationError::TerminalState { .. } => {
                EscrowError::StateConflict(StateConflict::Blocked(message))
            }
        }
    }
}
