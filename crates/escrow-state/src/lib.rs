//! # escrow-state — Escrow State Machine and Transition Validator
//!
//! - **Escrow** (`escrow.rs`): `EscrowState` and its transition table, and
//!   the `Escrow` record with its amount-conservation invariant.
//!
//! - **Movement** (`movement.rs`): `FundMovement`, the settlement sub-state
//!   of an escrow (`RELEASE_PENDING`, `REFUND_PENDING`, `SETTLED`).
//!
//! - **Operation** (`operation.rs`): one concrete request type per ledger
//!   operation, gathered in the `Operation` enum.
//!
//! - **Validator** (`validator.rs`): the pure function
//!   `(snapshot, operation, actor, now, policy) → Transition | EscrowError`.
//!   Schema checks, authorization, the legal-edge check, and amount
//!   arithmetic all live here; nothing in this crate performs I/O.
//!
//! ## Design
//!
//! The escrow lifecycle is a validated enum rather than a typestate: every
//! escrow is loaded from storage with a state known only at runtime, and the
//! validator needs to reject illegal operations as values
//! (`StateConflict::IllegalTransition`) so they can be audited.

pub mod escrow;
pub mod movement;
pub mod operation;
pub mod policy;
pub mod validator;

// ─── Escrow re-exports ──────────────────────────────────────────────

pub use escrow::{Escrow, EscrowState};

// ─── Movement re-exports ────────────────────────────────────────────

pub use movement::{FundMovement, MovementKind, MovementStatus, SettlementStatus};

// ─── Operation re-exports ───────────────────────────────────────────

pub use operation::{
    CancelRequest, ConfirmSettlementRequest, CreateEscrowRequest, DeadLetterRequest,
    EscalateRequest, ExtendRequest, FailSettlementRequest, FundRequest, Operation, PayoutRequest,
    RecordSubmissionRequest, ResolveRequest,
};

// ─── Validator re-exports ───────────────────────────────────────────

pub use policy::LedgerPolicy;
pub use validator::{apply, capacity, validate_create, Capacity, SettlementUpdate, StateStep, Transition};
