//! # escrow-arbitration — Dispute Resolution
//!
//! The dispute sub-state-machine embedded in an escrow's lifecycle:
//!
//! - **Dispute** (`dispute.rs`): the `DisputeRecord` and its lifecycle
//!   `OPEN → MEDIATION → {RESOLVED, ESCALATED}`, with timeout escalation
//!   straight from `OPEN`.
//!
//! - **Resolution** (`resolution.rs`): requested actions, resolution
//!   outcomes, and the payout arithmetic an outcome implies for the parent
//!   escrow.
//!
//! ## Crate Policy
//!
//! - Depends on `escrow-core` only. Applying a payout to the escrow's
//!   amounts is the caller's job; this crate never sees escrow state.
//! - Authorization is decided by the escrow validator before any method
//!   here is called.

pub mod dispute;
pub mod error;
pub mod resolution;

pub use dispute::{DisputeFiling, DisputeRecord, DisputeStatus, DisputeTransition, EvidenceRef};
pub use error::ArbitrationError;
pub use resolution::{Payout, PayoutTarget, RequestedAction, ResolutionOutcome};
