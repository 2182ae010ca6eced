//! # escrow-ledger — The Escrow Ledger Service
//!
//! Owns the authoritative state of every escrow and the only path by which
//! it changes.
//!
//! - **Store** (`store.rs`): the `EscrowStore` persistence seam with
//!   optimistic compare-and-swap, and the in-memory `MemoryStore`.
//!
//! - **Audit** (`audit.rs`): the per-escrow hash-chained `AuditEvent` log
//!   and `verify_chain`.
//!
//! - **Ledger** (`ledger.rs`): `EscrowLedger`, running
//!   validate → compare-and-swap → audit for every operation.
//!
//! - **Scheduler** (`scheduler.rs`): `DeadlineScheduler`, the periodic
//!   expiry and mediation-timeout sweep.
//!
//! - **Collaborators** (`notify.rs`, `settlement.rs`): notification and
//!   identity seams, and the `SettlementInstruction`s handed to the
//!   payment gateway after each commit.
//!
//! ## Crate Policy
//!
//! - No network I/O. Gateway calls happen in `escrow-gateway`, after the
//!   ledger has committed.
//! - Every state change goes through `EscrowLedger::execute`; the store
//!   is never written to directly by callers.

pub mod audit;
pub mod ledger;
pub mod notify;
pub mod scheduler;
pub mod settlement;
pub mod store;

// ─── Audit re-exports ───────────────────────────────────────────────

pub use audit::{
    verify_chain, AuditChainError, AuditDraft, AuditEvent, AuditOutcome, ChainBreak, ChainReport,
    GENESIS_HASH,
};

// ─── Service re-exports ─────────────────────────────────────────────

pub use ledger::EscrowLedger;
pub use notify::{
    AllowAllVerifier, IdentityVerifier, LedgerNotification, Notifier, TracingNotifier,
};
pub use scheduler::{DeadlineScheduler, SweepReport};
pub use settlement::SettlementInstruction;
pub use store::{EscrowStore, MemoryStore};
