//! # escrow-core — Foundational Types for the Escrow Engine
//!
//! Every other crate in the workspace depends on `escrow-core`; it depends on
//! nothing internal. It defines the primitives that the ledger, the dispute
//! resolver, and the HTTP surface share.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype identifiers.** `EscrowId`, `DisputeId`, `MovementId`,
//!    `PartyId`, `TransactionId`. No bare strings or UUIDs cross a crate
//!    boundary.
//!
//! 2. **Fixed-point money.** `Amount` wraps a `rust_decimal::Decimal` that is
//!    non-negative with at most two fractional digits. Amounts serialize as
//!    strings and never pass through `f64`.
//!
//! 3. **UTC-only timestamps, injectable clock.** `Timestamp` is second
//!    precision with a `Z` suffix. Deadline logic reads time through the
//!    `Clock` trait so that tests drive time with `ManualClock`.
//!
//! 4. **`CanonicalBytes` for every digest.** Payload hashes and audit-chain
//!    hashes are computed over JCS bytes only.
//!
//! 5. **One error taxonomy.** `EscrowError` carries the five client-visible
//!    categories (validation, authorization, state conflict, gateway, not
//!    found) plus storage failures.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `escrow-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod actor;
pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;
pub mod money;
pub mod temporal;

pub use actor::{Actor, Role};
pub use canonical::CanonicalBytes;
pub use digest::{canonical_sha256, sha256_hex};
pub use error::{CanonicalizationError, EscrowError, StateConflict};
pub use identity::{DisputeId, EscrowId, MovementId, PartyId, RfqId, TransactionId};
pub use money::{Amount, Currency};
pub use temporal::{Clock, ManualClock, SystemClock, Timestamp};
