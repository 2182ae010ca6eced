//! # escrow-cli — The `escrowd` Binary
//!
//! ## Subcommands
//!
//! - `serve`: the HTTP API plus the deadline scheduler and settlement
//!   dispatcher
//! - `sweep`: one deadline-scheduler tick, report printed as JSON
//! - `verify-audit`: check an exported audit chain offline
//!
//! ## Crate Policy
//!
//! - Argument parsing is separated from the handlers.
//! - Handlers delegate to `escrow-api` and `escrow-ledger`; no business
//!   logic here.

pub mod serve;
pub mod sweep;
pub mod telemetry;
pub mod verify;
