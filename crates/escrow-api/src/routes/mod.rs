//! # API Route Modules
//!
//! - [`escrows`]: escrow lifecycle and the audit trail.
//! - [`disputes`]: opening and resolving disputes.
//! - [`gateway`]: the payment rail's webhook.

pub mod disputes;
pub mod escrows;
pub mod gateway;
