//! # escrow-gateway — Payment Gateway Adapter
//!
//! Moves money out of custody after the ledger has committed the decision.
//!
//! - **Adapter** (`adapter.rs`): the `PaymentGateway` trait and the
//!   `PaymentOrder` it accepts.
//! - **HTTP** (`http.rs`): `HttpPaymentGateway`, a `reqwest` client that
//!   sends the idempotency key as a header.
//! - **Mock** (`mock.rs`): `MockGateway`, deduplicating by key, with
//!   scriptable failures.
//! - **Retry** (`retry.rs`): `RetryPolicy`, injected rather than ambient.
//! - **Dispatcher** (`dispatcher.rs`): `SettlementDispatcher`, which
//!   consumes the ledger's settlement instructions, retries with the same
//!   key, records submissions, and dead-letters what cannot be submitted.
//!
//! ## Crate Policy
//!
//! - Gateway failures never roll back a committed ledger transition.
//! - Every ledger write from this crate uses the `system` actor.

pub mod adapter;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod mock;
pub mod retry;

pub use adapter::{PaymentGateway, PaymentOrder};
pub use dispatcher::{DeadLetter, DispatchError, DispatchOutcome, SettlementDispatcher};
pub use error::GatewayError;
pub use http::{HttpGatewayConfig, HttpPaymentGateway};
pub use mock::MockGateway;
pub use retry::RetryPolicy;
