//! # Settlement Dispatcher
//!
//! Turns committed fund movements into gateway calls and feeds the
//! results back into the ledger.
//!
//! ## Guarantees
//!
//! - At most one in-flight gateway call per idempotency key in this
//!   process. A concurrent duplicate fails fast with `AlreadyInFlight`.
//! - Retries reuse the movement's idempotency key, so the rail can
//!   deduplicate a call whose response was lost.
//! - A gateway failure never touches committed amounts. Success records
//!   the transaction id on the movement; a rejection or exhausted retries
//!   dead-letter the movement and push a [`DeadLetter`] for manual
//!   reconciliation.
//!
//! Ledger bookkeeping calls that lose a version race are retried against
//! fresh state a bounded number of times.

use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use escrow_core::{Actor, EscrowError, EscrowId, MovementId, Timestamp, TransactionId};
use escrow_ledger::{EscrowLedger, SettlementInstruction};
use escrow_state::{Escrow, MovementKind};

use crate::adapter::{PaymentGateway, PaymentOrder};
use crate::error::GatewayError;
use crate::retry::RetryPolicy;

/// Attempts for one ledger bookkeeping write before giving up on a
/// version race.
const BOOKKEEPING_ATTEMPTS: u32 = 3;

/// A movement parked for manual reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub escrow_id: EscrowId,
    pub movement_id: MovementId,
    pub kind: MovementKind,
    pub idempotency_key: String,
    pub reason: String,
    pub attempts: u32,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted {
        transaction_id: TransactionId,
        attempts: u32,
    },
    DeadLettered {
        reason: String,
        attempts: u32,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("a gateway call for idempotency key {0} is already in flight")]
    AlreadyInFlight(String),

    #[error("ledger rejected settlement bookkeeping: {0}")]
    Ledger(#[from] EscrowError),
}

/// Removes its key from the in-flight set when dropped.
struct InFlight<'a> {
    keys: &'a DashSet<String>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

pub struct SettlementDispatcher {
    ledger: Arc<EscrowLedger>,
    gateway: Arc<dyn PaymentGateway>,
    retry: RetryPolicy,
    in_flight: DashSet<String>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    actor: Actor,
}

impl std::fmt::Debug for SettlementDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementDispatcher")
            .field("gateway", &self.gateway.name())
            .field("retry", &self.retry)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl SettlementDispatcher {
    pub fn new(ledger: Arc<EscrowLedger>, gateway: Arc<dyn PaymentGateway>, retry: RetryPolicy) -> Self {
        Self {
            ledger,
            gateway,
            retry,
            in_flight: DashSet::new(),
            dead_letters: Mutex::new(Vec::new()),
            actor: Actor::system(),
        }
    }

    /// Movements dead-lettered by this dispatcher, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    /// Submit one movement to the gateway, retrying transient failures.
    pub async fn dispatch(&self, instruction: SettlementInstruction) -> Result<DispatchOutcome, DispatchError> {
        let key = instruction.idempotency_key.clone();
        if !self.in_flight.insert(key.clone()) {
            return Err(DispatchError::AlreadyInFlight(key));
        }
        let _guard = InFlight {
            keys: &self.in_flight,
            key,
        };

        let order = PaymentOrder::from(&instruction);
        let mut attempts = 0u32;
        let failure = loop {
            attempts += 1;
            match self.gateway.initiate(instruction.kind, &order).await {
                Ok(tx) => {
                    metrics::counter!("escrow_gateway_attempts_total", "outcome" => "success").increment(1);
                    tracing::info!(
                        escrow_id = %instruction.escrow_id,
                        movement_id = %instruction.movement_id,
                        transaction_id = %tx,
                        attempts,
                        "settlement submitted"
                    );
                    self.bookkeep(|| {
                        self.ledger.record_submission(
                            &instruction.escrow_id,
                            instruction.movement_id,
                            tx.clone(),
                            attempts,
                            &self.actor,
                        )
                    })
                    .await?;
                    return Ok(DispatchOutcome::Submitted {
                        transaction_id: tx,
                        attempts,
                    });
                }
                Err(err) if err.is_retryable() && self.retry.allows_retry_after(attempts) => {
                    metrics::counter!("escrow_gateway_attempts_total", "outcome" => "retry").increment(1);
                    let delay = self.retry.delay_for(attempts);
                    tracing::warn!(
                        escrow_id = %instruction.escrow_id,
                        movement_id = %instruction.movement_id,
                        attempt = attempts,
                        max_attempts = self.retry.max_attempts,
                        error = %err,
                        "gateway call failed, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    metrics::counter!("escrow_gateway_attempts_total", "outcome" => "failure").increment(1);
                    break err;
                }
            }
        };

        self.dead_letter(&instruction, failure, attempts).await
    }

    async fn dead_letter(
        &self,
        instruction: &SettlementInstruction,
        failure: GatewayError,
        attempts: u32,
    ) -> Result<DispatchOutcome, DispatchError> {
        let reason = failure.to_string();
        tracing::error!(
            escrow_id = %instruction.escrow_id,
            movement_id = %instruction.movement_id,
            idempotency_key = %instruction.idempotency_key,
            attempts,
            error = %reason,
            "settlement dead-lettered"
        );
        metrics::counter!("escrow_dead_letters_total").increment(1);

        self.dead_letters.lock().push(DeadLetter {
            escrow_id: instruction.escrow_id,
            movement_id: instruction.movement_id,
            kind: instruction.kind,
            idempotency_key: instruction.idempotency_key.clone(),
            reason: reason.clone(),
            attempts,
            at: self.ledger.clock().now(),
        });

        self.bookkeep(|| {
            self.ledger.dead_letter(
                &instruction.escrow_id,
                instruction.movement_id,
                reason.clone(),
                attempts,
                &self.actor,
            )
        })
        .await?;
        Ok(DispatchOutcome::DeadLettered { reason, attempts })
    }

    /// Gateway callback: the rail settled `tx`.
    pub async fn on_settlement_confirmed(&self, tx: TransactionId) -> Result<Escrow, EscrowError> {
        self.bookkeep(|| self.ledger.confirm_settlement(tx.clone(), &self.actor))
            .await
    }

    /// Gateway callback: the rail failed `tx`.
    pub async fn on_settlement_failed(&self, tx: TransactionId, reason: String) -> Result<Escrow, EscrowError> {
        self.bookkeep(|| self.ledger.fail_settlement(tx.clone(), reason.clone(), &self.actor))
            .await
    }

    /// Re-dispatch every committed movement that never reached the gateway.
    /// Returns how many were submitted.
    pub async fn reconcile(&self) -> Result<usize, EscrowError> {
        let pending = self.ledger.pending_instructions().await?;
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "reconciling undispatched settlements");
        }
        let mut submitted = 0;
        for instruction in pending {
            let movement_id = instruction.movement_id;
            match self.dispatch(instruction).await {
                Ok(DispatchOutcome::Submitted { .. }) => submitted += 1,
                Ok(DispatchOutcome::DeadLettered { .. }) => {}
                Err(err) => {
                    tracing::warn!(movement_id = %movement_id, error = %err, "reconciliation dispatch failed");
                }
            }
        }
        Ok(submitted)
    }

    /// Dispatch instructions from the ledger until the channel closes.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<SettlementInstruction>) {
        tracing::info!(gateway = self.gateway.name(), "settlement dispatcher started");
        while let Some(instruction) = receiver.recv().await {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                let movement_id = instruction.movement_id;
                if let Err(err) = this.dispatch(instruction).await {
                    tracing::warn!(movement_id = %movement_id, error = %err, "settlement dispatch failed");
                }
            });
        }
        tracing::info!("settlement dispatcher stopped");
    }

    async fn bookkeep<F, Fut>(&self, op: F) -> Result<Escrow, EscrowError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Escrow, EscrowError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_version_mismatch() && attempt < BOOKKEEPING_ATTEMPTS => {
                    tracing::debug!(attempt, error = %err, "settlement bookkeeping lost a version race; retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
