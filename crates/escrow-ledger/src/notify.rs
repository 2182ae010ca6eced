//! # Collaborator Seams
//!
//! Interfaces to the services the ledger consumes but does not own: the
//! notification service (fire-and-forget) and the KYC/identity service
//! (consulted at creation only).

use async_trait::async_trait;
use serde::Serialize;

use escrow_core::{Amount, EscrowError, EscrowId, MovementId, PartyId, Timestamp, TransactionId};
use escrow_state::{EscrowState, MovementKind};

/// An event worth telling the parties about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerNotification {
    /// The escrow reached a terminal state.
    Closed {
        escrow_id: EscrowId,
        state: EscrowState,
        buyer_id: PartyId,
        supplier_id: PartyId,
        at: Timestamp,
    },
    SettlementConfirmed {
        escrow_id: EscrowId,
        movement_id: MovementId,
        kind: MovementKind,
        amount: Amount,
        transaction_id: Option<TransactionId>,
    },
    /// The movement failed at the rail or was dead-lettered.
    SettlementFailed {
        escrow_id: EscrowId,
        movement_id: MovementId,
        kind: MovementKind,
        amount: Amount,
        reason: Option<String>,
    },
}

impl LedgerNotification {
    pub fn escrow_id(&self) -> EscrowId {
        match self {
            Self::Closed { escrow_id, .. }
            | Self::SettlementConfirmed { escrow_id, .. }
            | Self::SettlementFailed { escrow_id, .. } => *escrow_id,
        }
    }
}

/// Fire-and-forget notification emission.
///
/// Called after the commit; implementations must not block and have no
/// way to fail the operation that triggered them.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &LedgerNotification);
}

/// Emits notifications as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &LedgerNotification) {
        match notification {
            LedgerNotification::Closed { escrow_id, state, .. } => {
                tracing::info!(escrow_id = %escrow_id, state = %state, "escrow closed");
            }
            LedgerNotification::SettlementConfirmed {
                escrow_id,
                movement_id,
                kind,
                amount,
                ..
            } => {
                tracing::info!(
                    escrow_id = %escrow_id,
                    movement_id = %movement_id,
                    kind = kind.as_str(),
                    amount = %amount,
                    "settlement confirmed"
                );
            }
            LedgerNotification::SettlementFailed {
                escrow_id,
                movement_id,
                reason,
                ..
            } => {
                tracing::warn!(
                    escrow_id = %escrow_id,
                    movement_id = %movement_id,
                    reason = reason.as_deref().unwrap_or(""),
                    "settlement failed"
                );
            }
        }
    }
}

/// KYC lookup consulted when an escrow is created.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn is_verified(&self, party: &PartyId) -> Result<bool, EscrowError>;
}

/// Treats every party as verified.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllVerifier;

#[async_trait]
impl IdentityVerifier for AllowAllVerifier {
    async fn is_verified(&self, _party: &PartyId) -> Result<bool, EscrowError> {
        Ok(true)
    }
}
