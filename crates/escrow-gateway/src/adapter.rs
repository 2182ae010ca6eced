//! # Payment Gateway Adapter
//!
//! The outbound seam to the external settlement rail. A gateway accepts a
//! [`PaymentOrder`] and answers with the rail's pending transaction id;
//! completion arrives later through the webhook and the ledger's
//! settlement bookkeeping.
//!
//! Implementations must be idempotent per `idempotency_key`: a repeated
//! order with a key the rail has seen returns the original transaction id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use escrow_core::{Amount, Currency, EscrowId, TransactionId};
use escrow_ledger::SettlementInstruction;
use escrow_state::MovementKind;

use crate::error::GatewayError;

/// One instruction to move money out of custody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub escrow_id: EscrowId,
    pub amount: Amount,
    pub currency: Currency,
    /// Supplier account for releases, buyer account for refunds.
    pub beneficiary_account: String,
    pub idempotency_key: String,
}

impl From<&SettlementInstruction> for PaymentOrder {
    fn from(instruction: &SettlementInstruction) -> Self {
        Self {
            escrow_id: instruction.escrow_id,
            amount: instruction.amount,
            currency: instruction.currency.clone(),
            beneficiary_account: instruction.beneficiary_account.clone(),
            idempotency_key: instruction.idempotency_key.clone(),
        }
    }
}

/// Adapter for the external settlement rail.
///
/// Object-safe so the dispatcher can hold a mock or a live gateway behind
/// the same `Arc<dyn PaymentGateway>`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Pay `order.amount` to the supplier account.
    async fn initiate_release(&self, order: &PaymentOrder) -> Result<TransactionId, GatewayError>;

    /// Pay `order.amount` back to the buyer account.
    async fn initiate_refund(&self, order: &PaymentOrder) -> Result<TransactionId, GatewayError>;

    /// Human-readable name of this implementation.
    fn name(&self) -> &str;

    async fn initiate(&self, kind: MovementKind, order: &PaymentOrder) -> Result<TransactionId, GatewayError> {
        match kind {
            MovementKind::Release => self.initiate_release(order).await,
            MovementKind::Refund => self.initiate_refund(order).await,
        }
    }
}
