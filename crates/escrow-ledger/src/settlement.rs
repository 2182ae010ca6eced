//! Settlement instructions handed from the ledger to the payment gateway.

use serde::{Deserialize, Serialize};

use escrow_core::{Amount, Currency, EscrowId, MovementId};
use escrow_state::{Escrow, FundMovement, MovementKind};

/// One committed fund movement awaiting submission to the settlement rail.
///
/// Published after the commit that created the movement, and rebuilt from
/// persisted state by reconciliation after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementInstruction {
    pub escrow_id: EscrowId,
    pub movement_id: MovementId,
    pub kind: MovementKind,
    pub amount: Amount,
    pub currency: Currency,
    pub beneficiary_account: String,
    /// Reused verbatim on every retry so the rail can deduplicate.
    pub idempotency_key: String,
}

impl SettlementInstruction {
    pub fn for_movement(escrow: &Escrow, movement: &FundMovement) -> Self {
        Self {
            escrow_id: escrow.id,
            movement_id: movement.id,
            kind: movement.kind,
            amount: movement.amount,
            currency: escrow.currency.clone(),
            beneficiary_account: movement.beneficiary_account.clone(),
            idempotency_key: movement.idempotency_key.clone(),
        }
    }

    /// Instructions for every movement of `escrow` still waiting for a
    /// gateway transaction id.
    pub fn undispatched(escrow: &Escrow) -> Vec<Self> {
        escrow
            .undispatched_movements()
            .map(|m| Self::for_movement(escrow, m))
            .collect()
    }
}
