//! # Fund Movements
//!
//! A `FundMovement` is created in the same commit as the ledger transition
//! that moves money out of custody. The escrow's amounts change at that
//! moment; the movement then tracks settlement on the external rail:
//!
//! ```text
//! PENDING ──confirm──▶ SETTLED
//!    ├──────fail─────▶ FAILED
//!    └───dead_letter─▶ DEAD_LETTERED
//! ```
//!
//! A late confirmation settles a failed or dead-lettered movement: the
//! gateway is authoritative on whether money moved.

use escrow_core::{Amount, EscrowError, MovementId, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Held funds paid out to the supplier.
    Release,
    /// Held funds returned to the buyer.
    Refund,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EscrowError> {
        match s {
            "release" => Ok(Self::Release),
            "refund" => Ok(Self::Refund),
            other => Err(EscrowError::Validation(format!(
                "unknown movement kind: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementStatus {
    Pending,
    Settled,
    Failed,
    DeadLettered,
}

impl MovementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Settled => "SETTLED",
            Self::Failed => "FAILED",
            Self::DeadLettered => "DEAD_LETTERED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EscrowError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SETTLED" => Ok(Self::Settled),
            "FAILED" => Ok(Self::Failed),
            "DEAD_LETTERED" => Ok(Self::DeadLettered),
            other => Err(EscrowError::Validation(format!(
                "unknown movement status: {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for MovementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instruction to move money out of custody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundMovement {
    pub id: MovementId,
    pub kind: MovementKind,
    pub amount: Amount,
    /// Gateway account credited by this movement.
    pub beneficiary_account: String,
    /// Reused verbatim on every gateway attempt.
    pub idempotency_key: String,
    pub status: MovementStatus,
    pub gateway_transaction_id: Option<TransactionId>,
    pub attempts: u32,
    pub created_at: Timestamp,
    pub submitted_at: Option<Timestamp>,
    pub settled_at: Option<Timestamp>,
    pub failure_reason: Option<String>,
}

impl FundMovement {
    pub fn new(
        kind: MovementKind,
        amount: Amount,
        beneficiary_account: String,
        idempotency_key: String,
        now: Timestamp,
    ) -> Self {
        Self {
            id: MovementId::new(),
            kind,
            amount,
            beneficiary_account,
            idempotency_key,
            status: MovementStatus::Pending,
            gateway_transaction_id: None,
            attempts: 0,
            created_at: now,
            submitted_at: None,
            settled_at: None,
            failure_reason: None,
        }
    }
}

/// Settlement progress of an escrow as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    /// The oldest unsettled movement is a release.
    ReleasePending,
    /// The oldest unsettled movement is a refund.
    RefundPending,
    /// Nothing pending, but a movement failed or was dead-lettered and needs
    /// manual reconciliation.
    SettlementFailed,
    /// Nothing pending and nothing failed.
    Settled,
}

impl SettlementStatus {
    pub fn of(movements: &[FundMovement]) -> Self {
        if let Some(pending) = movements
            .iter()
            .find(|m| m.status == MovementStatus::Pending)
        {
            return match pending.kind {
                MovementKind::Release => Self::ReleasePending,
                MovementKind::Refund => Self::RefundPending,
            };
        }
        if movements.iter().any(|m| {
            matches!(
                m.status,
                MovementStatus::Failed | MovementStatus::DeadLettered
            )
        }) {
            return Self::SettlementFailed;
        }
        Self::Settled
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReleasePending => "RELEASE_PENDING",
            Self::RefundPending => "REFUND_PENDING",
            Self::SettlementFailed => "SETTLEMENT_FAILED",
            Self::Settled => "SETTLED",
        }
    }
}
