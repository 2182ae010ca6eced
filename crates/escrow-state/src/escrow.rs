//! # Escrow Record
//!
//! ```text
//! CREATED ──fund()──▶ FUNDED ──(same commit)──▶ ACTIVE
//!    │                                            │
//!    └──cancel()──▶ CANCELLED                     ├──release()/refund() (partial) ──▶ ACTIVE
//!                                                 ├──release() (held = 0) ──▶ RELEASED
//!                                                 ├──refund()  (held = 0) ──▶ REFUNDED
//!                                                 ├──dispute() ──▶ DISPUTED
//!                                                 ├──extend()  ──▶ ACTIVE
//!                                                 └──expire()  ──▶ EXPIRED
//!
//! DISPUTED ──(partial payout)──▶ DISPUTED
//!          ──(held = 0)──▶ RELEASED | REFUNDED | PARTIAL_REFUNDED
//! ```
//!
//! Terminal records are never deleted.

use escrow_arbitration::DisputeRecord;
use escrow_core::{
    Amount, Currency, EscrowError, EscrowId, PartyId, RfqId, StateConflict, Timestamp,
    TransactionId,
};
use serde::{Deserialize, Serialize};

use crate::movement::{FundMovement, MovementStatus, SettlementStatus};

// ─── Escrow State ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowState {
    /// Terms agreed, funds not yet collected.
    Created,
    /// Gateway confirmed collection. Only ever observed inside the funding
    /// commit, which continues straight to `Active`.
    Funded,
    /// Funds in custody against the supplier's obligation.
    Active,
    /// A dispute has been raised.
    Disputed,
    Released,
    Refunded,
    PartialRefunded,
    Cancelled,
    Expired,
}

impl EscrowState {
    pub const ALL: [EscrowState; 9] = [
        Self::Created,
        Self::Funded,
        Self::Active,
        Self::Disputed,
        Self::Released,
        Self::Refunded,
        Self::PartialRefunded,
        Self::Cancelled,
        Self::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Funded => "FUNDED",
            Self::Active => "ACTIVE",
            Self::Disputed => "DISPUTED",
            Self::Released => "RELEASED",
            Self::Refunded => "REFUNDED",
            Self::PartialRefunded => "PARTIAL_REFUNDED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EscrowError> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EscrowError::Validation(format!("unknown escrow state: {s:?}")))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Released
                | Self::Refunded
                | Self::PartialRefunded
                | Self::Cancelled
                | Self::Expired
        )
    }

    /// Legal target states, including self-loops for partial payouts,
    /// extensions, and dispute bookkeeping.
    pub fn valid_transitions(&self) -> &'static [EscrowState] {
        match self {
            Self::Created => &[Self::Funded, Self::Cancelled],
            Self::Funded => &[Self::Active],
            Self::Active => &[
                Self::Active,
                Self::Released,
                Self::Refunded,
                Self::Disputed,
                Self::Expired,
            ],
            Self::Disputed => &[
                Self::Disputed,
                Self::Released,
                Self::PartialRefunded,
                Self::Refunded,
            ],
            Self::Released
            | Self::Refunded
            | Self::PartialRefunded
            | Self::Cancelled
            | Self::Expired => &[],
        }
    }

    pub fn can_transition_to(&self, to: EscrowState) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for EscrowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── The Escrow ──────────────────────────────────────────────────────

/// Funds held against one RFQ between exactly one buyer and one supplier.
///
/// ## Invariants
///
/// - `original_amount == held_amount + released_amount + refunded_amount`.
/// - `deadline` only moves forward, and only through `extend`.
/// - `version` increases by exactly one per committed transition.
/// - At most one dispute in `disputes` is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub rfq_id: RfqId,
    pub buyer_id: PartyId,
    pub supplier_id: PartyId,
    /// Gateway account refunds are paid to.
    pub buyer_account: String,
    /// Gateway account releases are paid to.
    pub supplier_account: String,
    pub currency: Currency,
    pub original_amount: Amount,
    pub held_amount: Amount,
    pub released_amount: Amount,
    pub refunded_amount: Amount,
    pub state: EscrowState,
    pub deadline: Timestamp,
    pub version: u64,
    pub terms: String,
    pub metadata: Option<serde_json::Value>,
    pub funding_transaction_id: Option<TransactionId>,
    pub funded_at: Option<Timestamp>,
    /// Every dispute ever raised, oldest first.
    pub disputes: Vec<DisputeRecord>,
    /// Every fund movement ever created, oldest first.
    pub movements: Vec<FundMovement>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub closed_at: Option<Timestamp>,
}

impl Escrow {
    pub fn active_dispute(&self) -> Option<&DisputeRecord> {
        self.disputes.iter().rev().find(|d| d.is_active())
    }

    pub fn active_dispute_mut(&mut self) -> Option<&mut DisputeRecord> {
        self.disputes.iter_mut().rev().find(|d| d.is_active())
    }

    pub fn movement_by_key(&self, idempotency_key: &str) -> Option<&FundMovement> {
        self.movements
            .iter()
            .find(|m| m.idempotency_key == idempotency_key)
    }

    pub fn movement_by_transaction(&self, tx: &TransactionId) -> Option<&FundMovement> {
        self.movements
            .iter()
            .find(|m| m.gateway_transaction_id.as_ref() == Some(tx))
    }

    /// Movements accepted by the ledger but not yet submitted to the gateway.
    pub fn undispatched_movements(&self) -> impl Iterator<Item = &FundMovement> {
        self.movements
            .iter()
            .filter(|m| m.status == MovementStatus::Pending && m.gateway_transaction_id.is_none())
    }

    /// The `*_PENDING` settlement sub-state.
    pub fn settlement_status(&self) -> SettlementStatus {
        SettlementStatus::of(&self.movements)
    }

    /// Check the record-level invariants.
    ///
    /// # Errors
    ///
    /// Returns `StateConflict::Blocked` naming the violated invariant. A
    /// failure here means a transition computed an impossible state and
    /// must not be committed.
    pub fn check_invariants(&self) -> Result<(), EscrowError> {
        let accounted = self
            .held_amount
            .checked_add(self.released_amount)
            .and_then(|sum| sum.checked_add(self.refunded_amount));
        if accounted != Some(self.original_amount) {
            return Err(StateConflict::Blocked(format!(
                "amount conservation violated: original {} != held {} + released {} + refunded {}",
                self.original_amount, self.held_amount, self.released_amount, self.refunded_amount
            ))
            .into());
        }
        let active = self.disputes.iter().filter(|d| d.is_active()).count();
        if active > 1 {
            return Err(StateConflict::Blocked(format!(
                "{active} active disputes on escrow {}",
                self.id
            ))
            .into());
        }
        Ok(())
    }
}
