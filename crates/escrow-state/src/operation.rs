//! # Operation Requests
//!
//! One concrete request type per ledger operation, each with its own
//! fields. `Operation` is what the validator consumes and what the audit
//! trail hashes (`requestPayloadHash` is the SHA-256 of its canonical JSON).

use escrow_arbitration::{DisputeFiling, ResolutionOutcome};
use escrow_core::{Amount, Currency, MovementId, PartyId, RfqId, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};

/// Open a new escrow in `CREATED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEscrowRequest {
    pub rfq_id: RfqId,
    pub buyer_id: PartyId,
    pub supplier_id: PartyId,
    pub amount: Amount,
    pub currency: Currency,
    pub terms: String,
    pub deadline: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Defaults to the buyer id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_account: Option<String>,
    /// Defaults to the supplier id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_account: Option<String>,
}

/// The gateway confirmed the buyer's funds were collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRequest {
    pub transaction_id: TransactionId,
}

/// Release to the supplier or refund to the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PayoutRequest {
    /// Defaults to the full held amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendRequest {
    pub new_deadline: Timestamp,
    pub reason: String,
    /// Appended to the escrow's terms on a new line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_terms: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    /// Nothing has been collected before funding, so only zero is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalateRequest {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub outcome: ResolutionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// The dispatcher handed a movement to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSubmissionRequest {
    pub movement_id: MovementId,
    pub transaction_id: TransactionId,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmSettlementRequest {
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailSettlementRequest {
    pub transaction_id: TransactionId,
    pub reason: String,
}

/// The dispatcher gave up on a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRequest {
    pub movement_id: MovementId,
    pub reason: String,
    pub attempts: u32,
}

/// Every operation on an existing escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    Fund(FundRequest),
    Release(PayoutRequest),
    Refund(PayoutRequest),
    Dispute(DisputeFiling),
    Extend(ExtendRequest),
    Cancel(CancelRequest),
    Expire,
    AcknowledgeDispute,
    EscalateDispute(EscalateRequest),
    ResolveDispute(ResolveRequest),
    RecordSubmission(RecordSubmissionRequest),
    ConfirmSettlement(ConfirmSettlementRequest),
    FailSettlement(FailSettlementRequest),
    DeadLetter(DeadLetterRequest),
}

impl Operation {
    /// Operation name as recorded in the audit trail and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fund(_) => "fund",
            Self::Release(_) => "release",
            Self::Refund(_) => "refund",
            Self::Dispute(_) => "dispute",
            Self::Extend(_) => "extend",
            Self::Cancel(_) => "cancel",
            Self::Expire => "expire",
            Self::AcknowledgeDispute => "acknowledge_dispute",
            Self::EscalateDispute(_) => "escalate_dispute",
            Self::ResolveDispute(_) => "resolve_dispute",
            Self::RecordSubmission(_) => "record_submission",
            Self::ConfirmSettlement(_) => "confirm_settlement",
            Self::FailSettlement(_) => "fail_settlement",
            Self::DeadLetter(_) => "dead_letter",
        }
    }

    /// Settlement bookkeeping never changes the escrow state and is
    /// accepted in terminal states.
    pub fn is_bookkeeping(&self) -> bool {
        matches!(
            self,
            Self::RecordSubmission(_)
                | Self::ConfirmSettlement(_)
                | Self::FailSettlement(_)
                | Self::DeadLetter(_)
        )
    }
}
