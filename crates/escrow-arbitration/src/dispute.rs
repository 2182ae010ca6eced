//! # Dispute Lifecycle
//!
//! A dispute is opened against an `ACTIVE` escrow and moves through:
//!
//! ```text
//! OPEN ──acknowledge()──▶ MEDIATION ──resolve()──▶ RESOLVED
//!   │                        │
//!   │                        └──escalate()──▶ ESCALATED ──resolve()──▶ RESOLVED
//!   │
//!   ├──escalate() (mediation timeout)──▶ ESCALATED
//!   └──resolve()  (acknowledges first)──▶ MEDIATION ──▶ RESOLVED
//! ```
//!
//! `RESOLVED` is the only terminal state. An escalated dispute waits for a
//! human resolution; nothing automatic moves it.
//!
//! ## Design Choice: Validated Enum
//!
//! Disputes are persisted and sent over HTTP with a state unknown at compile
//! time, so the lifecycle is a validated enum with one method per
//! transition. Each method checks the source state and appends a
//! [`DisputeTransition`] to the record's log.

use chrono::Duration;
use escrow_core::{Amount, DisputeId, PartyId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::ArbitrationError;
use crate::resolution::{Payout, RequestedAction, ResolutionOutcome};

/// Maximum length of one evidence reference.
pub const MAX_EVIDENCE_REF_LEN: usize = 512;

// ── Dispute Status ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    /// Raised, awaiting a mediator.
    Open,
    /// A mediator has acknowledged the dispute.
    Mediation,
    /// Outcome decided and applied to the escrow. Terminal.
    Resolved,
    /// Handed to a human; suspends automatic handling.
    Escalated,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Mediation => "MEDIATION",
            Self::Resolved => "RESOLVED",
            Self::Escalated => "ESCALATED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ArbitrationError> {
        match s {
            "OPEN" => Ok(Self::Open),
            "MEDIATION" => Ok(Self::Mediation),
            "RESOLVED" => Ok(Self::Resolved),
            "ESCALATED" => Ok(Self::Escalated),
            other => Err(ArbitrationError::Validation(format!(
                "unknown dispute status: {other:?}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    pub fn valid_transitions(&self) -> &'static [DisputeStatus] {
        match self {
            Self::Open => &[Self::Mediation, Self::Escalated],
            Self::Mediation => &[Self::Resolved, Self::Escalated],
            Self::Escalated => &[Self::Resolved],
            Self::Resolved => &[],
        }
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Evidence ───────────────────────────────────────────────────────────

/// Reference to a piece of evidence held elsewhere (an upload key, URL, or
/// document digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRef(String);

impl EvidenceRef {
    pub fn new(value: impl Into<String>) -> Result<Self, ArbitrationError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ArbitrationError::Validation(
                "evidence references must not be empty".to_string(),
            ));
        }
        if trimmed.chars().count() > MAX_EVIDENCE_REF_LEN {
            return Err(ArbitrationError::Validation(format!(
                "evidence reference exceeds {MAX_EVIDENCE_REF_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ── Transition Record ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeTransition {
    pub from: DisputeStatus,
    pub to: DisputeStatus,
    pub actor: PartyId,
    pub at: Timestamp,
}

// ── Filing ─────────────────────────────────────────────────────────────

/// The contents of a new dispute, as submitted by a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeFiling {
    pub reason: String,
    pub description: String,
    pub evidence: Vec<String>,
    pub requested_action: RequestedAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contested_amount: Option<Amount>,
}

// ── The Dispute ────────────────────────────────────────────────────────

/// One dispute raised against an escrow. The escrow keeps every dispute it
/// has ever had; at most one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub id: DisputeId,
    pub status: DisputeStatus,
    pub reason: String,
    pub description: String,
    /// Ordered as submitted. Never empty.
    pub evidence: Vec<EvidenceRef>,
    pub requested_action: RequestedAction,
    pub contested_amount: Option<Amount>,
    pub raised_by: PartyId,
    pub opened_at: Timestamp,
    pub mediator_id: Option<PartyId>,
    pub acknowledged_at: Option<Timestamp>,
    pub escalated_at: Option<Timestamp>,
    pub escalation_reason: Option<String>,
    pub resolution_outcome: Option<ResolutionOutcome>,
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<Timestamp>,
    pub transition_log: Vec<DisputeTransition>,
}

impl DisputeRecord {
    /// Open a dispute in [`DisputeStatus::Open`].
    ///
    /// # Errors
    ///
    /// - `Validation` if the reason is blank, evidence is empty or malformed,
    ///   the contested amount is zero, or a partial refund is requested
    ///   without naming a contested amount.
    /// - `HeldExceeded` if the contested amount exceeds `held`.
    pub fn open(
        filing: DisputeFiling,
        raised_by: PartyId,
        held: Amount,
        now: Timestamp,
    ) -> Result<Self, ArbitrationError> {
        if filing.reason.trim().is_empty() {
            return Err(ArbitrationError::Validation(
                "dispute reason must not be empty".to_string(),
            ));
        }
        if filing.evidence.is_empty() {
            return Err(ArbitrationError::Validation(
                "a dispute requires at least one evidence reference".to_string(),
            ));
        }
        let evidence = filing
            .evidence
            .into_iter()
            .map(EvidenceRef::new)
            .collect::<Result<Vec<_>, _>>()?;

        match filing.contested_amount {
            Some(amount) if amount.is_zero() => {
                return Err(ArbitrationError::Validation(
                    "contested amount must be positive".to_string(),
                ));
            }
            Some(amount) if amount > held => {
                return Err(ArbitrationError::HeldExceeded {
                    requested: amount.to_string(),
                    held: held.to_string(),
                });
            }
            None if filing.requested_action == RequestedAction::PartialRefund => {
                return Err(ArbitrationError::Validation(
                    "a partial refund request must name the contested amount".to_string(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            id: DisputeId::new(),
            status: DisputeStatus::Open,
            reason: filing.reason.trim().to_string(),
            description: filing.description,
            evidence,
            requested_action: filing.requested_action,
            contested_amount: filing.contested_amount,
            raised_by,
            opened_at: now,
            mediator_id: None,
            acknowledged_at: None,
            escalated_at: None,
            escalation_reason: None,
            resolution_outcome: None,
            resolution_notes: None,
            resolved_at: None,
            transition_log: Vec::new(),
        })
    }

    /// Not yet resolved.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Still `OPEN` after `timeout` has elapsed since opening.
    pub fn is_mediation_overdue(&self, now: Timestamp, timeout: Duration) -> bool {
        self.status == DisputeStatus::Open && self.opened_at.plus(timeout) <= now
    }

    /// Transition OPEN → MEDIATION, assigning the mediator.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::InvalidTransition`] if not `OPEN`.
    pub fn acknowledge(&mut self, mediator: PartyId, now: Timestamp) -> Result<(), ArbitrationError> {
        self.require_state(&[DisputeStatus::Open], DisputeStatus::Mediation)?;
        self.record_transition(DisputeStatus::Mediation, mediator.clone(), now);
        self.mediator_id = Some(mediator);
        self.acknowledged_at = Some(now);
        Ok(())
    }

    /// Transition OPEN | MEDIATION → ESCALATED.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::InvalidTransition`] from any other state.
    pub fn escalate(
        &mut self,
        reason: String,
        actor: PartyId,
        now: Timestamp,
    ) -> Result<(), ArbitrationError> {
        self.require_state(
            &[DisputeStatus::Open, DisputeStatus::Mediation],
            DisputeStatus::Escalated,
        )?;
        self.record_transition(DisputeStatus::Escalated, actor, now);
        self.escalated_at = Some(now);
        self.escalation_reason = Some(reason);
        Ok(())
    }

    /// Resolve the dispute and compute the payout to apply to the escrow.
    ///
    /// From `OPEN` the resolver acknowledges first, so the log always shows
    /// `OPEN → MEDIATION → RESOLVED`. The record is only mutated when the
    /// outcome is valid against `held`.
    ///
    /// # Errors
    ///
    /// - `TerminalState` if already resolved.
    /// - Any error from [`ResolutionOutcome::payout`].
    pub fn resolve(
        &mut self,
        outcome: ResolutionOutcome,
        notes: Option<String>,
        resolver: PartyId,
        held: Amount,
        now: Timestamp,
    ) -> Result<Payout, ArbitrationError> {
        self.require_state(
            &[
                DisputeStatus::Open,
                DisputeStatus::Mediation,
                DisputeStatus::Escalated,
            ],
            DisputeStatus::Resolved,
        )?;
        let payout = outcome.payout(held, self.contested_amount)?;

        if self.status == DisputeStatus::Open {
            self.acknowledge(resolver.clone(), now)?;
        }
        self.record_transition(DisputeStatus::Resolved, resolver, now);
        self.resolution_outcome = Some(outcome);
        self.resolution_notes = notes;
        self.resolved_at = Some(now);
        Ok(payout)
    }

    fn require_state(
        &self,
        allowed: &[DisputeStatus],
        target: DisputeStatus,
    ) -> Result<(), ArbitrationError> {
        if self.status.is_terminal() {
            return Err(ArbitrationError::TerminalState {
                dispute_id: self.id.to_string(),
                state: self.status.as_str().to_string(),
            });
        }
        if !allowed.contains(&self.status) {
            return Err(ArbitrationError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
                reason: format!("dispute is {}", self.status),
            });
        }
        Ok(())
    }

    fn record_transition(&mut self, to: DisputeStatus, actor: PartyId, at: Timestamp) {
        self.transition_log.push(DisputeTransition {
            from: self.status,
            to,
            actor,
            at,
        });
        self.status = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> Timestamp {
        Timestamp::parse("2026-03-01T09:00:00Z").unwrap()
    }

    fn party(id: &str) -> PartyId {
        PartyId::new(id).unwrap()
    }

    fn filing() -> DisputeFiling {
        DisputeFiling {
            reason: "quality issue".to_string(),
            description: "half the batch arrived cracked".to_string(),
            evidence: vec!["photo1".to_string()],
            requested_action: RequestedAction::PartialRefund,
            contested_amount: Some(Amount::from_units(3000)),
        }
    }

    fn open_dispute() -> DisputeRecord {
        DisputeRecord::open(filing(), party("buyer-1"), Amount::from_units(6000), t0()).unwrap()
    }

    #[test]
    fn open_creates_open_dispute() {
        let d = open_dispute();
        assert_eq!(d.status, DisputeStatus::Open);
        assert!(d.is_active());
        assert_eq!(d.evidence[0].as_str(), "photo1");
        assert_eq!(d.raised_by.as_str(), "buyer-1");
        assert!(d.transition_log.is_empty());
    }

    #[test]
    fn open_rejects_empty_evidence() {
        let mut f = filing();
        f.evidence.clear();
        let err = DisputeRecord::open(f, party("buyer-1"), Amount::from_units(6000), t0());
        assert!(matches!(err, Err(ArbitrationError::Validation(_))));
    }

    #[test]
    fn open_rejects_blank_evidence_entry() {
        let mut f = filing();
        f.evidence.push("  ".to_string());
        assert!(DisputeRecord::open(f, party("buyer-1"), Amount::from_units(6000), t0()).is_err());
    }

    #[test]
    fn open_rejects_contested_above_held() {
        let mut f = filing();
        f.contested_amount = Some(Amount::from_units(7000));
        let err =
            DisputeRecord::open(f, party("buyer-1"), Amount::from_units(6000), t0()).unwrap_err();
        assert!(matches!(err, ArbitrationError::HeldExceeded { .. }));
    }

    #[test]
    fn open_partial_refund_requires_amount() {
        let mut f = filing();
        f.contested_amount = None;
        assert!(DisputeRecord::open(f, party("buyer-1"), Amount::from_units(6000), t0()).is_err());
    }

    #[test]
    fn acknowledge_assigns_mediator() {
        let mut d = open_dispute();
        d.acknowledge(party("med-1"), t0()).unwrap();
        assert_eq!(d.status, DisputeStatus::Mediation);
        assert_eq!(d.mediator_id, Some(party("med-1")));
        assert_eq!(d.transition_log.len(), 1);
        assert!(d.acknowledge(party("med-2"), t0()).is_err());
    }

    #[test]
    fn resolve_from_open_acknowledges_first() {
        let mut d = open_dispute();
        let payout = d
            .resolve(
                ResolutionOutcome::PartialRefund {
                    amount: Amount::from_units(3000),
                },
                Some("split".to_string()),
                party("med-1"),
                Amount::from_units(6000),
                t0(),
            )
            .unwrap();
        assert_eq!(payout.amount, Amount::from_units(3000));
        assert_eq!(d.status, DisputeStatus::Resolved);
        assert!(!d.is_active());
        let path: Vec<_> = d.transition_log.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            path,
            vec![
                (DisputeStatus::Open, DisputeStatus::Mediation),
                (DisputeStatus::Mediation, DisputeStatus::Resolved)
            ]
        );
        assert_eq!(d.resolved_at, Some(t0()));
    }

    #[test]
    fn invalid_outcome_leaves_record_untouched() {
        let mut d = open_dispute();
        let before = d.clone();
        let err = d.resolve(
            ResolutionOutcome::PartialRefund {
                amount: Amount::from_units(4000),
            },
            None,
            party("med-1"),
            Amount::from_units(6000),
            t0(),
        );
        assert!(err.is_err());
        assert_eq!(d, before);
    }

    #[test]
    fn resolved_is_terminal() {
        let mut d = open_dispute();
        d.resolve(
            ResolutionOutcome::Release { amount: None },
            None,
            party("med-1"),
            Amount::from_units(6000),
            t0(),
        )
        .unwrap();
        let err = d
            .escalate("late".to_string(), party("admin"), t0())
            .unwrap_err();
        assert!(matches!(err, ArbitrationError::TerminalState { .. }));
    }

    #[test]
    fn escalated_can_still_be_resolved() {
        let mut d = open_dispute();
        d.escalate("no mediator".to_string(), PartyId::system(), t0())
            .unwrap();
        assert_eq!(d.status, DisputeStatus::Escalated);
        assert!(d.is_active());
        assert!(d.escalate("again".to_string(), party("admin"), t0()).is_err());
        d.resolve(
            ResolutionOutcome::Refund { amount: None },
            None,
            party("admin"),
            Amount::from_units(6000),
            t0(),
        )
        .unwrap();
        assert_eq!(d.status, DisputeStatus::Resolved);
    }

    #[test]
    fn mediation_overdue_only_while_open() {
        let mut d = open_dispute();
        let timeout = Duration::hours(72);
        assert!(!d.is_mediation_overdue(t0().plus(Duration::hours(71)), timeout));
        assert!(d.is_mediation_overdue(t0().plus(Duration::hours(72)), timeout));
        d.acknowledge(party("med-1"), t0()).unwrap();
        assert!(!d.is_mediation_overdue(t0().plus(Duration::hours(100)), timeout));
    }

    #[test]
    fn valid_transitions_table() {
        assert_eq!(
            DisputeStatus::Open.valid_transitions(),
            &[DisputeStatus::Mediation, DisputeStatus::Escalated]
        );
        assert!(DisputeStatus::Resolved.valid_transitions().is_empty());
        for s in [
            DisputeStatus::Open,
            DisputeStatus::Mediation,
            DisputeStatus::Resolved,
            DisputeStatus::Escalated,
        ] {
            assert_eq!(DisputeStatus::parse(s.as_str()).unwrap(), s);
        }
    }
}
