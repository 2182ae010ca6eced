//! # Audit Trail
//!
//! Append-only, per-escrow hash chain of every attempted transition.
//!
//! Each [`AuditEvent`] embeds the `eventHash` of its predecessor for the
//! same escrow. The first event links to [`GENESIS_HASH`]. `eventHash` is
//! the SHA-256 of the JCS canonical form of every other field, so any
//! out-of-band edit to a stored event (or a deletion, or a reordering)
//! breaks the chain at a reportable index.
//!
//! Events are sealed by the store while it holds the escrow's write lock
//! (or row lock), which is what makes the `sequence` and
//! `previousEventHash` assignment race-free.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use escrow_core::{canonical_sha256, EscrowError, EscrowId, PartyId, Role, Timestamp};
use escrow_state::EscrowState;

/// `previousEventHash` of the first event in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Detail recorded on the SUCCESS event of an idempotent replay.
pub const REPLAY_DETAIL: &str = "replay";

/// Whether the attempted transition was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Rejected,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EscrowError> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(EscrowError::Validation(format!(
                "unknown audit outcome: {other:?}"
            ))),
        }
    }
}

/// One sealed entry of an escrow's audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub escrow_id: EscrowId,
    /// Position in this escrow's chain, from 0.
    pub sequence: u64,
    pub actor_id: PartyId,
    pub actor_role: Role,
    pub operation: String,
    /// Absent only on the creation event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_state: Option<EscrowState>,
    /// The state after the attempt. Equal to `from_state` for rejections
    /// and replays.
    pub to_state: EscrowState,
    pub request_payload_hash: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: Timestamp,
    pub previous_event_hash: String,
    pub event_hash: String,
}

/// The hashed portion of an event: everything except `eventHash`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedFields<'a> {
    escrow_id: &'a EscrowId,
    sequence: u64,
    actor_id: &'a PartyId,
    actor_role: Role,
    operation: &'a str,
    from_state: Option<EscrowState>,
    to_state: EscrowState,
    request_payload_hash: &'a str,
    outcome: AuditOutcome,
    detail: Option<&'a str>,
    timestamp: &'a Timestamp,
    previous_event_hash: &'a str,
}

impl AuditEvent {
    fn hashed_fields(&self) -> HashedFields<'_> {
        HashedFields {
            escrow_id: &self.escrow_id,
            sequence: self.sequence,
            actor_id: &self.actor_id,
            actor_role: self.actor_role,
            operation: &self.operation,
            from_state: self.from_state,
            to_state: self.to_state,
            request_payload_hash: &self.request_payload_hash,
            outcome: self.outcome,
            detail: self.detail.as_deref(),
            timestamp: &self.timestamp,
            previous_event_hash: &self.previous_event_hash,
        }
    }

    /// Recompute the hash of this event from its other fields.
    pub fn compute_hash(&self) -> Result<String, EscrowError> {
        Ok(canonical_sha256(&self.hashed_fields())?)
    }
}

/// An audit event before it is placed in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub escrow_id: EscrowId,
    pub actor_id: PartyId,
    pub actor_role: Role,
    pub operation: String,
    pub from_state: Option<EscrowState>,
    pub to_state: EscrowState,
    pub request_payload_hash: String,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    pub timestamp: Timestamp,
}

impl AuditDraft {
    /// Link this draft after `previous` (the current tail of the escrow's
    /// chain, `None` for an empty chain) and compute its hash.
    pub fn seal(self, previous: Option<&AuditEvent>) -> Result<AuditEvent, EscrowError> {
        if let Some(prev) = previous {
            if prev.escrow_id != self.escrow_id {
                return Err(EscrowError::Storage(format!(
                    "audit chain of escrow {} cannot continue the chain of escrow {}",
                    self.escrow_id, prev.escrow_id
                )));
            }
        }
        let mut event = AuditEvent {
            escrow_id: self.escrow_id,
            sequence: previous.map_or(0, |p| p.sequence + 1),
            actor_id: self.actor_id,
            actor_role: self.actor_role,
            operation: self.operation,
            from_state: self.from_state,
            to_state: self.to_state,
            request_payload_hash: self.request_payload_hash,
            outcome: self.outcome,
            detail: self.detail,
            timestamp: self.timestamp,
            previous_event_hash: previous
                .map_or_else(|| GENESIS_HASH.to_string(), |p| p.event_hash.clone()),
            event_hash: String::new(),
        };
        event.event_hash = event.compute_hash()?;
        Ok(event)
    }
}

/// Seal a batch of drafts after `tail`, in order.
pub fn seal_all(
    tail: Option<&AuditEvent>,
    drafts: Vec<AuditDraft>,
) -> Result<Vec<AuditEvent>, EscrowError> {
    let mut sealed: Vec<AuditEvent> = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let prev = sealed.last().or(tail);
        let event = draft.seal(prev)?;
        sealed.push(event);
    }
    Ok(sealed)
}

// ── Verification ─────────────────────────────────────────────────────

/// Why a chain failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainBreak {
    #[error("expected sequence {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("previous event hash does not match the preceding event")]
    PreviousHashMismatch,

    #[error("event hash does not match event contents")]
    HashMismatch,

    #[error("event belongs to escrow {found}, chain is for escrow {expected}")]
    ForeignEscrow { expected: EscrowId, found: EscrowId },
}

/// The first broken link of an audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("audit chain broken at index {index}: {reason}")]
pub struct AuditChainError {
    pub index: usize,
    pub reason: ChainBreak,
}

impl From<AuditChainError> for EscrowError {
    fn from(err: AuditChainError) -> Self {
        EscrowError::Storage(err.to_string())
    }
}

/// Verify a complete chain for one escrow, oldest first.
///
/// An empty slice verifies trivially.
pub fn verify_chain(events: &[AuditEvent]) -> Result<(), AuditChainError> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    let escrow_id = first.escrow_id;
    let mut previous_hash = GENESIS_HASH;

    for (index, event) in events.iter().enumerate() {
        let brk = |reason| AuditChainError { index, reason };

        if event.escrow_id != escrow_id {
            return Err(brk(ChainBreak::ForeignEscrow {
                expected: escrow_id,
                found: event.escrow_id,
            }));
        }
        let expected = index as u64;
        if event.sequence != expected {
            return Err(brk(ChainBreak::SequenceGap {
                expected,
                found: event.sequence,
            }));
        }
        if event.previous_event_hash != previous_hash {
            return Err(brk(ChainBreak::PreviousHashMismatch));
        }
        match event.compute_hash() {
            Ok(hash) if hash == event.event_hash => {}
            _ => return Err(brk(ChainBreak::HashMismatch)),
        }
        previous_hash = event.event_hash.as_str();
    }
    Ok(())
}

/// Outcome of verifying a chain, in the shape the audit endpoint reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChainReport {
    pub fn of(events: &[AuditEvent]) -> Self {
        match verify_chain(events) {
            Ok(()) => Self {
                verified: true,
                broken_at: None,
                reason: None,
            },
            Err(err) => Self {
                verified: false,
                broken_at: Some(err.index),
                reason: Some(err.reason.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(escrow_id: EscrowId, op: &str, from: Option<EscrowState>, to: EscrowState) -> AuditDraft {
        AuditDraft {
            escrow_id,
            actor_id: PartyId::new("buyer-1").unwrap(),
            actor_role: Role::Participant,
            operation: op.to_string(),
            from_state: from,
            to_state: to,
            request_payload_hash: "ab".repeat(32),
            outcome: AuditOutcome::Success,
            detail: None,
            timestamp: Timestamp::parse("2026-01-15T12:00:00Z").unwrap(),
        }
    }

    fn chain(len: usize) -> Vec<AuditEvent> {
        let id = EscrowId::new();
        let mut drafts = vec![draft(id, "create", None, EscrowState::Created)];
        for _ in 1..len {
            drafts.push(draft(id, "extend", Some(EscrowState::Active), EscrowState::Active));
        }
        seal_all(None, drafts).unwrap()
    }

    #[test]
    fn first_event_links_to_genesis() {
        let events = chain(1);
        assert_eq!(events[0].sequence, 0);
        assert_eq!(events[0].previous_event_hash, GENESIS_HASH);
        assert_eq!(events[0].event_hash.len(), 64);
    }

    #[test]
    fn seal_all_links_each_event_to_its_predecessor() {
        let events = chain(3);
        assert_eq!(events[1].previous_event_hash, events[0].event_hash);
        assert_eq!(events[2].previous_event_hash, events[1].event_hash);
        assert_eq!(events[2].sequence, 2);
        assert!(verify_chain(&events).is_ok());
    }

    #[test]
    fn seal_continues_an_existing_tail() {
        let mut events = chain(2);
        let tail = events.last().cloned();
        let more = seal_all(
            tail.as_ref(),
            vec![draft(events[0].escrow_id, "release", Some(EscrowState::Active), EscrowState::Released)],
        )
        .unwrap();
        events.extend(more);
        assert_eq!(events[2].sequence, 2);
        assert!(verify_chain(&events).is_ok());
    }

    #[test]
    fn seal_rejects_a_foreign_tail() {
        let events = chain(1);
        let err = draft(EscrowId::new(), "create", None, EscrowState::Created)
            .seal(events.last())
            .unwrap_err();
        assert_eq!(err.kind(), "STORAGE_ERROR");
    }

    #[test]
    fn empty_chain_verifies() {
        assert!(verify_chain(&[]).is_ok());
        assert!(ChainReport::of(&[]).verified);
    }

    #[test]
    fn tampered_field_is_a_hash_mismatch() {
        let mut events = chain(3);
        events[1].detail = Some("edited".to_string());
        let err = verify_chain(&events).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.reason, ChainBreak::HashMismatch);
    }

    #[test]
    fn deleted_event_is_a_sequence_gap() {
        let mut events = chain(3);
        events.remove(1);
        let err = verify_chain(&events).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(
            err.reason,
            ChainBreak::SequenceGap {
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn rehashed_forgery_breaks_the_next_link() {
        let mut events = chain(3);
        events[1].detail = Some("forged".to_string());
        events[1].event_hash = events[1].compute_hash().unwrap();
        let err = verify_chain(&events).unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(err.reason, ChainBreak::PreviousHashMismatch);
    }

    #[test]
    fn foreign_event_is_reported() {
        let mut events = chain(2);
        let other = chain(2);
        events[1] = other[1].clone();
        let err = verify_chain(&events).unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(err.reason, ChainBreak::ForeignEscrow { .. }));
    }

    #[test]
    fn report_names_the_broken_index() {
        let mut events = chain(2);
        events[0].to_state = EscrowState::Active;
        let report = ChainReport::of(&events);
        assert!(!report.verified);
        assert_eq!(report.broken_at, Some(0));
        assert_eq!(report.reason.as_deref(), Some("event hash does not match event contents"));
    }

    #[test]
    fn event_serializes_camel_case_and_round_trips() {
        let events = chain(1);
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["previousEventHash"], GENESIS_HASH);
        assert_eq!(json["outcome"], "SUCCESS");
        assert!(json.get("fromState").is_none());
        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, events[0]);
        assert!(verify_chain(&[back]).is_ok());
    }
}
