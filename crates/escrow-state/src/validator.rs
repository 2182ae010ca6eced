//! # Transition Validator
//!
//! A pure function from (current snapshot, operation, actor, now, policy) to
//! either the next snapshot or a typed error. Checks run in a fixed order:
//!
//! 1. **Shape**: required fields, positive amounts, length bounds, evidence.
//! 2. **Authorization**: the actor's capacity on this escrow.
//! 3. **Replay**: a reused idempotency key or an already-applied
//!    bookkeeping step returns the current snapshot unchanged.
//! 4. **State**: the operation's permitted source states, then the legal
//!    edge check against [`EscrowState::valid_transitions`].
//! 5. **Amounts**: requested amounts against the held amount, then the
//!    record invariants on the computed snapshot.
//!
//! Nothing here performs I/O. The ledger persists the returned snapshot with
//! a compare-and-swap on `version`.

use escrow_arbitration::{DisputeFiling, EvidenceRef, PayoutTarget};
use escrow_core::{
    Actor, Amount, CanonicalBytes, EscrowError, EscrowId, MovementId, Role, StateConflict,
    Timestamp, TransactionId,
};
use serde::{Deserialize, Serialize};

use crate::escrow::{Escrow, EscrowState};
use crate::movement::{FundMovement, MovementKind, MovementStatus};
use crate::operation::{
    CancelRequest, ConfirmSettlementRequest, CreateEscrowRequest, DeadLetterRequest,
    EscalateRequest, ExtendRequest, FailSettlementRequest, FundRequest, Operation, PayoutRequest,
    RecordSubmissionRequest, ResolveRequest,
};
use crate::policy::LedgerPolicy;

/// Maximum length of a caller-supplied idempotency key or payout account.
pub const MAX_KEY_LEN: usize = 128;

// ─── Capacity ────────────────────────────────────────────────────────

/// The part an actor plays on one particular escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    Buyer,
    Supplier,
    Admin,
    Mediator,
    System,
    /// A participant who is neither buyer nor supplier of this escrow.
    Outsider,
}

impl Capacity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Supplier => "supplier",
            Self::Admin => "admin",
            Self::Mediator => "mediator",
            Self::System => "system",
            Self::Outsider => "outsider",
        }
    }

    /// May read the escrow and its audit trail.
    pub fn can_read(&self) -> bool {
        !matches!(self, Self::Outsider)
    }
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn capacity(escrow: &Escrow, actor: &Actor) -> Capacity {
    match actor.role {
        Role::Admin => Capacity::Admin,
        Role::Mediator => Capacity::Mediator,
        Role::System => Capacity::System,
        Role::Participant if actor.id == escrow.buyer_id => Capacity::Buyer,
        Role::Participant if actor.id == escrow.supplier_id => Capacity::Supplier,
        Role::Participant => Capacity::Outsider,
    }
}

// ─── Transition ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStep {
    pub from: EscrowState,
    pub to: EscrowState,
}

/// A movement whose settlement status changed in this transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementUpdate {
    pub movement_id: MovementId,
    pub kind: MovementKind,
    pub amount: Amount,
    pub status: MovementStatus,
    pub transaction_id: Option<TransactionId>,
    pub reason: Option<String>,
}

/// The validated result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub operation: &'static str,
    /// One step per audited state change; two for funding
    /// (`CREATED→FUNDED`, `FUNDED→ACTIVE`). Never empty.
    pub steps: Vec<StateStep>,
    /// The snapshot to persist. Equal to the input when `replay` is set.
    pub next: Escrow,
    /// Movements created by this transition, to be dispatched after commit.
    pub new_movements: Vec<FundMovement>,
    pub settlement: Option<SettlementUpdate>,
    /// An idempotent repeat of an already-applied request.
    pub replay: bool,
}

impl Transition {
    fn replay(operation: &'static str, current: &Escrow) -> Self {
        Self {
            operation,
            steps: vec![StateStep {
                from: current.state,
                to: current.state,
            }],
            next: current.clone(),
            new_movements: Vec::new(),
            settlement: None,
            replay: true,
        }
    }

    pub fn from(&self) -> EscrowState {
        self.steps.first().map_or(self.next.state, |s| s.from)
    }

    pub fn to(&self) -> EscrowState {
        self.next.state
    }

    /// This transition moved the escrow into a terminal state.
    pub fn reached_terminal(&self) -> bool {
        !self.replay && self.to().is_terminal() && !self.from().is_terminal()
    }
}

enum Effect {
    Replay,
    Applied {
        steps: Vec<StateStep>,
        movements: Vec<FundMovement>,
        settlement: Option<SettlementUpdate>,
    },
}

impl Effect {
    fn stay(state: EscrowState) -> Self {
        Self::Applied {
            steps: vec![StateStep {
                from: state,
                to: state,
            }],
            movements: Vec::new(),
            settlement: None,
        }
    }
}

// ─── Create ──────────────────────────────────────────────────────────

/// Validate a creation request and build the initial `CREATED` snapshot
/// at version 1.
///
/// # Errors
///
/// - `Validation` if the amount is not positive, the currency is not
///   allowed, the deadline is not in the future, the terms are too long,
///   buyer and supplier coincide, or the metadata cannot be canonicalized.
/// - `Authorization` unless the actor is the buyer or an admin.
pub fn validate_create(
    req: &CreateEscrowRequest,
    actor: &Actor,
    now: Timestamp,
    policy: &LedgerPolicy,
) -> Result<Escrow, EscrowError> {
    if !req.amount.is_positive() {
        return Err(EscrowError::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }
    if !policy.allows(&req.currency) {
        return Err(EscrowError::Validation(format!(
            "currency {} is not accepted",
            req.currency
        )));
    }
    if req.deadline <= now {
        return Err(EscrowError::Validation(format!(
            "deadline {} must be in the future",
            req.deadline
        )));
    }
    check_text("terms", &req.terms, policy.max_terms_len, false)?;
    if req.buyer_id == req.supplier_id {
        return Err(EscrowError::Validation(
            "buyer and supplier must be different parties".to_string(),
        ));
    }
    let buyer_account = account_or(req.buyer_account.as_deref(), req.buyer_id.as_str())?;
    let supplier_account = account_or(req.supplier_account.as_deref(), req.supplier_id.as_str())?;
    if let Some(metadata) = &req.metadata {
        CanonicalBytes::new(metadata)?;
    }

    let allowed = match actor.role {
        Role::Admin => true,
        Role::Participant => actor.id == req.buyer_id,
        Role::Mediator | Role::System => false,
    };
    if !allowed {
        return Err(EscrowError::Authorization(format!(
            "{} may not create an escrow on behalf of buyer {}",
            actor.id, req.buyer_id
        )));
    }

    Ok(Escrow {
        id: EscrowId::new(),
        rfq_id: req.rfq_id.clone(),
        buyer_id: req.buyer_id.clone(),
        supplier_id: req.supplier_id.clone(),
        buyer_account,
        supplier_account,
        currency: req.currency.clone(),
        original_amount: req.amount,
        held_amount: req.amount,
        released_amount: Amount::ZERO,
        refunded_amount: Amount::ZERO,
        state: EscrowState::Created,
        deadline: req.deadline,
        version: 1,
        terms: req.terms.clone(),
        metadata: req.metadata.clone(),
        funding_transaction_id: None,
        funded_at: None,
        disputes: Vec::new(),
        movements: Vec::new(),
        created_at: now,
        updated_at: now,
        closed_at: None,
    })
}

// ─── Apply ───────────────────────────────────────────────────────────

/// Apply `op` to `current` on behalf of `actor`.
///
/// On success the returned snapshot has `version = current.version + 1`,
/// unless the transition is a replay, in which case it equals `current`.
///
/// # Errors
///
/// `Validation`, `Authorization`, `StateConflict` or `NotFound` (unknown
/// movement or transaction). `current` is never modified.
pub fn apply(
    current: &Escrow,
    op: &Operation,
    actor: &Actor,
    now: Timestamp,
    policy: &LedgerPolicy,
) -> Result<Transition, EscrowError> {
    let cap = capacity(current, actor);
    let mut next = current.clone();

    let effect = match op {
        Operation::Fund(req) => fund(current, &mut next, req, cap, now)?,
        Operation::Release(req) => payout(current, &mut next, MovementKind::Release, req, cap, now, policy)?,
        Operation::Refund(req) => payout(current, &mut next, MovementKind::Refund, req, cap, now, policy)?,
        Operation::Dispute(filing) => dispute(current, &mut next, filing, actor, cap, now, policy)?,
        Operation::Extend(req) => extend(current, &mut next, req, cap, now, policy)?,
        Operation::Cancel(req) => cancel(current, &mut next, req, cap, policy)?,
        Operation::Expire => expire(current, &mut next, cap, now)?,
        Operation::AcknowledgeDispute => acknowledge(current, &mut next, actor, cap, now)?,
        Operation::EscalateDispute(req) => escalate(current, &mut next, req, actor, cap, now, policy)?,
        Operation::ResolveDispute(req) => resolve(current, &mut next, req, actor, cap, now, policy)?,
        Operation::RecordSubmission(req) => record_submission(current, &mut next, req, cap, now)?,
        Operation::ConfirmSettlement(req) => confirm_settlement(current, &mut next, req, cap, now)?,
        Operation::FailSettlement(req) => fail_settlement(current, &mut next, req, cap, policy)?,
        Operation::DeadLetter(req) => dead_letter(current, &mut next, req, cap, policy)?,
    };

    let (steps, new_movements, settlement) = match effect {
        Effect::Replay => return Ok(Transition::replay(op.name(), current)),
        Effect::Applied {
            steps,
            movements,
            settlement,
        } => (steps, movements, settlement),
    };

    if !op.is_bookkeeping() {
        for step in &steps {
            if !step.from.can_transition_to(step.to) {
                return Err(illegal(step.from, op.name()));
            }
        }
    }
    if next.deadline < current.deadline {
        return Err(StateConflict::Blocked("deadline may not move backwards".to_string()).into());
    }

    next.version = current.version + 1;
    next.updated_at = now;
    if next.state.is_terminal() && !current.state.is_terminal() {
        next.closed_at = Some(now);
    }
    next.check_invariants()?;

    Ok(Transition {
        operation: op.name(),
        steps,
        next,
        new_movements,
        settlement,
        replay: false,
    })
}

// ─── Operations ──────────────────────────────────────────────────────

fn fund(
    current: &Escrow,
    next: &mut Escrow,
    req: &FundRequest,
    cap: Capacity,
    now: Timestamp,
) -> Result<Effect, EscrowError> {
    require_capacity(cap, &[Capacity::System, Capacity::Admin], "fund")?;
    match &current.funding_transaction_id {
        Some(tx) if *tx == req.transaction_id => return Ok(Effect::Replay),
        Some(other) => {
            return Err(StateConflict::Blocked(format!(
                "escrow {} was already funded by transaction {other}",
                current.id
            ))
            .into())
        }
        None => {}
    }
    require_state(current, &[EscrowState::Created], "fund")?;

    next.state = EscrowState::Active;
    next.funding_transaction_id = Some(req.transaction_id.clone());
    next.funded_at = Some(now);
    Ok(Effect::Applied {
        steps: vec![
            StateStep {
                from: EscrowState::Created,
                to: EscrowState::Funded,
            },
            StateStep {
                from: EscrowState::Funded,
                to: EscrowState::Active,
            },
        ],
        movements: Vec::new(),
        settlement: None,
    })
}

fn payout(
    current: &Escrow,
    next: &mut Escrow,
    kind: MovementKind,
    req: &PayoutRequest,
    cap: Capacity,
    now: Timestamp,
    policy: &LedgerPolicy,
) -> Result<Effect, EscrowError> {
    let op = kind.as_str();
    check_text("reason", &req.reason, policy.max_reason_len, true)?;
    check_evidence(&req.evidence)?;
    if req.amount.is_some_and(|a| a.is_zero()) {
        return Err(EscrowError::Validation(format!(
            "{op} amount must be greater than zero"
        )));
    }

    // The party giving up its claim on the funds consents to the payout.
    let consenting = match kind {
        MovementKind::Release => Capacity::Buyer,
        MovementKind::Refund => Capacity::Supplier,
    };
    require_capacity(cap, &[consenting, Capacity::Admin, Capacity::Mediator], op)?;

    let key = movement_key(current, op, req.idempotency_key.as_deref())?;
    if req.idempotency_key.is_some() {
        if let Some(effect) = check_key_reuse(current, &key, kind, req.amount)? {
            return Ok(effect);
        }
    }

    match current.state {
        EscrowState::Active if cap == Capacity::Mediator => {
            return Err(EscrowError::Authorization(
                "mediators may only move funds of a disputed escrow".to_string(),
            ));
        }
        EscrowState::Active => {}
        EscrowState::Disputed if current.active_dispute().is_some() => {
            return Err(if matches!(cap, Capacity::Admin | Capacity::Mediator) {
                StateConflict::Blocked(format!(
                    "escrow {} has an active dispute; resolve it before moving funds",
                    current.id
                ))
                .into()
            } else {
                EscrowError::Authorization(
                    "funds under an active dispute move only through its resolution".to_string(),
                )
            });
        }
        EscrowState::Disputed => {}
        _ => return Err(illegal(current.state, op)),
    }

    let amount = req.amount.unwrap_or(current.held_amount);
    let movement = move_funds(next, kind, amount, key, now)?;
    let to = payout_state(current.state, next, kind);
    next.state = to;
    Ok(Effect::Applied {
        steps: vec![StateStep {
            from: current.state,
            to,
        }],
        movements: vec![movement],
        settlement: None,
    })
}

fn dispute(
    current: &Escrow,
    next: &mut Escrow,
    filing: &DisputeFiling,
    actor: &Actor,
    cap: Capacity,
    now: Timestamp,
    policy: &LedgerPolicy,
) -> Result<Effect, EscrowError> {
    check_text("reason", &filing.reason, policy.max_reason_len, true)?;
    check_text("description", &filing.description, policy.max_description_len, false)?;
    require_capacity(cap, &[Capacity::Buyer, Capacity::Supplier], "dispute")?;
    if let Some(active) = current.active_dispute() {
        return Err(StateConflict::Blocked(format!(
            "dispute {} is already active on escrow {}",
            active.id, current.id
        ))
        .into());
    }
    require_state(current, &[EscrowState::Active], "dispute")?;

    let record = escrow_arbitration::DisputeRecord::open(
        filing.clone(),
        actor.id.clone(),
        current.held_amount,
        now,
    )?;
    next.disputes.push(record);
    next.state = EscrowState::Disputed;
    Ok(Effect::Applied {
        steps: vec![StateStep {
            from: EscrowState::Active,
            to: EscrowState::Disputed,
        }],
        movements: Vec::new(),
        settlement: None,
    })
}

fn extend(
    current: &Escrow,
    next: &mut Escrow,
    req: &ExtendRequest,
    cap: Capacity,
    now: Timestamp,
    policy: &LedgerPolicy,
) -> Result<Effect, EscrowError> {
    check_text("reason", &req.reason, policy.max_reason_len, true)?;
    if req.new_deadline <= now {
        return Err(EscrowError::Validation(format!(
            "new deadline {} must be in the future",
            req.new_deadline
        )));
    }
    require_capacity(cap, &[Capacity::Buyer, Capacity::Admin], "extend")?;
    require_state(current, &[EscrowState::Active], "extend")?;
    if req.new_deadline <= current.deadline {
        return Err(EscrowError::Validation(format!(
            "new deadline {} must be after the current deadline {}",
            req.new_deadline, current.deadline
        )));
    }
    if let Some(additional) = req.additional_terms.as_deref().map(str::trim) {
        if !additional.is_empty() {
            let terms = if current.terms.is_empty() {
                additional.to_string()
            } else {
                format!("{}\n{additional}", current.terms)
            };
            check_text("terms", &terms, policy.max_terms_len, false)?;
            next.terms = terms;
        }
    }
    next.deadline = req.new_deadline;
    Ok(Effect::stay(current.state))
}

fn cancel(
    current: &Escrow,
    next: &mut Escrow,
    req: &CancelRequest,
    cap: Capacity,
    policy: &LedgerPolicy,
) -> Result<Effect, EscrowError> {
    check_text("reason", &req.reason, policy.max_reason_len, true)?;
    check_evidence(&req.evidence)?;
    if req.refund_amount.is_some_and(|a| a.is_positive()) {
        return Err(EscrowError::Validation(
            "nothing has been collected before funding; refund amount must be zero".to_string(),
        ));
    }
    require_capacity(cap, &[Capacity::Buyer, Capacity::Admin], "cancel")?;
    require_state(current, &[EscrowState::Created], "cancel")?;
    next.state = EscrowState::Cancelled;
    Ok(Effect::Applied {
        steps: vec![StateStep {
            from: EscrowState::Created,
            to: EscrowState::Cancelled,
        }],
        movements: Vec::new(),
        settlement: None,
    })
}

fn expire(
    current: &Escrow,
    next: &mut Escrow,
    cap: Capacity,
    now: Timestamp,
) -> Result<Effect, EscrowError> {
    require_capacity(cap, &[Capacity::System, Capacity::Admin], "expire")?;
    require_state(current, &[EscrowState::Active], "expire")?;
    if current.deadline >= now {
        return Err(StateConflict::Blocked(format!(
            "deadline {} has not passed",
            current.deadline
        ))
        .into());
    }

    let mut movements = Vec::new();
    if current.held_amount.is_positive() {
        let key = movement_key(current, "expire", None)?;
        movements.push(move_funds(
            next,
            MovementKind::Refund,
            current.held_amount,
            key,
            now,
        )?);
    }
    next.state = EscrowState::Expired;
    Ok(Effect::Applied {
        steps: vec![StateStep {
            from: EscrowState::Active,
            to: EscrowState::Expired,
        }],
        movements,
        settlement: None,
    })
}

fn acknowledge(
    current: &Escrow,
    next: &mut Escrow,
    actor: &Actor,
    cap: Capacity,
    now: Timestamp,
) -> Result<Effect, EscrowError> {
    require_capacity(cap, &[Capacity::Admin, Capacity::Mediator], "acknowledge_dispute")?;
    require_state(current, &[EscrowState::Disputed], "acknowledge_dispute")?;
    let dispute = next
        .active_dispute_mut()
        .ok_or_else(|| no_active_dispute(current))?;
    dispute.acknowledge(actor.id.clone(), now)?;
    Ok(Effect::stay(current.state))
}

fn escalate(
    current: &Escrow,
    next: &mut Escrow,
    req: &EscalateRequest,
    actor: &Actor,
    cap: Capacity,
    now: Timestamp,
    policy: &LedgerPolicy,
) -> Result<Effect, EscrowError> {
    check_text("reason", &req.reason, policy.max_reason_len, true)?;
    require_capacity(
        cap,
        &[Capacity::Admin, Capacity::Mediator, Capacity::System],
        "escalate_dispute",
    )?;
    require_state(current, &[EscrowState::Disputed], "escalate_dispute")?;
    let dispute = next
        .active_dispute_mut()
        .ok_or_else(|| no_active_dispute(current))?;
    if cap == Capacity::System && !dispute.is_mediation_overdue(now, policy.mediation_timeout) {
        return Err(EscrowError::Authorization(
            "automatic escalation requires an unacknowledged dispute past the mediation timeout"
                .to_string(),
        ));
    }
    dispute.escalate(req.reason.trim().to_string(), actor.id.clone(), now)?;
    Ok(Effect::stay(current.state))
}

fn resolve(
    current: &Escrow,
    next: &mut Escrow,
    req: &ResolveRequest,
    actor: &Actor,
    cap: Capacity,
    now: Timestamp,
    policy: &LedgerPolicy,
) -> Result<Effect, EscrowError> {
    if let Some(notes) = &req.notes {
        check_text("notes", notes, policy.max_description_len, false)?;
    }
    require_capacity(cap, &[Capacity::Admin, Capacity::Mediator], "resolve_dispute")?;

    let kind = match req.outcome {
        escrow_arbitration::ResolutionOutcome::Release { .. } => MovementKind::Release,
        _ => MovementKind::Refund,
    };
    let key = movement_key(current, kind.as_str(), req.idempotency_key.as_deref())?;
    if req.idempotency_key.is_some() {
        if let Some(effect) = check_key_reuse(current, &key, kind, req.outcome.stated_amount())? {
            return Ok(effect);
        }
    }
    require_state(current, &[EscrowState::Disputed], "resolve_dispute")?;

    let held = current.held_amount;
    let dispute = next
        .active_dispute_mut()
        .ok_or_else(|| no_active_dispute(current))?;
    let payout = dispute.resolve(req.outcome, req.notes.clone(), actor.id.clone(), held, now)?;
    let kind = match payout.target {
        PayoutTarget::Supplier => MovementKind::Release,
        PayoutTarget::Buyer => MovementKind::Refund,
    };
    let movement = move_funds(next, kind, payout.amount, key, now)?;
    let to = payout_state(current.state, next, kind);
    next.state = to;
    Ok(Effect::Applied {
        steps: vec![StateStep {
            from: current.state,
            to,
        }],
        movements: vec![movement],
        settlement: None,
    })
}

fn record_submission(
    current: &Escrow,
    next: &mut Escrow,
    req: &RecordSubmissionRequest,
    cap: Capacity,
    now: Timestamp,
) -> Result<Effect, EscrowError> {
    require_capacity(cap, &[Capacity::System, Capacity::Admin], "record_submission")?;
    let movement = find_movement(next, &req.movement_id)?;
    match (&movement.gateway_transaction_id, movement.status) {
        (Some(tx), _) if *tx == req.transaction_id => return Ok(Effect::Replay),
        (Some(other), _) => {
            return Err(StateConflict::Blocked(format!(
                "movement {} was already submitted as transaction {other}",
                movement.id
            ))
            .into())
        }
        (None, MovementStatus::Pending) => {}
        (None, status) => {
            return Err(StateConflict::Blocked(format!(
                "movement {} is {status}",
                movement.id
            ))
            .into())
        }
    }
    movement.gateway_transaction_id = Some(req.transaction_id.clone());
    movement.submitted_at = Some(now);
    movement.attempts = req.attempts;
    let update = settlement_update(movement, None);
    Ok(bookkeeping(current.state, update))
}

fn confirm_settlement(
    current: &Escrow,
    next: &mut Escrow,
    req: &ConfirmSettlementRequest,
    cap: Capacity,
    now: Timestamp,
) -> Result<Effect, EscrowError> {
    require_capacity(cap, &[Capacity::System, Capacity::Admin], "confirm_settlement")?;
    let movement = find_by_transaction(next, &req.transaction_id)?;
    if movement.status == MovementStatus::Settled {
        return Ok(Effect::Replay);
    }
    movement.status = MovementStatus::Settled;
    movement.settled_at = Some(now);
    let update = settlement_update(movement, None);
    Ok(bookkeeping(current.state, update))
}

fn fail_settlement(
    current: &Escrow,
    next: &mut Escrow,
    req: &FailSettlementRequest,
    cap: Capacity,
    policy: &LedgerPolicy,
) -> Result<Effect, EscrowError> {
    check_text("reason", &req.reason, policy.max_reason_len, true)?;
    require_capacity(cap, &[Capacity::System, Capacity::Admin], "fail_settlement")?;
    let movement = find_by_transaction(next, &req.transaction_id)?;
    match movement.status {
        MovementStatus::Failed => return Ok(Effect::Replay),
        MovementStatus::Pending => {}
        status => {
            return Err(StateConflict::Blocked(format!(
                "movement {} is already {status}",
                movement.id
            ))
            .into())
        }
    }
    movement.status = MovementStatus::Failed;
    movement.failure_reason = Some(req.reason.trim().to_string());
    let update = settlement_update(movement, Some(req.reason.trim().to_string()));
    Ok(bookkeeping(current.state, update))
}

fn dead_letter(
    current: &Escrow,
    next: &mut Escrow,
    req: &DeadLetterRequest,
    cap: Capacity,
    policy: &LedgerPolicy,
) -> Result<Effect, EscrowError> {
    check_text("reason", &req.reason, policy.max_reason_len, true)?;
    require_capacity(cap, &[Capacity::System, Capacity::Admin], "dead_letter")?;
    let movement = find_movement(next, &req.movement_id)?;
    match movement.status {
        MovementStatus::DeadLettered => return Ok(Effect::Replay),
        MovementStatus::Pending => {}
        status => {
            return Err(StateConflict::Blocked(format!(
                "movement {} is already {status}",
                movement.id
            ))
            .into())
        }
    }
    movement.status = MovementStatus::DeadLettered;
    movement.attempts = req.attempts;
    movement.failure_reason = Some(req.reason.trim().to_string());
    let update = settlement_update(movement, Some(req.reason.trim().to_string()));
    Ok(bookkeeping(current.state, update))
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn require_capacity(cap: Capacity, allowed: &[Capacity], op: &str) -> Result<(), EscrowError> {
    if allowed.contains(&cap) {
        Ok(())
    } else {
        Err(EscrowError::Authorization(format!("{cap} may not {op}")))
    }
}

fn require_state(current: &Escrow, allowed: &[EscrowState], op: &str) -> Result<(), EscrowError> {
    if allowed.contains(&current.state) {
        Ok(())
    } else {
        Err(illegal(current.state, op))
    }
}

fn illegal(from: EscrowState, op: &str) -> EscrowError {
    StateConflict::IllegalTransition {
        from: from.as_str().to_string(),
        operation: op.to_string(),
    }
    .into()
}

fn no_active_dispute(escrow: &Escrow) -> EscrowError {
    StateConflict::Blocked(format!("escrow {} has no active dispute", escrow.id)).into()
}

fn check_text(field: &str, value: &str, max: usize, required: bool) -> Result<(), EscrowError> {
    if required && value.trim().is_empty() {
        return Err(EscrowError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(EscrowError::Validation(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(())
}

fn check_evidence(evidence: &[String]) -> Result<(), EscrowError> {
    for item in evidence {
        EvidenceRef::new(item.as_str())?;
    }
    Ok(())
}

fn account_or(account: Option<&str>, fallback: &str) -> Result<String, EscrowError> {
    match account.map(str::trim) {
        None => Ok(fallback.to_string()),
        Some("") => Err(EscrowError::Validation(
            "payout account must not be empty".to_string(),
        )),
        Some(a) if a.chars().count() > MAX_KEY_LEN => Err(EscrowError::Validation(format!(
            "payout account exceeds {MAX_KEY_LEN} characters"
        ))),
        Some(a) => Ok(a.to_string()),
    }
}

/// Caller keys live under `{escrow}:caller:`; without one the key is
/// derived under `{escrow}:auto:` from the version the transition was
/// computed against. The two namespaces never overlap.
fn movement_key(current: &Escrow, op: &str, caller: Option<&str>) -> Result<String, EscrowError> {
    match caller.map(str::trim) {
        Some("") => Err(EscrowError::Validation(
            "idempotency key must not be empty".to_string(),
        )),
        Some(k) if k.chars().count() > MAX_KEY_LEN => Err(EscrowError::Validation(format!(
            "idempotency key exceeds {MAX_KEY_LEN} characters"
        ))),
        Some(k) => Ok(format!("{}:caller:{k}", current.id)),
        None => Ok(format!("{}:auto:{}:{op}", current.id, current.version)),
    }
}

/// A repeated key replays only when the kind matches and any stated amount
/// equals the recorded one. Any other reuse is rejected.
fn check_key_reuse(
    current: &Escrow,
    key: &str,
    kind: MovementKind,
    amount: Option<Amount>,
) -> Result<Option<Effect>, EscrowError> {
    match current.movement_by_key(key) {
        None => Ok(None),
        Some(existing) if existing.kind == kind && amount.map_or(true, |a| a == existing.amount) => {
            Ok(Some(Effect::Replay))
        }
        Some(existing) => Err(EscrowError::Validation(format!(
            "idempotency key was already used for a {} of {}",
            existing.kind, existing.amount
        ))),
    }
}

fn move_funds(
    next: &mut Escrow,
    kind: MovementKind,
    amount: Amount,
    idempotency_key: String,
    now: Timestamp,
) -> Result<FundMovement, EscrowError> {
    if next.movement_by_key(&idempotency_key).is_some() {
        return Err(EscrowError::Validation(format!(
            "idempotency key {idempotency_key} is already bound to a movement"
        )));
    }
    let held = next
        .held_amount
        .checked_sub(amount)
        .ok_or_else(|| StateConflict::AmountConflict {
            requested: amount.to_string(),
            held: next.held_amount.to_string(),
        })?;
    let overflow = || EscrowError::Validation("amount overflow".to_string());
    let beneficiary = match kind {
        MovementKind::Release => {
            next.released_amount = next.released_amount.checked_add(amount).ok_or_else(overflow)?;
            next.supplier_account.clone()
        }
        MovementKind::Refund => {
            next.refunded_amount = next.refunded_amount.checked_add(amount).ok_or_else(overflow)?;
            next.buyer_account.clone()
        }
    };
    next.held_amount = held;
    let movement = FundMovement::new(kind, amount, beneficiary, idempotency_key, now);
    next.movements.push(movement.clone());
    Ok(movement)
}

/// State after a payout: unchanged while funds remain held.
fn payout_state(from: EscrowState, next: &Escrow, kind: MovementKind) -> EscrowState {
    if next.held_amount.is_positive() {
        return from;
    }
    match kind {
        MovementKind::Release => EscrowState::Released,
        MovementKind::Refund
            if from == EscrowState::Disputed && next.refunded_amount != next.original_amount =>
        {
            EscrowState::PartialRefunded
        }
        MovementKind::Refund => EscrowState::Refunded,
    }
}

fn find_movement<'a>(escrow: &'a mut Escrow, id: &MovementId) -> Result<&'a mut FundMovement, EscrowError> {
    let escrow_id = escrow.id;
    escrow
        .movements
        .iter_mut()
        .find(|m| m.id == *id)
        .ok_or_else(|| EscrowError::NotFound(format!("movement {id} on escrow {escrow_id}")))
}

fn find_by_transaction<'a>(
    escrow: &'a mut Escrow,
    tx: &TransactionId,
) -> Result<&'a mut FundMovement, EscrowError> {
    let escrow_id = escrow.id;
    escrow
        .movements
        .iter_mut()
        .find(|m| m.gateway_transaction_id.as_ref() == Some(tx))
        .ok_or_else(|| EscrowError::NotFound(format!("transaction {tx} on escrow {escrow_id}")))
}

fn settlement_update(movement: &FundMovement, reason: Option<String>) -> SettlementUpdate {
    SettlementUpdate {
        movement_id: movement.id,
        kind: movement.kind,
        amount: movement.amount,
        status: movement.status,
        transaction_id: movement.gateway_transaction_id.clone(),
        reason,
    }
}

fn bookkeeping(state: EscrowState, update: SettlementUpdate) -> Effect {
    Effect::Applied {
        steps: vec![StateStep {
            from: state,
            to: state,
        }],
        movements: Vec::new(),
        settlement: Some(update),
    }
}
