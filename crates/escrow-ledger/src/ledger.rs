//! # Escrow Ledger
//!
//! The single writer path for every escrow. Whatever triggers a change (a
//! client request, a dispute resolution, the deadline sweep, or a gateway
//! callback) it runs the same sequence:
//!
//! 1. load the snapshot and the version it carries,
//! 2. run the pure validator (`escrow_state::apply`),
//! 3. compare-and-swap the new snapshot together with its audit events,
//! 4. publish settlement instructions and notifications after the commit.
//!
//! Rejections of an existing escrow (validation, authorization, state
//! conflict, lost version race) append a `REJECTED` audit event and return
//! the error unchanged. Nothing is retried here: on a version mismatch the
//! caller refetches and decides.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use escrow_arbitration::DisputeFiling;
use escrow_core::{
    canonical_sha256, Actor, Clock, EscrowError, EscrowId, MovementId, Role,
    SystemClock, TransactionId,
};
use escrow_state::{
    apply, capacity, validate_create, CancelRequest, ConfirmSettlementRequest,
    CreateEscrowRequest, DeadLetterRequest, EscalateRequest, Escrow, ExtendRequest,
    FailSettlementRequest, FundRequest, LedgerPolicy, MovementStatus, Operation, PayoutRequest,
    RecordSubmissionRequest, ResolveRequest, Transition,
};

use crate::audit::{AuditDraft, AuditEvent, AuditOutcome, REPLAY_DETAIL};
use crate::notify::{AllowAllVerifier, IdentityVerifier, LedgerNotification, Notifier, TracingNotifier};
use crate::settlement::SettlementInstruction;
use crate::store::EscrowStore;

/// Upper bound on one page of `list`.
pub const MAX_PAGE_SIZE: usize = 200;

/// The escrow ledger service.
///
/// Cheap to share behind an `Arc`; holds no mutable state of its own.
pub struct EscrowLedger {
    store: Arc<dyn EscrowStore>,
    clock: Arc<dyn Clock>,
    policy: LedgerPolicy,
    notifier: Arc<dyn Notifier>,
    identity: Arc<dyn IdentityVerifier>,
    settlements: Option<mpsc::UnboundedSender<SettlementInstruction>>,
}

impl std::fmt::Debug for EscrowLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowLedger")
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .field("publishes_settlements", &self.settlements.is_some())
            .finish()
    }
}

impl EscrowLedger {
    pub fn new(store: Arc<dyn EscrowStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            policy: LedgerPolicy::default(),
            notifier: Arc::new(TracingNotifier),
            identity: Arc::new(AllowAllVerifier),
            settlements: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_identity_verifier(mut self, identity: Arc<dyn IdentityVerifier>) -> Self {
        self.identity = identity;
        self
    }

    /// Publish a `SettlementInstruction` for every committed movement.
    pub fn with_settlement_channel(
        mut self,
        sender: mpsc::UnboundedSender<SettlementInstruction>,
    ) -> Self {
        self.settlements = Some(sender);
        self
    }

    pub fn store(&self) -> &Arc<dyn EscrowStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    // ── Create ───────────────────────────────────────────────────────

    /// Open a new escrow in `CREATED`.
    ///
    /// Both parties must pass the identity check. Rejected creations are
    /// not audited: there is no escrow to key the event on.
    pub async fn create(&self, req: CreateEscrowRequest, actor: &Actor) -> Result<Escrow, EscrowError> {
        let payload_hash = payload_hash(&req)?;
        for party in [&req.buyer_id, &req.supplier_id] {
            if !self.identity.is_verified(party).await? {
                return Err(EscrowError::Validation(format!(
                    "party {party} has not completed identity verification"
                )));
            }
        }

        let now = self.clock.now();
        let escrow = match validate_create(&req, actor, now, &self.policy) {
            Ok(escrow) => escrow,
            Err(err) => {
                record_outcome("create", "rejected");
                tracing::warn!(actor = %actor.id, kind = err.kind(), error = %err, "escrow creation rejected");
                return Err(err);
            }
        };

        let draft = AuditDraft {
            escrow_id: escrow.id,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            operation: "create".to_string(),
            from_state: None,
            to_state: escrow.state,
            request_payload_hash: payload_hash,
            outcome: AuditOutcome::Success,
            detail: None,
            timestamp: now,
        };
        self.store.insert(&escrow, draft).await?;

        record_outcome("create", "success");
        tracing::info!(
            escrow_id = %escrow.id,
            operation = "create",
            to = %escrow.state,
            version = escrow.version,
            amount = %escrow.original_amount,
            currency = %escrow.currency,
            "escrow created"
        );
        Ok(escrow)
    }

    // ── Read ─────────────────────────────────────────────────────────

    /// The current snapshot, visible to the parties and to staff.
    pub async fn get(&self, id: &EscrowId, actor: &Actor) -> Result<Escrow, EscrowError> {
        let escrow = self.load(id).await?;
        require_reader(&escrow, actor)?;
        Ok(escrow)
    }

    /// The escrow's audit chain, visible to the parties and to staff.
    pub async fn audit_trail(&self, id: &EscrowId, actor: &Actor) -> Result<Vec<AuditEvent>, EscrowError> {
        let escrow = self.load(id).await?;
        require_reader(&escrow, actor)?;
        self.store.audit_trail(id).await
    }

    /// A page of escrows, staff only.
    pub async fn list(&self, actor: &Actor, limit: usize, offset: usize) -> Result<Vec<Escrow>, EscrowError> {
        if !(actor.role.is_staff() || actor.role == Role::System) {
            return Err(EscrowError::Authorization(format!(
                "{} may not list escrows",
                actor.id
            )));
        }
        self.store.list(limit.clamp(1, MAX_PAGE_SIZE), offset).await
    }

    /// Instructions for every committed movement that never reached the
    /// gateway, e.g. because the process stopped between commit and
    /// dispatch.
    pub async fn pending_instructions(&self) -> Result<Vec<SettlementInstruction>, EscrowError> {
        let mut out = Vec::new();
        for id in self.store.find_undispatched().await? {
            if let Some(escrow) = self.store.get(&id).await? {
                out.extend(SettlementInstruction::undispatched(&escrow));
            }
        }
        Ok(out)
    }

    // ── Execute ──────────────────────────────────────────────────────

    /// Apply one operation to an existing escrow.
    ///
    /// Returns the committed snapshot, or the unchanged snapshot when the
    /// request was an idempotent replay.
    pub async fn execute(&self, id: &EscrowId, op: Operation, actor: &Actor) -> Result<Escrow, EscrowError> {
        let operation = op.name();
        let current = self.load(id).await?;
        let payload_hash = payload_hash(&op)?;
        let now = self.clock.now();

        let transition = match apply(&current, &op, actor, now, &self.policy) {
            Ok(t) => t,
            Err(err) => {
                self.reject(&current, operation, actor, &payload_hash, &err).await;
                return Err(err);
            }
        };

        if transition.replay {
            self.append(AuditDraft {
                escrow_id: current.id,
                actor_id: actor.id.clone(),
                actor_role: actor.role,
                operation: operation.to_string(),
                from_state: Some(current.state),
                to_state: current.state,
                request_payload_hash: payload_hash,
                outcome: AuditOutcome::Success,
                detail: Some(REPLAY_DETAIL.to_string()),
                timestamp: now,
            })
            .await;
            record_outcome(operation, "replay");
            tracing::info!(escrow_id = %id, operation, state = %current.state, "idempotent replay");
            return Ok(current);
        }

        let drafts = transition
            .steps
            .iter()
            .map(|step| AuditDraft {
                escrow_id: current.id,
                actor_id: actor.id.clone(),
                actor_role: actor.role,
                operation: operation.to_string(),
                from_state: Some(step.from),
                to_state: step.to,
                request_payload_hash: payload_hash.clone(),
                outcome: AuditOutcome::Success,
                detail: None,
                timestamp: now,
            })
            .collect();

        if let Err(err) = self
            .store
            .compare_and_swap(current.version, &transition.next, drafts)
            .await
        {
            if err.is_audited_rejection() {
                self.reject(&current, operation, actor, &payload_hash, &err).await;
            }
            return Err(err);
        }

        record_outcome(operation, "success");
        tracing::info!(
            escrow_id = %id,
            operation,
            from = %transition.from(),
            to = %transition.to(),
            version = transition.next.version,
            held = %transition.next.held_amount,
            "escrow transition committed"
        );

        self.after_commit(&transition);
        Ok(transition.next)
    }

    // ── Operations ───────────────────────────────────────────────────

    pub async fn fund(&self, id: &EscrowId, transaction_id: TransactionId, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::Fund(FundRequest { transaction_id }), actor)
            .await
    }

    pub async fn release(&self, id: &EscrowId, req: PayoutRequest, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::Release(req), actor).await
    }

    pub async fn refund(&self, id: &EscrowId, req: PayoutRequest, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::Refund(req), actor).await
    }

    pub async fn dispute(&self, id: &EscrowId, filing: DisputeFiling, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::Dispute(filing), actor).await
    }

    pub async fn extend(&self, id: &EscrowId, req: ExtendRequest, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::Extend(req), actor).await
    }

    pub async fn cancel(&self, id: &EscrowId, req: CancelRequest, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::Cancel(req), actor).await
    }

    pub async fn expire(&self, id: &EscrowId, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::Expire, actor).await
    }

    pub async fn acknowledge_dispute(&self, id: &EscrowId, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::AcknowledgeDispute, actor).await
    }

    pub async fn escalate_dispute(&self, id: &EscrowId, req: EscalateRequest, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::EscalateDispute(req), actor).await
    }

    pub async fn resolve_dispute(&self, id: &EscrowId, req: ResolveRequest, actor: &Actor) -> Result<Escrow, EscrowError> {
        self.execute(id, Operation::ResolveDispute(req), actor).await
    }

    // ── Settlement bookkeeping ───────────────────────────────────────

    /// Record that a movement was accepted by the gateway as `transaction_id`.
    pub async fn record_submission(
        &self,
        id: &EscrowId,
        movement_id: MovementId,
        transaction_id: TransactionId,
        attempts: u32,
        actor: &Actor,
    ) -> Result<Escrow, EscrowError> {
        let op = Operation::RecordSubmission(RecordSubmissionRequest {
            movement_id,
            transaction_id,
            attempts,
        });
        self.execute(id, op, actor).await
    }

    /// Settle the movement submitted as `transaction_id`.
    pub async fn confirm_settlement(&self, transaction_id: TransactionId, actor: &Actor) -> Result<Escrow, EscrowError> {
        let id = self.owner_of(&transaction_id).await?;
        let op = Operation::ConfirmSettlement(ConfirmSettlementRequest { transaction_id });
        self.execute(&id, op, actor).await
    }

    /// Mark the movement submitted as `transaction_id` as failed at the rail.
    pub async fn fail_settlement(
        &self,
        transaction_id: TransactionId,
        reason: String,
        actor: &Actor,
    ) -> Result<Escrow, EscrowError> {
        let id = self.owner_of(&transaction_id).await?;
        let op = Operation::FailSettlement(FailSettlementRequest {
            transaction_id,
            reason,
        });
        self.execute(&id, op, actor).await
    }

    /// Park a movement that could not be submitted for manual reconciliation.
    pub async fn dead_letter(
        &self,
        id: &EscrowId,
        movement_id: MovementId,
        reason: String,
        attempts: u32,
        actor: &Actor,
    ) -> Result<Escrow, EscrowError> {
        let op = Operation::DeadLetter(DeadLetterRequest {
            movement_id,
            reason,
            attempts,
        });
        self.execute(id, op, actor).await
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn load(&self, id: &EscrowId) -> Result<Escrow, EscrowError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("escrow {id}")))
    }

    async fn owner_of(&self, tx: &TransactionId) -> Result<EscrowId, EscrowError> {
        self.store
            .find_by_settlement_transaction(tx)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("settlement transaction {tx}")))
    }

    async fn reject(
        &self,
        current: &Escrow,
        operation: &'static str,
        actor: &Actor,
        payload_hash: &str,
        err: &EscrowError,
    ) {
        record_outcome(operation, "rejected");
        tracing::warn!(
            escrow_id = %current.id,
            operation,
            state = %current.state,
            actor = %actor.id,
            kind = err.kind(),
            error = %err,
            "escrow operation rejected"
        );
        if !err.is_audited_rejection() {
            return;
        }
        self.append(AuditDraft {
            escrow_id: current.id,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            operation: operation.to_string(),
            from_state: Some(current.state),
            to_state: current.state,
            request_payload_hash: payload_hash.to_string(),
            outcome: AuditOutcome::Rejected,
            detail: Some(err.to_string()),
            timestamp: self.clock.now(),
        })
        .await;
    }

    /// Append an event outside a commit. A failure here is logged and never
    /// replaces the outcome the caller is about to receive.
    async fn append(&self, draft: AuditDraft) {
        let escrow_id = draft.escrow_id;
        if let Err(err) = self.store.append_audit(draft).await {
            tracing::error!(escrow_id = %escrow_id, error = %err, "failed to append audit event");
        }
    }

    fn after_commit(&self, transition: &Transition) {
        let escrow = &transition.next;

        if let Some(sender) = &self.settlements {
            for movement in &transition.new_movements {
                let instruction = SettlementInstruction::for_movement(escrow, movement);
                if sender.send(instruction).is_err() {
                    tracing::warn!(
                        escrow_id = %escrow.id,
                        movement_id = %movement.id,
                        "settlement dispatcher is gone; movement left for reconciliation"
                    );
                }
            }
        }

        if transition.reached_terminal() {
            self.notifier.notify(&LedgerNotification::Closed {
                escrow_id: escrow.id,
                state: escrow.state,
                buyer_id: escrow.buyer_id.clone(),
                supplier_id: escrow.supplier_id.clone(),
                at: escrow.updated_at,
            });
        }

        if let Some(update) = &transition.settlement {
            let notification = match update.status {
                MovementStatus::Settled => Some(LedgerNotification::SettlementConfirmed {
                    escrow_id: escrow.id,
                    movement_id: update.movement_id,
                    kind: update.kind,
                    amount: update.amount,
                    transaction_id: update.transaction_id.clone(),
                }),
                MovementStatus::Failed | MovementStatus::DeadLettered => {
                    Some(LedgerNotification::SettlementFailed {
                        escrow_id: escrow.id,
                        movement_id: update.movement_id,
                        kind: update.kind,
                        amount: update.amount,
                        reason: update.reason.clone(),
                    })
                }
                MovementStatus::Pending => None,
            };
            if let Some(notification) = notification {
                self.notifier.notify(&notification);
            }
        }
    }
}

fn require_reader(escrow: &Escrow, actor: &Actor) -> Result<(), EscrowError> {
    if capacity(escrow, actor).can_read() {
        Ok(())
    } else {
        Err(EscrowError::Authorization(format!(
            "{} is not a participant of escrow {}",
            actor.id, escrow.id
        )))
    }
}

fn payload_hash(payload: &impl Serialize) -> Result<String, EscrowError> {
    Ok(canonical_sha256(payload)?)
}

fn record_outcome(operation: &'static str, outcome: &'static str) {
    metrics::counter!("escrow_transitions_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}
