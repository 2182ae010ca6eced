//! SettlementDispatcher against the in-process ledger and MockGateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use escrow_core::{
    Actor, Amount, Clock, Currency, EscrowId, ManualClock, PartyId, RfqId, Timestamp,
    TransactionId,
};
use escrow_gateway::{
    DispatchError, DispatchOutcome, GatewayError, MockGateway, PaymentGateway, PaymentOrder,
    RetryPolicy, SettlementDispatcher,
};
use escrow_ledger::{verify_chain, EscrowLedger, EscrowStore, MemoryStore, SettlementInstruction};
use escrow_state::{
    CreateEscrowRequest, Escrow, EscrowState, MovementKind, MovementStatus, PayoutRequest,
    SettlementStatus,
};

fn buyer() -> Actor {
    Actor::participant(PartyId::new("buyer-1").unwrap())
}

fn supplier() -> Actor {
    Actor::participant(PartyId::new("supplier-1").unwrap())
}

struct Harness {
    store: Arc<MemoryStore>,
    ledger: Arc<EscrowLedger>,
    gateway: Arc<MockGateway>,
    dispatcher: Arc<SettlementDispatcher>,
}

fn harness_with(retry: RetryPolicy) -> Harness {
    let clock = ManualClock::new(Timestamp::parse("2026-01-15T12:00:00Z").unwrap());
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(EscrowLedger::new(store.clone()).with_clock(Arc::new(clock)));
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = Arc::new(SettlementDispatcher::new(ledger.clone(), gateway.clone(), retry));
    Harness {
        store,
        ledger,
        gateway,
        dispatcher,
    }
}

fn harness() -> Harness {
    harness_with(RetryPolicy::immediate(3))
}

async fn funded(ledger: &EscrowLedger) -> Escrow {
    let req = CreateEscrowRequest {
        rfq_id: RfqId::new("rfq-1").unwrap(),
        buyer_id: buyer().id,
        supplier_id: supplier().id,
        amount: Amount::from_units(10_000),
        currency: Currency::new("INR").unwrap(),
        terms: "two milestones".to_string(),
        deadline: ledger.clock().now().plus(chrono::Duration::days(30)),
        metadata: None,
        buyer_account: Some("acct-buyer-1".to_string()),
        supplier_account: Some("acct-supplier-1".to_string()),
    };
    let e = ledger.create(req, &buyer()).await.unwrap();
    ledger
        .fund(&e.id, TransactionId::new(format!("gw-fund-{}", e.id)).unwrap(), &Actor::system())
        .await
        .unwrap()
}

async fn released(ledger: &EscrowLedger, amount: &str) -> (Escrow, SettlementInstruction) {
    let e = funded(ledger).await;
    let e = ledger
        .release(
            &e.id,
            PayoutRequest {
                amount: Some(Amount::parse(amount).unwrap()),
                reason: "milestone accepted".to_string(),
                ..Default::default()
            },
            &buyer(),
        )
        .await
        .unwrap();
    let movement = e.movements.last().unwrap();
    let instruction = SettlementInstruction::for_movement(&e, movement);
    (e, instruction)
}

async fn stored(h: &Harness, id: &EscrowId) -> Escrow {
    h.store.get(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn submission_records_gateway_transaction() {
    let h = harness();
    let (e, instruction) = released(&h.ledger, "4000.00").await;
    assert_eq!(instruction.beneficiary_account, "acct-supplier-1");

    let outcome = h.dispatcher.dispatch(instruction.clone()).await.unwrap();
    let DispatchOutcome::Submitted { transaction_id, attempts } = outcome else {
        panic!("expected submission, got {outcome:?}");
    };
    assert_eq!(attempts, 1);
    assert_eq!(
        h.gateway.transaction_for(&instruction.idempotency_key),
        Some(transaction_id.clone())
    );

    let after = stored(&h, &e.id).await;
    let movement = &after.movements[0];
    assert_eq!(movement.gateway_transaction_id, Some(transaction_id));
    assert_eq!(movement.status, MovementStatus::Pending);
    assert_eq!(movement.attempts, 1);
    assert_eq!(after.state, EscrowState::Active);
    assert_eq!(after.held_amount, Amount::from_units(6_000));
}

#[tokio::test]
async fn transient_failures_retry_with_the_same_key() {
    let h = harness_with(RetryPolicy::immediate(4));
    let (_, instruction) = released(&h.ledger, "4000.00").await;

    h.gateway.fail_next(GatewayError::Timeout { elapsed_ms: 10_000 });
    h.gateway.fail_next(GatewayError::Unavailable {
        reason: "HTTP 503".to_string(),
    });

    let outcome = h.dispatcher.dispatch(instruction).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Submitted { attempts: 3, .. }));
    assert_eq!(h.gateway.calls(), 3);
    assert_eq!(h.gateway.accepted(), 1);
    assert!(h.dispatcher.dead_letters().is_empty());
}

#[tokio::test]
async fn exhausted_retries_dead_letter_the_movement() {
    let h = harness_with(RetryPolicy::immediate(2));
    let (e, instruction) = released(&h.ledger, "4000.00").await;
    for _ in 0..2 {
        h.gateway.fail_next(GatewayError::Unavailable {
            reason: "HTTP 502".to_string(),
        });
    }

    let outcome = h.dispatcher.dispatch(instruction.clone()).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::DeadLettered { attempts: 2, .. }));

    let letters = h.dispatcher.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].movement_id, instruction.movement_id);
    assert_eq!(letters[0].idempotency_key, instruction.idempotency_key);
    assert_eq!(letters[0].kind, MovementKind::Release);

    let after = stored(&h, &e.id).await;
    assert_eq!(after.movements[0].status, MovementStatus::DeadLettered);
    // Committed amounts are untouched by a gateway failure.
    assert_eq!(after.released_amount, Amount::from_units(4_000));
    assert_eq!(after.held_amount, Amount::from_units(6_000));
    assert!(verify_chain(&h.store.audit_trail(&e.id).await.unwrap()).is_ok());
}

#[tokio::test]
async fn rejection_is_not_retried() {
    let h = harness_with(RetryPolicy::immediate(5));
    let (_, instruction) = released(&h.ledger, "1000.00").await;
    h.gateway.fail_next(GatewayError::Rejected {
        reason: "beneficiary account closed".to_string(),
    });

    let outcome = h.dispatcher.dispatch(instruction).await.unwrap();
    let DispatchOutcome::DeadLettered { reason, attempts } = outcome else {
        panic!("expected dead letter, got {outcome:?}");
    };
    assert_eq!(attempts, 1);
    assert!(reason.contains("beneficiary account closed"));
    assert_eq!(h.gateway.calls(), 1);
}

#[tokio::test]
async fn confirmation_and_failure_callbacks_update_settlement() {
    let h = harness();
    let (e, instruction) = released(&h.ledger, "10000.00").await;
    assert_eq!(e.state, EscrowState::Released);

    let DispatchOutcome::Submitted { transaction_id, .. } =
        h.dispatcher.dispatch(instruction).await.unwrap()
    else {
        panic!("expected submission");
    };

    let settled = h
        .dispatcher
        .on_settlement_confirmed(transaction_id.clone())
        .await
        .unwrap();
    assert_eq!(settled.movements[0].status, MovementStatus::Settled);
    assert_eq!(SettlementStatus::of(&settled.movements), SettlementStatus::Settled);

    let unknown = h
        .dispatcher
        .on_settlement_failed(TransactionId::new("never-issued").unwrap(), "n/a".to_string())
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), "NOT_FOUND");
}

#[tokio::test]
async fn rail_failure_marks_movement_failed() {
    let h = harness();
    let (e, instruction) = released(&h.ledger, "2500.00").await;
    let DispatchOutcome::Submitted { transaction_id, .. } =
        h.dispatcher.dispatch(instruction).await.unwrap()
    else {
        panic!("expected submission");
    };

    let after = h
        .dispatcher
        .on_settlement_failed(transaction_id, "insufficient float at rail".to_string())
        .await
        .unwrap();
    assert_eq!(after.id, e.id);
    assert_eq!(after.movements[0].status, MovementStatus::Failed);
    assert_eq!(
        after.movements[0].failure_reason.as_deref(),
        Some("insufficient float at rail")
    );
}

#[tokio::test]
async fn reconcile_dispatches_movements_that_never_reached_the_gateway() {
    let h = harness();
    released(&h.ledger, "1000.00").await;
    released(&h.ledger, "2000.00").await;

    assert_eq!(h.dispatcher.reconcile().await.unwrap(), 2);
    assert_eq!(h.gateway.accepted(), 2);

    // Everything now carries a transaction id; nothing is left to send.
    assert_eq!(h.dispatcher.reconcile().await.unwrap(), 0);
    assert_eq!(h.gateway.calls(), 2);
}

/// Holds every call until released, so a second dispatch overlaps the first.
#[derive(Default)]
struct GatedGateway {
    entered: Notify,
    open: Notify,
}

#[async_trait]
impl PaymentGateway for GatedGateway {
    async fn initiate_release(&self, _order: &PaymentOrder) -> Result<TransactionId, GatewayError> {
        self.entered.notify_one();
        self.open.notified().await;
        Ok(TransactionId::new("gated-1").unwrap())
    }

    async fn initiate_refund(&self, order: &PaymentOrder) -> Result<TransactionId, GatewayError> {
        self.initiate_release(order).await
    }

    fn name(&self) -> &str {
        "GatedGateway"
    }
}

#[tokio::test]
async fn duplicate_dispatch_while_in_flight_fails_fast() {
    let h = harness();
    let gate = Arc::new(GatedGateway::default());
    let dispatcher = Arc::new(SettlementDispatcher::new(
        h.ledger.clone(),
        gate.clone(),
        RetryPolicy::immediate(1),
    ));
    let (_, instruction) = released(&h.ledger, "4000.00").await;

    let first = {
        let dispatcher = dispatcher.clone();
        let instruction = instruction.clone();
        tokio::spawn(async move { dispatcher.dispatch(instruction).await })
    };
    gate.entered.notified().await;

    let err = dispatcher.dispatch(instruction.clone()).await.unwrap_err();
    assert!(matches!(err, DispatchError::AlreadyInFlight(ref key) if *key == instruction.idempotency_key));

    gate.open.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, DispatchOutcome::Submitted { attempts: 1, .. }));

    // The guard is released once the first call completes.
    gate.open.notify_one();
    let again = dispatcher.dispatch(instruction).await.unwrap();
    assert!(matches!(again, DispatchOutcome::Submitted { .. }));
}

#[tokio::test]
async fn run_loop_submits_instructions_from_the_ledger_channel() {
    let (tx, rx) = mpsc::unbounded_channel();
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(EscrowLedger::new(store.clone()).with_settlement_channel(tx));
    let gateway = Arc::new(MockGateway::new());
    let dispatcher = Arc::new(SettlementDispatcher::new(
        ledger.clone(),
        gateway.clone(),
        RetryPolicy::immediate(3),
    ));
    tokio::spawn(dispatcher.run(rx));

    let (e, _) = released(&ledger, "3000.00").await;

    let mut submitted = None;
    for _ in 0..100 {
        let current = store.get(&e.id).await.unwrap().unwrap();
        if let Some(tx) = current.movements[0].gateway_transaction_id.clone() {
            submitted = Some(tx);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let tx = submitted.expect("movement was never submitted");
    assert!(tx.as_str().starts_with("mock-rel-"));
    assert_eq!(gateway.accepted(), 1);
}

#[tokio::test]
async fn caller_key_cannot_fold_a_later_payout_into_an_earlier_order() {
    let h = harness();
    let e = funded(&h.ledger).await;
    let release = |amount: &str, key: Option<&str>| PayoutRequest {
        amount: Some(Amount::parse(amount).unwrap()),
        reason: "milestone accepted".to_string(),
        evidence: Vec::new(),
        idempotency_key: key.map(str::to_string),
    };
    let e = h
        .ledger
        .release(&e.id, release("1000.00", Some("3:release")), &buyer())
        .await
        .unwrap();
    let e = h.ledger.release(&e.id, release("2000.00", None), &buyer()).await.unwrap();

    let mut transactions = Vec::new();
    for movement in &e.movements {
        let instruction = SettlementInstruction::for_movement(&e, movement);
        match h.dispatcher.dispatch(instruction).await.unwrap() {
            DispatchOutcome::Submitted { transaction_id, .. } => transactions.push(transaction_id),
            other => panic!("expected submission, got {other:?}"),
        }
    }
    assert_eq!(transactions.len(), 2);
    assert_ne!(transactions[0], transactions[1]);
    assert_eq!(h.gateway.accepted(), 2);
    assert_eq!(stored(&h, &e.id).await.released_amount, Amount::from_units(3000));
}
