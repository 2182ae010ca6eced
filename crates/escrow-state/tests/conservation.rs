//! Property tests: amount conservation and version discipline hold over
//! arbitrary release/refund sequences, including rejected steps.

use chrono::Duration;
use escrow_core::{Actor, Amount, Currency, PartyId, RfqId, Timestamp, TransactionId};
use escrow_state::{
    apply, validate_create, CreateEscrowRequest, Escrow, FundRequest, LedgerPolicy, Operation,
    PayoutRequest,
};
use proptest::prelude::*;

fn t0() -> Timestamp {
    Timestamp::parse("2026-01-15T12:00:00Z").unwrap()
}

fn funded(total: u64) -> Escrow {
    let buyer = Actor::participant(PartyId::new("buyer-1").unwrap());
    let req = CreateEscrowRequest {
        rfq_id: RfqId::new("rfq-1").unwrap(),
        buyer_id: buyer.id.clone(),
        supplier_id: PartyId::new("supplier-1").unwrap(),
        amount: Amount::from_units(total),
        currency: Currency::new("USD").unwrap(),
        terms: String::new(),
        deadline: t0().plus(Duration::days(30)),
        metadata: None,
        buyer_account: None,
        supplier_account: None,
    };
    let policy = LedgerPolicy::default();
    let created = validate_create(&req, &buyer, t0(), &policy).unwrap();
    let fund = Operation::Fund(FundRequest {
        transaction_id: TransactionId::new("gw-1").unwrap(),
    });
    apply(&created, &fund, &Actor::system(), t0(), &policy)
        .unwrap()
        .next
}

proptest! {
    #[test]
    fn amounts_are_conserved(total in 1u64..100_000, steps in prop::collection::vec((any::<bool>(), 1u64..50_000), 0..20)) {
        let policy = LedgerPolicy::default();
        let admin = Actor::admin(PartyId::new("admin-1").unwrap());
        let mut escrow = funded(total);
        for (is_release, amount) in steps {
            let req = PayoutRequest {
                amount: Some(Amount::from_units(amount)),
                reason: "step".to_string(),
                ..Default::default()
            };
            let op = if is_release { Operation::Release(req) } else { Operation::Refund(req) };
            match apply(&escrow, &op, &admin, t0(), &policy) {
                Ok(t) => {
                    prop_assert_eq!(t.next.version, escrow.version + 1);
                    escrow = t.next;
                }
                Err(_) => {
                    // rejected steps leave the snapshot untouched
                }
            }
            let sum = escrow.held_amount
                .checked_add(escrow.released_amount)
                .and_then(|s| s.checked_add(escrow.refunded_amount));
            prop_assert_eq!(sum, Some(escrow.original_amount));
            prop_assert!(escrow.check_invariants().is_ok());
        }
        if escrow.held_amount.is_zero() {
            prop_assert!(escrow.state.is_terminal());
        } else {
            prop_assert!(!escrow.state.is_terminal());
        }
    }
}
