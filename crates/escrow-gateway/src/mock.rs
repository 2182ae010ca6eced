//! In-process gateway for tests and for `escrowd` without a configured rail.
//!
//! Deduplicates by idempotency key the way a real rail does, and can be
//! scripted to fail the next N calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use escrow_core::TransactionId;
use escrow_state::MovementKind;

use crate::adapter::{PaymentGateway, PaymentOrder};
use crate::error::GatewayError;

#[derive(Debug, Default)]
pub struct MockGateway {
    accepted: DashMap<String, TransactionId>,
    script: Mutex<VecDeque<GatewayError>>,
    calls: AtomicU64,
    sequence: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, err: GatewayError) {
        self.script.lock().push_back(err);
    }

    /// Every call received, including failed and deduplicated ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Distinct orders accepted.
    pub fn accepted(&self) -> usize {
        self.accepted.len()
    }

    pub fn transaction_for(&self, idempotency_key: &str) -> Option<TransactionId> {
        self.accepted.get(idempotency_key).map(|tx| tx.clone())
    }

    fn accept(&self, kind: MovementKind, order: &PaymentOrder) -> Result<TransactionId, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.script.lock().pop_front() {
            return Err(err);
        }
        if !order.amount.is_positive() {
            return Err(GatewayError::Rejected {
                reason: "amount must be positive".to_string(),
            });
        }
        if order.idempotency_key.is_empty() {
            return Err(GatewayError::Rejected {
                reason: "idempotency key must not be empty".to_string(),
            });
        }

        let entry = self
            .accepted
            .entry(order.idempotency_key.clone())
            .or_try_insert_with(|| {
                let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                let prefix = match kind {
                    MovementKind::Release => "mock-rel",
                    MovementKind::Refund => "mock-ref",
                };
                TransactionId::new(format!("{prefix}-{n}")).map_err(|e| GatewayError::InvalidResponse {
                    reason: e.to_string(),
                })
            })?;
        Ok(entry.value().clone())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initiate_release(&self, order: &PaymentOrder) -> Result<TransactionId, GatewayError> {
        self.accept(MovementKind::Release, order)
    }

    async fn initiate_refund(&self, order: &PaymentOrder) -> Result<TransactionId, GatewayError> {
        self.accept(MovementKind::Refund, order)
    }

    fn name(&self) -> &str {
        "MockGateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_core::{Amount, Currency, EscrowId};

    fn order(key: &str) -> PaymentOrder {
        PaymentOrder {
            escrow_id: EscrowId::new(),
            amount: Amount::from_units(100),
            currency: Currency::new("INR").unwrap(),
            beneficiary_account: "acct-supplier".to_string(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn same_key_returns_same_transaction() {
        let gw = MockGateway::new();
        let a = gw.initiate_release(&order("k1")).await.unwrap();
        let b = gw.initiate_release(&order("k1")).await.unwrap();
        let c = gw.initiate_refund(&order("k2")).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(c.as_str().starts_with("mock-ref-"));
        assert_eq!(gw.calls(), 3);
        assert_eq!(gw.accepted(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let gw = MockGateway::new();
        gw.fail_next(GatewayError::Timeout { elapsed_ms: 1 });
        gw.fail_next(GatewayError::Rejected { reason: "no".into() });
        assert!(matches!(
            gw.initiate_release(&order("k")).await,
            Err(GatewayError::Timeout { .. })
        ));
        assert!(matches!(
            gw.initiate_release(&order("k")).await,
            Err(GatewayError::Rejected { .. })
        ));
        assert!(gw.initiate_release(&order("k")).await.is_ok());
        assert_eq!(gw.transaction_for("k").unwrap().as_str(), "mock-rel-1");
    }
}
