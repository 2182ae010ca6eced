//! # Deadline Scheduler
//!
//! A periodic sweep that drives time-based transitions through the same
//! ledger path as any other actor, acting as the `system` actor:
//!
//! - `ACTIVE` escrows past their deadline are expired (held funds refunded
//!   to the buyer).
//! - `OPEN` disputes nobody acknowledged within the mediation timeout are
//!   escalated. An escalated dispute keeps its escrow `DISPUTED`, and so out
//!   of reach of expiry, until a human resolves it.
//!
//! Each escrow is processed independently. A state conflict means another
//! writer (or a concurrent tick) moved the escrow first; it is counted as
//! skipped and logged at debug level. Any other failure is logged and the
//! sweep moves on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;

use escrow_core::{Actor, EscrowError, EscrowId};
use escrow_state::EscalateRequest;

use crate::ledger::EscrowLedger;

/// Reason recorded on disputes escalated by the sweep.
pub const MEDIATION_TIMEOUT_REASON: &str = "mediation timeout elapsed without acknowledgement";

/// What one sweep tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: Vec<EscrowId>,
    pub escalated: Vec<EscrowId>,
    /// Candidates another writer moved first.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
enum Sweep {
    Expire,
    Escalate,
}

impl Sweep {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Expire => "expire",
            Self::Escalate => "escalate_dispute",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeadlineScheduler {
    ledger: Arc<EscrowLedger>,
    actor: Actor,
}

impl DeadlineScheduler {
    pub fn new(ledger: Arc<EscrowLedger>) -> Self {
        Self {
            ledger,
            actor: Actor::system(),
        }
    }

    /// Run one sweep.
    pub async fn tick(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.ledger.clock().now();

        match self.ledger.store().find_expired(now).await {
            Ok(ids) => {
                for id in ids {
                    self.process(Sweep::Expire, id, &mut report).await;
                }
            }
            Err(err) => {
                report.failed += 1;
                tracing::error!(error = %err, "failed to query expired escrows");
            }
        }

        match now.checked_plus(-self.ledger.policy().mediation_timeout) {
            Some(cutoff) => match self.ledger.store().find_overdue_disputes(cutoff).await {
                Ok(ids) => {
                    for id in ids {
                        self.process(Sweep::Escalate, id, &mut report).await;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(error = %err, "failed to query overdue disputes");
                }
            },
            // No dispute can have been open longer than the representable past.
            None => tracing::warn!(
                timeout_secs = self.ledger.policy().mediation_timeout.num_seconds(),
                "mediation timeout reaches before the earliest representable time; escalation skipped"
            ),
        }

        if report.expired.is_empty() && report.escalated.is_empty() && report.failed == 0 {
            tracing::debug!(skipped = report.skipped, "deadline sweep found nothing to do");
        } else {
            tracing::info!(
                expired = report.expired.len(),
                escalated = report.escalated.len(),
                skipped = report.skipped,
                failed = report.failed,
                "deadline sweep complete"
            );
        }
        report
    }

    async fn process(&self, sweep: Sweep, id: EscrowId, report: &mut SweepReport) {
        let result = match sweep {
            Sweep::Expire => self.ledger.expire(&id, &self.actor).await,
            Sweep::Escalate => {
                let req = EscalateRequest {
                    reason: MEDIATION_TIMEOUT_REASON.to_string(),
                };
                self.ledger.escalate_dispute(&id, req, &self.actor).await
            }
        };

        match result {
            Ok(_) => match sweep {
                Sweep::Expire => {
                    metrics::counter!("escrow_scheduler_expired_total").increment(1);
                    report.expired.push(id);
                }
                Sweep::Escalate => {
                    metrics::counter!("escrow_scheduler_escalated_total").increment(1);
                    report.escalated.push(id);
                }
            },
            Err(EscrowError::StateConflict(conflict)) => {
                report.skipped += 1;
                tracing::debug!(
                    escrow_id = %id,
                    sweep = sweep.as_str(),
                    conflict = %conflict,
                    "escrow moved by another writer; skipped"
                );
            }
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    escrow_id = %id,
                    sweep = sweep.as_str(),
                    kind = err.kind(),
                    error = %err,
                    "deadline sweep failed for escrow"
                );
            }
        }
    }

    /// Tick every `period` until `shutdown` completes.
    pub async fn run<F>(self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(period_secs = period.as_secs(), "deadline scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = timer.tick() => {
                    self.tick().await;
                }
            }
        }
        tracing::info!("deadline scheduler stopped");
    }
}
