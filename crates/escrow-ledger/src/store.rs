//! # Escrow Store
//!
//! The persistence seam. An `EscrowStore` holds one authoritative snapshot
//! per escrow plus its append-only audit chain, and offers exactly one way
//! to change a snapshot: [`EscrowStore::compare_and_swap`], which writes
//! only if the stored version still equals the version the caller read.
//!
//! Audit drafts travel with the write they describe and are sealed by the
//! store in the same critical section, so a committed transition and its
//! audit events are never observed apart.
//!
//! [`MemoryStore`] is the in-process implementation used by tests and by
//! `escrowd` when no database is configured. The Postgres implementation
//! lives in `escrow-api`.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use escrow_core::{EscrowError, EscrowId, StateConflict, Timestamp, TransactionId};
use escrow_state::{Escrow, EscrowState};

use crate::audit::{seal_all, AuditDraft, AuditEvent};

/// Authoritative storage for escrow snapshots and their audit chains.
#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Persist a new escrow and its creation event.
    async fn insert(&self, escrow: &Escrow, audit: AuditDraft) -> Result<AuditEvent, EscrowError>;

    async fn get(&self, id: &EscrowId) -> Result<Option<Escrow>, EscrowError>;

    /// Replace the stored snapshot with `next` if its version is still
    /// `expected_version`, appending `audit` in the same commit.
    ///
    /// # Errors
    ///
    /// `StateConflict::VersionMismatch` when another writer got there
    /// first. `NotFound` if the escrow does not exist.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &Escrow,
        audit: Vec<AuditDraft>,
    ) -> Result<Vec<AuditEvent>, EscrowError>;

    /// Append an event that does not accompany a snapshot change
    /// (rejections and replays).
    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditEvent, EscrowError>;

    /// The escrow's full chain, oldest first.
    async fn audit_trail(&self, id: &EscrowId) -> Result<Vec<AuditEvent>, EscrowError>;

    /// Escrows ordered by creation time, oldest first.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Escrow>, EscrowError>;

    /// `ACTIVE` escrows whose deadline is strictly before `now`.
    async fn find_expired(&self, now: Timestamp) -> Result<Vec<EscrowId>, EscrowError>;

    /// `DISPUTED` escrows whose active dispute is still `OPEN` and was
    /// opened at or before `opened_before`.
    async fn find_overdue_disputes(
        &self,
        opened_before: Timestamp,
    ) -> Result<Vec<EscrowId>, EscrowError>;

    /// The escrow owning the fund movement submitted as `tx`.
    async fn find_by_settlement_transaction(
        &self,
        tx: &TransactionId,
    ) -> Result<Option<EscrowId>, EscrowError>;

    /// Escrows holding a pending movement that was never submitted.
    async fn find_undispatched(&self) -> Result<Vec<EscrowId>, EscrowError>;
}

// ── In-memory store ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    escrows: HashMap<EscrowId, Escrow>,
    audit: HashMap<EscrowId, Vec<AuditEvent>>,
}

impl Inner {
    fn append(&mut self, id: EscrowId, drafts: Vec<AuditDraft>) -> Result<Vec<AuditEvent>, EscrowError> {
        let chain = self.audit.entry(id).or_default();
        let sealed = seal_all(chain.last(), drafts)?;
        chain.extend(sealed.iter().cloned());
        Ok(sealed)
    }

    fn sorted(&self) -> Vec<&Escrow> {
        let mut all: Vec<&Escrow> = self.escrows.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }
}

/// `EscrowStore` behind a single `parking_lot::RwLock`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored audit event. Exists so tests can simulate
    /// out-of-band tampering.
    #[doc(hidden)]
    pub fn tamper_audit(&self, id: &EscrowId, index: usize, edit: impl FnOnce(&mut AuditEvent)) {
        if let Some(event) = self.inner.write().audit.get_mut(id).and_then(|c| c.get_mut(index)) {
            edit(event);
        }
    }
}

#[async_trait]
impl EscrowStore for MemoryStore {
    async fn insert(&self, escrow: &Escrow, audit: AuditDraft) -> Result<AuditEvent, EscrowError> {
        let mut inner = self.inner.write();
        if inner.escrows.contains_key(&escrow.id) {
            return Err(EscrowError::Storage(format!(
                "escrow {} already exists",
                escrow.id
            )));
        }
        let mut sealed = inner.append(escrow.id, vec![audit])?;
        inner.escrows.insert(escrow.id, escrow.clone());
        sealed
            .pop()
            .ok_or_else(|| EscrowError::Storage("creation event was not sealed".to_string()))
    }

    async fn get(&self, id: &EscrowId) -> Result<Option<Escrow>, EscrowError> {
        Ok(self.inner.read().escrows.get(id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &Escrow,
        audit: Vec<AuditDraft>,
    ) -> Result<Vec<AuditEvent>, EscrowError> {
        let mut inner = self.inner.write();
        let actual = inner
            .escrows
            .get(&next.id)
            .map(|e| e.version)
            .ok_or_else(|| EscrowError::NotFound(format!("escrow {}", next.id)))?;
        if actual != expected_version {
            return Err(StateConflict::VersionMismatch {
                expected: expected_version,
                actual,
            }
            .into());
        }
        let sealed = inner.append(next.id, audit)?;
        inner.escrows.insert(next.id, next.clone());
        Ok(sealed)
    }

    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditEvent, EscrowError> {
        let mut inner = self.inner.write();
        if !inner.escrows.contains_key(&draft.escrow_id) {
            return Err(EscrowError::NotFound(format!("escrow {}", draft.escrow_id)));
        }
        let id = draft.escrow_id;
        let mut sealed = inner.append(id, vec![draft])?;
        sealed
            .pop()
            .ok_or_else(|| EscrowError::Storage("audit event was not sealed".to_string()))
    }

    async fn audit_trail(&self, id: &EscrowId) -> Result<Vec<AuditEvent>, EscrowError> {
        Ok(self.inner.read().audit.get(id).cloned().unwrap_or_default())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Escrow>, EscrowError> {
        let inner = self.inner.read();
        Ok(inner
            .sorted()
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_expired(&self, now: Timestamp) -> Result<Vec<EscrowId>, EscrowError> {
        let inner = self.inner.read();
        Ok(inner
            .sorted()
            .into_iter()
            .filter(|e| e.state == EscrowState::Active && e.deadline < now)
            .map(|e| e.id)
            .collect())
    }

    async fn find_overdue_disputes(
        &self,
        opened_before: Timestamp,
    ) -> Result<Vec<EscrowId>, EscrowError> {
        use escrow_arbitration::DisputeStatus;

        let inner = self.inner.read();
        Ok(inner
            .sorted()
            .into_iter()
            .filter(|e| e.state == EscrowState::Disputed)
            .filter(|e| {
                e.active_dispute().is_some_and(|d| {
                    d.status == DisputeStatus::Open && d.opened_at <= opened_before
                })
            })
            .map(|e| e.id)
            .collect())
    }

    async fn find_by_settlement_transaction(
        &self,
        tx: &TransactionId,
    ) -> Result<Option<EscrowId>, EscrowError> {
        let inner = self.inner.read();
        Ok(inner
            .escrows
            .values()
            .find(|e| e.movement_by_transaction(tx).is_some())
            .map(|e| e.id))
    }

    async fn find_undispatched(&self) -> Result<Vec<EscrowId>, EscrowError> {
        let inner = self.inner.read();
        Ok(inner
            .sorted()
            .into_iter()
            .filter(|e| e.undispatched_movements().next().is_some())
            .map(|e| e.id)
            .collect())
    }
}
