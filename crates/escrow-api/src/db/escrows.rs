//! Postgres-backed [`EscrowStore`].
//!
//! Each write runs in one transaction: the escrow row is locked with
//! `SELECT ... FOR UPDATE`, its version compared, the snapshot and its
//! child rows written, and the audit drafts sealed against the stored chain
//! tail and inserted. A commit therefore never exposes a snapshot without
//! its audit events, and two writers on one escrow serialize on the row
//! lock.
//!
//! Disputes are stored as JSONB records beside the columns the sweeps
//! query (`status`, `opened_at`). Movements are fully columnar.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use escrow_arbitration::DisputeRecord;
use escrow_core::{
    Amount, Currency, EscrowError, EscrowId, MovementId, PartyId, RfqId, Role, StateConflict,
    Timestamp, TransactionId,
};
use escrow_ledger::audit::seal_all;
use escrow_ledger::{AuditDraft, AuditEvent, AuditOutcome, EscrowStore};
use escrow_state::{Escrow, EscrowState, FundMovement, MovementKind, MovementStatus};

const ESCROW_COLUMNS: &str = "id, rfq_id, buyer_id, supplier_id, buyer_account, supplier_account, \
     currency, original_amount, held_amount, released_amount, refunded_amount, state, deadline, \
     version, terms, metadata, funding_transaction_id, funded_at, created_at, updated_at, closed_at";

const AUDIT_COLUMNS: &str = "escrow_id, sequence, actor_id, actor_role, operation, from_state, \
     to_state, request_payload_hash, outcome, detail, occurred_at, previous_event_hash, event_hash";

#[derive(Debug, Clone)]
pub struct PgEscrowStore {
    pool: PgPool,
}

impl PgEscrowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EscrowStore for PgEscrowStore {
    async fn insert(&self, escrow: &Escrow, audit: AuditDraft) -> Result<AuditEvent, EscrowError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        insert_escrow_row(&mut tx, escrow).await?;
        save_children(&mut tx, escrow).await?;
        let sealed = append_events(&mut tx, &escrow.id, vec![audit]).await?;
        tx.commit().await.map_err(storage)?;
        sealed
            .into_iter()
            .next()
            .ok_or_else(|| EscrowError::Storage("creation event was not sealed".to_string()))
    }

    async fn get(&self, id: &EscrowId) -> Result<Option<Escrow>, EscrowError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        load_escrow(&mut conn, id).await
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &Escrow,
        audit: Vec<AuditDraft>,
    ) -> Result<Vec<AuditEvent>, EscrowError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let actual = lock_version(&mut tx, &next.id).await?;
        if actual != expected_version {
            return Err(StateConflict::VersionMismatch {
                expected: expected_version,
                actual,
            }
            .into());
        }
        update_escrow_row(&mut tx, next).await?;
        save_children(&mut tx, next).await?;
        let sealed = append_events(&mut tx, &next.id, audit).await?;
        tx.commit().await.map_err(storage)?;
        Ok(sealed)
    }

    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditEvent, EscrowError> {
        let escrow_id = draft.escrow_id;
        let mut tx = self.pool.begin().await.map_err(storage)?;
        lock_version(&mut tx, &escrow_id).await?;
        let sealed = append_events(&mut tx, &escrow_id, vec![draft]).await?;
        tx.commit().await.map_err(storage)?;
        sealed
            .into_iter()
            .next()
            .ok_or_else(|| EscrowError::Storage("audit event was not sealed".to_string()))
    }

    async fn audit_trail(&self, id: &EscrowId) -> Result<Vec<AuditEvent>, EscrowError> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM escrow_audit_events WHERE escrow_id = $1 ORDER BY sequence"
        ))
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.into_iter().map(AuditRow::into_event).collect()
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Escrow>, EscrowError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        let rows = sqlx::query_as::<_, EscrowRow>(&format!(
            "SELECT {ESCROW_COLUMNS} FROM escrows ORDER BY created_at, id LIMIT $1 OFFSET $2"
        ))
        .bind(to_i64(limit, "limit")?)
        .bind(to_i64(offset, "offset")?)
        .fetch_all(&mut *conn)
        .await
        .map_err(storage)?;

        let mut escrows = Vec::with_capacity(rows.len());
        for row in rows {
            escrows.push(hydrate(&mut conn, row).await?);
        }
        Ok(escrows)
    }

    async fn find_expired(&self, now: Timestamp) -> Result<Vec<EscrowId>, EscrowError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM escrows WHERE state = 'ACTIVE' AND deadline < $1 ORDER BY deadline, id",
        )
        .bind(now.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(ids.into_iter().map(|(id,)| EscrowId::from_uuid(id)).collect())
    }

    async fn find_overdue_disputes(
        &self,
        opened_before: Timestamp,
    ) -> Result<Vec<EscrowId>, EscrowError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT e.id FROM escrows e
             JOIN escrow_disputes d ON d.escrow_id = e.id
             WHERE e.state = 'DISPUTED' AND d.status = 'OPEN' AND d.opened_at <= $1",
        )
        .bind(opened_before.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(ids.into_iter().map(|(id,)| EscrowId::from_uuid(id)).collect())
    }

    async fn find_by_settlement_transaction(
        &self,
        tx: &TransactionId,
    ) -> Result<Option<EscrowId>, EscrowError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT escrow_id FROM escrow_movements WHERE gateway_transaction_id = $1")
                .bind(tx.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        Ok(row.map(|(id,)| EscrowId::from_uuid(id)))
    }

    async fn find_undispatched(&self) -> Result<Vec<EscrowId>, EscrowError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT escrow_id FROM escrow_movements
             WHERE status = 'PENDING' AND gateway_transaction_id IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(ids.into_iter().map(|(id,)| EscrowId::from_uuid(id)).collect())
    }
}

// ── Writes ───────────────────────────────────────────────────────────

/// Lock the escrow row for the rest of the transaction and return its
/// stored version.
async fn lock_version(conn: &mut PgConnection, id: &EscrowId) -> Result<u64, EscrowError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM escrows WHERE id = $1 FOR UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?;
    let (version,) = row.ok_or_else(|| EscrowError::NotFound(format!("escrow {id}")))?;
    u64::try_from(version).map_err(|_| corrupt("escrow version", version))
}

async fn insert_escrow_row(conn: &mut PgConnection, e: &Escrow) -> Result<(), EscrowError> {
    sqlx::query(&format!(
        "INSERT INTO escrows ({ESCROW_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)"
    ))
    .bind(e.id.as_uuid())
    .bind(e.rfq_id.as_str())
    .bind(e.buyer_id.as_str())
    .bind(e.supplier_id.as_str())
    .bind(&e.buyer_account)
    .bind(&e.supplier_account)
    .bind(e.currency.as_str())
    .bind(e.original_amount.as_decimal())
    .bind(e.held_amount.as_decimal())
    .bind(e.released_amount.as_decimal())
    .bind(e.refunded_amount.as_decimal())
    .bind(e.state.as_str())
    .bind(e.deadline.as_datetime())
    .bind(to_i64(e.version, "version")?)
    .bind(&e.terms)
    .bind(&e.metadata)
    .bind(e.funding_transaction_id.as_ref().map(TransactionId::as_str))
    .bind(e.funded_at.map(|t| *t.as_datetime()))
    .bind(e.created_at.as_datetime())
    .bind(e.updated_at.as_datetime())
    .bind(e.closed_at.map(|t| *t.as_datetime()))
    .execute(&mut *conn)
    .await
    .map_err(storage)?;
    Ok(())
}

/// Overwrite the mutable columns. Identity, parties and the original
/// amount never change after creation.
async fn update_escrow_row(conn: &mut PgConnection, e: &Escrow) -> Result<(), EscrowError> {
    sqlx::query(
        "UPDATE escrows SET
            held_amount = $2, released_amount = $3, refunded_amount = $4, state = $5,
            deadline = $6, version = $7, terms = $8, funding_transaction_id = $9,
            funded_at = $10, updated_at = $11, closed_at = $12
         WHERE id = $1",
    )
    .bind(e.id.as_uuid())
    .bind(e.held_amount.as_decimal())
    .bind(e.released_amount.as_decimal())
    .bind(e.refunded_amount.as_decimal())
    .bind(e.state.as_str())
    .bind(e.deadline.as_datetime())
    .bind(to_i64(e.version, "version")?)
    .bind(&e.terms)
    .bind(e.funding_transaction_id.as_ref().map(TransactionId::as_str))
    .bind(e.funded_at.map(|t| *t.as_datetime()))
    .bind(e.updated_at.as_datetime())
    .bind(e.closed_at.map(|t| *t.as_datetime()))
    .execute(&mut *conn)
    .await
    .map_err(storage)?;
    Ok(())
}

/// Upsert every dispute and movement of `e`. Rows are never deleted; a
/// snapshot only ever appends to or updates its children.
async fn save_children(conn: &mut PgConnection, e: &Escrow) -> Result<(), EscrowError> {
    for (ordinal, dispute) in e.disputes.iter().enumerate() {
        let record = serde_json::to_value(dispute)
            .map_err(|err| EscrowError::Storage(format!("failed to serialize dispute {}: {err}", dispute.id)))?;
        sqlx::query(
            "INSERT INTO escrow_disputes (id, escrow_id, ordinal, status, opened_at, record)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, record = EXCLUDED.record",
        )
        .bind(dispute.id.as_uuid())
        .bind(e.id.as_uuid())
        .bind(to_i32(ordinal, "dispute ordinal")?)
        .bind(dispute.status.as_str())
        .bind(dispute.opened_at.as_datetime())
        .bind(&record)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    }

    for (ordinal, m) in e.movements.iter().enumerate() {
        sqlx::query(
            "INSERT INTO escrow_movements (id, escrow_id, ordinal, kind, amount, beneficiary_account,
                idempotency_key, status, gateway_transaction_id, attempts, created_at, submitted_at,
                settled_at, failure_reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                gateway_transaction_id = EXCLUDED.gateway_transaction_id,
                attempts = EXCLUDED.attempts,
                submitted_at = EXCLUDED.submitted_at,
                settled_at = EXCLUDED.settled_at,
                failure_reason = EXCLUDED.failure_reason",
        )
        .bind(m.id.as_uuid())
        .bind(e.id.as_uuid())
        .bind(to_i32(ordinal, "movement ordinal")?)
        .bind(m.kind.as_str())
        .bind(m.amount.as_decimal())
        .bind(&m.beneficiary_account)
        .bind(&m.idempotency_key)
        .bind(m.status.as_str())
        .bind(m.gateway_transaction_id.as_ref().map(TransactionId::as_str))
        .bind(to_i32(m.attempts, "attempts")?)
        .bind(m.created_at.as_datetime())
        .bind(m.submitted_at.map(|t| *t.as_datetime()))
        .bind(m.settled_at.map(|t| *t.as_datetime()))
        .bind(&m.failure_reason)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    }
    Ok(())
}

/// Seal `drafts` after the stored chain tail and insert them. The caller
/// holds the escrow row lock, so the tail cannot move underneath.
async fn append_events(
    conn: &mut PgConnection,
    escrow_id: &EscrowId,
    drafts: Vec<AuditDraft>,
) -> Result<Vec<AuditEvent>, EscrowError> {
    let tail = sqlx::query_as::<_, AuditRow>(&format!(
        "SELECT {AUDIT_COLUMNS} FROM escrow_audit_events
         WHERE escrow_id = $1 ORDER BY sequence DESC LIMIT 1"
    ))
    .bind(escrow_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage)?
    .map(AuditRow::into_event)
    .transpose()?;

    let sealed = seal_all(tail.as_ref(), drafts)?;
    for event in &sealed {
        sqlx::query(&format!(
            "INSERT INTO escrow_audit_events ({AUDIT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(event.escrow_id.as_uuid())
        .bind(to_i64(event.sequence, "sequence")?)
        .bind(event.actor_id.as_str())
        .bind(event.actor_role.as_str())
        .bind(&event.operation)
        .bind(event.from_state.map(|s| s.as_str()))
        .bind(event.to_state.as_str())
        .bind(&event.request_payload_hash)
        .bind(event.outcome.as_str())
        .bind(&event.detail)
        .bind(event.timestamp.as_datetime())
        .bind(&event.previous_event_hash)
        .bind(&event.event_hash)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    }
    Ok(sealed)
}

// ── Reads ────────────────────────────────────────────────────────────

async fn load_escrow(conn: &mut PgConnection, id: &EscrowId) -> Result<Option<Escrow>, EscrowError> {
    let row = sqlx::query_as::<_, EscrowRow>(&format!(
        "SELECT {ESCROW_COLUMNS} FROM escrows WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage)?;
    match row {
        Some(row) => Ok(Some(hydrate(conn, row).await?)),
        None => Ok(None),
    }
}

async fn hydrate(conn: &mut PgConnection, row: EscrowRow) -> Result<Escrow, EscrowError> {
    let disputes: Vec<(serde_json::Value,)> =
        sqlx::query_as("SELECT record FROM escrow_disputes WHERE escrow_id = $1 ORDER BY ordinal")
            .bind(row.id)
            .fetch_all(&mut *conn)
            .await
            .map_err(storage)?;
    let disputes = disputes
        .into_iter()
        .map(|(record,)| {
            serde_json::from_value::<DisputeRecord>(record)
                .map_err(|e| corrupt(&format!("dispute of escrow {}", row.id), e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let movements = sqlx::query_as::<_, MovementRow>(
        "SELECT id, kind, amount, beneficiary_account, idempotency_key, status,
            gateway_transaction_id, attempts, created_at, submitted_at, settled_at, failure_reason
         FROM escrow_movements WHERE escrow_id = $1 ORDER BY ordinal",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?
    .into_iter()
    .map(MovementRow::into_movement)
    .collect::<Result<Vec<_>, _>>()?;

    row.into_escrow(disputes, movements)
}

#[derive(sqlx::FromRow)]
struct EscrowRow {
    id: Uuid,
    rfq_id: String,
    buyer_id: String,
    supplier_id: String,
    buyer_account: String,
    supplier_account: String,
    currency: String,
    original_amount: Decimal,
    held_amount: Decimal,
    released_amount: Decimal,
    refunded_amount: Decimal,
    state: String,
    deadline: DateTime<Utc>,
    version: i64,
    terms: String,
    metadata: Option<serde_json::Value>,
    funding_transaction_id: Option<String>,
    funded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl EscrowRow {
    fn into_escrow(
        self,
        disputes: Vec<DisputeRecord>,
        movements: Vec<FundMovement>,
    ) -> Result<Escrow, EscrowError> {
        let id = self.id;
        let ctx = |field: &str| format!("{field} of escrow {id}");
        Ok(Escrow {
            id: EscrowId::from_uuid(id),
            rfq_id: RfqId::new(self.rfq_id).map_err(|e| corrupt(&ctx("rfq_id"), e))?,
            buyer_id: PartyId::new(self.buyer_id).map_err(|e| corrupt(&ctx("buyer_id"), e))?,
            supplier_id: PartyId::new(self.supplier_id).map_err(|e| corrupt(&ctx("supplier_id"), e))?,
            buyer_account: self.buyer_account,
            supplier_account: self.supplier_account,
            currency: Currency::new(self.currency.trim()).map_err(|e| corrupt(&ctx("currency"), e))?,
            original_amount: amount(self.original_amount, &ctx("original_amount"))?,
            held_amount: amount(self.held_amount, &ctx("held_amount"))?,
            released_amount: amount(self.released_amount, &ctx("released_amount"))?,
            refunded_amount: amount(self.refunded_amount, &ctx("refunded_amount"))?,
            state: EscrowState::parse(&self.state).map_err(|e| corrupt(&ctx("state"), e))?,
            deadline: Timestamp::from_utc(self.deadline),
            version: u64::try_from(self.version).map_err(|e| corrupt(&ctx("version"), e))?,
            terms: self.terms,
            metadata: self.metadata,
            funding_transaction_id: self
                .funding_transaction_id
                .map(TransactionId::new)
                .transpose()
                .map_err(|e| corrupt(&ctx("funding_transaction_id"), e))?,
            funded_at: self.funded_at.map(Timestamp::from_utc),
            disputes,
            movements,
            created_at: Timestamp::from_utc(self.created_at),
            updated_at: Timestamp::from_utc(self.updated_at),
            closed_at: self.closed_at.map(Timestamp::from_utc),
        })
    }
}

#[derive(sqlx::FromRow)]
struct MovementRow {
    id: Uuid,
    kind: String,
    amount: Decimal,
    beneficiary_account: String,
    idempotency_key: String,
    status: String,
    gateway_transaction_id: Option<String>,
    attempts: i32,
    created_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    settled_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
}

impl MovementRow {
    fn into_movement(self) -> Result<FundMovement, EscrowError> {
        let id = self.id;
        let ctx = |field: &str| format!("{field} of movement {id}");
        Ok(FundMovement {
            id: MovementId::from_uuid(id),
            kind: MovementKind::parse(&self.kind).map_err(|e| corrupt(&ctx("kind"), e))?,
            amount: amount(self.amount, &ctx("amount"))?,
            beneficiary_account: self.beneficiary_account,
            idempotency_key: self.idempotency_key,
            status: MovementStatus::parse(&self.status).map_err(|e| corrupt(&ctx("status"), e))?,
            gateway_transaction_id: self
                .gateway_transaction_id
                .map(TransactionId::new)
                .transpose()
                .map_err(|e| corrupt(&ctx("gateway_transaction_id"), e))?,
            attempts: u32::try_from(self.attempts).map_err(|e| corrupt(&ctx("attempts"), e))?,
            created_at: Timestamp::from_utc(self.created_at),
            submitted_at: self.submitted_at.map(Timestamp::from_utc),
            settled_at: self.settled_at.map(Timestamp::from_utc),
            failure_reason: self.failure_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    escrow_id: Uuid,
    sequence: i64,
    actor_id: String,
    actor_role: String,
    operation: String,
    from_state: Option<String>,
    to_state: String,
    request_payload_hash: String,
    outcome: String,
    detail: Option<String>,
    occurred_at: DateTime<Utc>,
    previous_event_hash: String,
    event_hash: String,
}

impl AuditRow {
    fn into_event(self) -> Result<AuditEvent, EscrowError> {
        let ctx = |field: &str| format!("{field} of audit event {}/{}", self.escrow_id, self.sequence);
        Ok(AuditEvent {
            escrow_id: EscrowId::from_uuid(self.escrow_id),
            sequence: u64::try_from(self.sequence).map_err(|e| corrupt(&ctx("sequence"), e))?,
            actor_id: PartyId::new(self.actor_id.clone()).map_err(|e| corrupt(&ctx("actor_id"), e))?,
            actor_role: Role::parse(&self.actor_role).map_err(|e| corrupt(&ctx("actor_role"), e))?,
            operation: self.operation.clone(),
            from_state: self
                .from_state
                .as_deref()
                .map(EscrowState::parse)
                .transpose()
                .map_err(|e| corrupt(&ctx("from_state"), e))?,
            to_state: EscrowState::parse(&self.to_state).map_err(|e| corrupt(&ctx("to_state"), e))?,
            request_payload_hash: self.request_payload_hash.clone(),
            outcome: AuditOutcome::parse(&self.outcome).map_err(|e| corrupt(&ctx("outcome"), e))?,
            detail: self.detail.clone(),
            timestamp: Timestamp::from_utc(self.occurred_at),
            previous_event_hash: self.previous_event_hash.clone(),
            event_hash: self.event_hash.clone(),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn storage(err: sqlx::Error) -> EscrowError {
    EscrowError::Storage(err.to_string())
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> EscrowError {
    EscrowError::Storage(format!("corrupt {what}: {err}"))
}

fn amount(value: Decimal, what: &str) -> Result<Amount, EscrowError> {
    Amount::new(value).map_err(|e| corrupt(what, e))
}

fn to_i64<T>(value: T, what: &str) -> Result<i64, EscrowError>
where
    T: TryInto<i64> + Copy + std::fmt::Display,
{
    value
        .try_into()
        .map_err(|_| EscrowError::Storage(format!("{what} {value} does not fit in BIGINT")))
}

fn to_i32<T>(value: T, what: &str) -> Result<i32, EscrowError>
where
    T: TryInto<i32> + Copy + std::fmt::Display,
{
    value
        .try_into()
        .map_err(|_| EscrowError::Storage(format!("{what} {value} does not fit in INTEGER")))
}
