//! # Escrow Endpoints
//!
//! Thin handlers over [`EscrowLedger`](escrow_ledger::EscrowLedger): parse
//! the body into the ledger's request type, call the operation, render the
//! snapshot. Authorization, validation and audit all happen in the ledger.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/escrows` | `create_escrow` |
//! | `GET` | `/v1/escrows` | `list_escrows` |
//! | `GET` | `/v1/escrows/{id}` | `get_escrow` |
//! | `POST` | `/v1/escrows/{id}/fund` | `fund_escrow` |
//! | `POST` | `/v1/escrows/{id}/release` | `release_funds` |
//! | `POST` | `/v1/escrows/{id}/refund` | `refund_funds` |
//! | `POST` | `/v1/escrows/{id}/extend` | `extend_deadline` |
//! | `POST` | `/v1/escrows/{id}/cancel` | `cancel_escrow` |
//! | `GET` | `/v1/escrows/{id}/audit` | `get_audit_trail` |

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use escrow_arbitration::{DisputeRecord, ResolutionOutcome};
use escrow_core::{Amount, Currency, EscrowId, PartyId, RfqId, Timestamp, TransactionId};
use escrow_ledger::{AuditEvent, ChainReport};
use escrow_state::{
    CancelRequest, CreateEscrowRequest, Escrow, ExtendRequest, FundMovement, PayoutRequest,
};

use crate::error::AppError;
use crate::extractors::{extract_json, extract_path, extract_query, idempotency_key, CallerActor};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateEscrowBody {
    pub rfq_id: String,
    pub buyer_id: String,
    pub supplier_id: String,
    /// Decimal string with at most two fractional digits.
    #[schema(value_type = String, example = "10000.00")]
    pub amount: Amount,
    /// ISO 4217 code, e.g. `INR`.
    pub currency: String,
    pub terms: String,
    /// RFC 3339 UTC with `Z` suffix.
    #[schema(example = "2026-12-31T00:00:00Z")]
    pub deadline: String,
    /// Opaque caller data. Floats are rejected.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
    /// Gateway account for refunds. Defaults to `buyerId`.
    #[serde(default)]
    pub buyer_account: Option<String>,
    /// Gateway account for releases. Defaults to `supplierId`.
    #[serde(default)]
    pub supplier_account: Option<String>,
}

impl CreateEscrowBody {
    fn into_request(self) -> Result<CreateEscrowRequest, AppError> {
        Ok(CreateEscrowRequest {
            rfq_id: RfqId::new(self.rfq_id)?,
            buyer_id: PartyId::new(self.buyer_id)?,
            supplier_id: PartyId::new(self.supplier_id)?,
            amount: self.amount,
            currency: Currency::new(&self.currency)?,
            terms: self.terms,
            deadline: Timestamp::parse(&self.deadline)?,
            metadata: self.metadata,
            buyer_account: self.buyer_account,
            supplier_account: self.supplier_account,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FundBody {
    /// Gateway transaction that collected the buyer's funds.
    pub transaction_id: String,
}

/// Body of `release` and `refund`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PayoutBody {
    /// Defaults to the full held amount.
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "4000.00")]
    pub amount: Option<Amount>,
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Replay key. The `Idempotency-Key` header is used when absent.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl PayoutBody {
    fn into_request(self, header_key: Option<String>) -> PayoutRequest {
        PayoutRequest {
            amount: self.amount,
            reason: self.reason,
            evidence: self.evidence,
            idempotency_key: self.idempotency_key.or(header_key),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExtendBody {
    /// RFC 3339 UTC. Must be later than both now and the current deadline.
    pub new_deadline: String,
    pub reason: String,
    #[serde(default)]
    pub additional_terms: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CancelBody {
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Only zero is accepted: nothing has been collected before funding.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub refund_amount: Option<Amount>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Page size, default 50, at most 500.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Escrow snapshot.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EscrowResponse {
    pub id: Uuid,
    pub rfq_id: String,
    pub buyer_id: String,
    pub supplier_id: String,
    pub buyer_account: String,
    pub supplier_account: String,
    pub currency: String,
    pub original_amount: String,
    pub held_amount: String,
    pub released_amount: String,
    pub refunded_amount: String,
    /// Lifecycle state, e.g. `ACTIVE`.
    pub state: String,
    /// `RELEASE_PENDING`, `REFUND_PENDING`, `SETTLEMENT_FAILED` or `SETTLED`.
    pub settlement_status: String,
    pub valid_transitions: Vec<String>,
    pub deadline: String,
    pub version: u64,
    pub terms: String,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
    pub funding_transaction_id: Option<String>,
    pub funded_at: Option<String>,
    pub disputes: Vec<DisputeResponse>,
    pub movements: Vec<MovementResponse>,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
}

impl From<&Escrow> for EscrowResponse {
    fn from(e: &Escrow) -> Self {
        Self {
            id: *e.id.as_uuid(),
            rfq_id: e.rfq_id.to_string(),
            buyer_id: e.buyer_id.to_string(),
            supplier_id: e.supplier_id.to_string(),
            buyer_account: e.buyer_account.clone(),
            supplier_account: e.supplier_account.clone(),
            currency: e.currency.to_string(),
            original_amount: e.original_amount.to_string(),
            held_amount: e.held_amount.to_string(),
            released_amount: e.released_amount.to_string(),
            refunded_amount: e.refunded_amount.to_string(),
            state: e.state.as_str().to_string(),
            settlement_status: e.settlement_status().as_str().to_string(),
            valid_transitions: e
                .state
                .valid_transitions()
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            deadline: e.deadline.to_iso8601(),
            version: e.version,
            terms: e.terms.clone(),
            metadata: e.metadata.clone(),
            funding_transaction_id: e.funding_transaction_id.as_ref().map(ToString::to_string),
            funded_at: e.funded_at.map(|t| t.to_iso8601()),
            disputes: e.disputes.iter().map(DisputeResponse::from).collect(),
            movements: e.movements.iter().map(MovementResponse::from).collect(),
            created_at: e.created_at.to_iso8601(),
            updated_at: e.updated_at.to_iso8601(),
            closed_at: e.closed_at.map(|t| t.to_iso8601()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisputeResponse {
    pub id: Uuid,
    /// `OPEN`, `MEDIATION`, `ESCALATED` or `RESOLVED`.
    pub status: String,
    pub reason: String,
    pub description: String,
    pub evidence: Vec<String>,
    pub requested_action: String,
    pub contested_amount: Option<String>,
    pub raised_by: String,
    pub opened_at: String,
    pub mediator_id: Option<String>,
    pub acknowledged_at: Option<String>,
    pub escalated_at: Option<String>,
    pub escalation_reason: Option<String>,
    /// `{"type": "release" | "refund" | "partial_refund", "amount"?}`.
    #[schema(value_type = Option<Object>)]
    pub resolution: Option<ResolutionOutcome>,
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<String>,
}

impl From<&DisputeRecord> for DisputeResponse {
    fn from(d: &DisputeRecord) -> Self {
        Self {
            id: *d.id.as_uuid(),
            status: d.status.as_str().to_string(),
            reason: d.reason.clone(),
            description: d.description.clone(),
            evidence: d.evidence.iter().map(|r| r.as_str().to_string()).collect(),
            requested_action: d.requested_action.to_string(),
            contested_amount: d.contested_amount.map(|a| a.to_string()),
            raised_by: d.raised_by.to_string(),
            opened_at: d.opened_at.to_iso8601(),
            mediator_id: d.mediator_id.as_ref().map(ToString::to_string),
            acknowledged_at: d.acknowledged_at.map(|t| t.to_iso8601()),
            escalated_at: d.escalated_at.map(|t| t.to_iso8601()),
            escalation_reason: d.escalation_reason.clone(),
            resolution: d.resolution_outcome,
            resolution_notes: d.resolution_notes.clone(),
            resolved_at: d.resolved_at.map(|t| t.to_iso8601()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementResponse {
    pub id: Uuid,
    /// `release` or `refund`.
    pub kind: String,
    pub amount: String,
    pub beneficiary_account: String,
    pub idempotency_key: String,
    /// `PENDING`, `SETTLED`, `FAILED` or `DEAD_LETTERED`.
    pub status: String,
    pub gateway_transaction_id: Option<String>,
    pub attempts: u32,
    pub created_at: String,
    pub submitted_at: Option<String>,
    pub settled_at: Option<String>,
    pub failure_reason: Option<String>,
}

impl From<&FundMovement> for MovementResponse {
    fn from(m: &FundMovement) -> Self {
        Self {
            id: *m.id.as_uuid(),
            kind: m.kind.as_str().to_string(),
            amount: m.amount.to_string(),
            beneficiary_account: m.beneficiary_account.clone(),
            idempotency_key: m.idempotency_key.clone(),
            status: m.status.as_str().to_string(),
            gateway_transaction_id: m.gateway_transaction_id.as_ref().map(ToString::to_string),
            attempts: m.attempts,
            created_at: m.created_at.to_iso8601(),
            submitted_at: m.submitted_at.map(|t| t.to_iso8601()),
            settled_at: m.settled_at.map(|t| t.to_iso8601()),
            failure_reason: m.failure_reason.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EscrowListResponse {
    pub escrows: Vec<EscrowResponse>,
    pub limit: usize,
    pub offset: usize,
}

/// An escrow's audit chain with the result of verifying it.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrailResponse {
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<AuditEvent>,
    pub verified: bool,
    /// Index of the first event that failed verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/escrows", post(create_escrow).get(list_escrows))
        .route("/v1/escrows/{id}", get(get_escrow))
        .route("/v1/escrows/{id}/fund", post(fund_escrow))
        .route("/v1/escrows/{id}/release", post(release_funds))
        .route("/v1/escrows/{id}/refund", post(refund_funds))
        .route("/v1/escrows/{id}/extend", post(extend_deadline))
        .route("/v1/escrows/{id}/cancel", post(cancel_escrow))
        .route("/v1/escrows/{id}/audit", get(get_audit_trail))
}

pub(crate) fn escrow_id(path: Result<Path<Uuid>, PathRejection>) -> Result<EscrowId, AppError> {
    extract_path(path).map(EscrowId::from_uuid)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/escrows",
    request_body = CreateEscrowBody,
    responses(
        (status = 201, description = "Escrow created in CREATED", body = EscrowResponse),
        (status = 400, description = "Validation failure", body = crate::error::ErrorBody),
        (status = 403, description = "Caller is not the buyer or an admin", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn create_escrow(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    body: Result<Json<CreateEscrowBody>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_json(body)?.into_request()?;
    let escrow = state.ledger.create(req, &actor).await?;
    Ok((StatusCode::CREATED, Json(EscrowResponse::from(&escrow))))
}

#[utoipa::path(
    get,
    path = "/v1/escrows",
    params(ListParams),
    responses(
        (status = 200, description = "Escrows ordered by creation time", body = EscrowListResponse),
        (status = 403, description = "Caller is not staff", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn list_escrows(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<EscrowListResponse>, AppError> {
    let params = extract_query(params)?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);
    let escrows = state.ledger.list(&actor, limit, offset).await?;
    Ok(Json(EscrowListResponse {
        escrows: escrows.iter().map(EscrowResponse::from).collect(),
        limit,
        offset,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/escrows/{id}",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    responses(
        (status = 200, description = "Escrow snapshot", body = EscrowResponse),
        (status = 404, description = "Escrow not found", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn get_escrow(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    let id = escrow_id(id)?;
    let escrow = state.ledger.get(&id, &actor).await?;
    Ok(Json(EscrowResponse::from(&escrow)))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/fund",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = FundBody,
    responses(
        (status = 200, description = "Funded and active", body = EscrowResponse),
        (status = 409, description = "Not in CREATED or funded by another transaction", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn fund_escrow(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<FundBody>, JsonRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    let id = escrow_id(id)?;
    let tx = TransactionId::new(extract_json(body)?.transaction_id)?;
    let escrow = state.ledger.fund(&id, tx, &actor).await?;
    Ok(Json(EscrowResponse::from(&escrow)))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/release",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = PayoutBody,
    responses(
        (status = 200, description = "Funds released to the supplier", body = EscrowResponse),
        (status = 409, description = "Illegal transition or amount conflict", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn release_funds(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
    headers: HeaderMap,
    body: Result<Json<PayoutBody>, JsonRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    let id = escrow_id(id)?;
    let req = extract_json(body)?.into_request(idempotency_key(&headers)?);
    let escrow = state.ledger.release(&id, req, &actor).await?;
    Ok(Json(EscrowResponse::from(&escrow)))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/refund",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = PayoutBody,
    responses(
        (status = 200, description = "Funds refunded to the buyer", body = EscrowResponse),
        (status = 409, description = "Illegal transition or amount conflict", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn refund_funds(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
    headers: HeaderMap,
    body: Result<Json<PayoutBody>, JsonRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    let id = escrow_id(id)?;
    let req = extract_json(body)?.into_request(idempotency_key(&headers)?);
    let escrow = state.ledger.refund(&id, req, &actor).await?;
    Ok(Json(EscrowResponse::from(&escrow)))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/extend",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = ExtendBody,
    responses(
        (status = 200, description = "Deadline extended", body = EscrowResponse),
        (status = 400, description = "New deadline not in the future", body = crate::error::ErrorBody),
        (status = 409, description = "Escrow not ACTIVE", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn extend_deadline(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ExtendBody>, JsonRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    let id = escrow_id(id)?;
    let body = extract_json(body)?;
    let req = ExtendRequest {
        new_deadline: Timestamp::parse(&body.new_deadline)?,
        reason: body.reason,
        additional_terms: body.additional_terms,
    };
    let escrow = state.ledger.extend(&id, req, &actor).await?;
    Ok(Json(EscrowResponse::from(&escrow)))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/cancel",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = CancelBody,
    responses(
        (status = 200, description = "Escrow cancelled", body = EscrowResponse),
        (status = 409, description = "Escrow not in CREATED", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn cancel_escrow(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<CancelBody>, JsonRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    let id = escrow_id(id)?;
    let body = extract_json(body)?;
    let req = CancelRequest {
        reason: body.reason,
        evidence: body.evidence,
        refund_amount: body.refund_amount,
    };
    let escrow = state.ledger.cancel(&id, req, &actor).await?;
    Ok(Json(EscrowResponse::from(&escrow)))
}

#[utoipa::path(
    get,
    path = "/v1/escrows/{id}/audit",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    responses(
        (status = 200, description = "Hash-chained event history", body = AuditTrailResponse),
        (status = 404, description = "Escrow not found", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn get_audit_trail(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AuditTrailResponse>, AppError> {
    let id = escrow_id(id)?;
    let events = state.ledger.audit_trail(&id, &actor).await?;
    let report = ChainReport::of(&events);
    if !report.verified {
        tracing::error!(
            escrow_id = %id,
            broken_at = ?report.broken_at,
            reason = ?report.reason,
            "audit chain failed verification"
        );
    }
    Ok(Json(AuditTrailResponse {
        events,
        verified: report.verified,
        broken_at: report.broken_at,
        reason: report.reason,
    }))
}
