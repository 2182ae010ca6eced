//! # Dispute Endpoints
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/escrows/{id}/dispute` | `open_dispute` |
//! | `POST` | `/v1/escrows/{id}/dispute/acknowledge` | `acknowledge_dispute` |
//! | `POST` | `/v1/escrows/{id}/dispute/escalate` | `escalate_dispute` |
//! | `POST` | `/v1/escrows/{id}/dispute/resolve` | `resolve_dispute` |
//!
//! Each acts on the escrow's active dispute; an escrow has at most one.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use escrow_arbitration::{DisputeFiling, RequestedAction, ResolutionOutcome};
use escrow_core::Amount;
use escrow_state::{EscalateRequest, ResolveRequest};

use crate::error::AppError;
use crate::extractors::{extract_json, idempotency_key, CallerActor};
use crate::routes::escrows::{escrow_id, EscrowResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OpenDisputeBody {
    pub reason: String,
    pub description: String,
    /// At least one reference, each at most 512 characters.
    pub evidence: Vec<String>,
    /// `refund`, `partial_refund`, `release` or `mediation`.
    #[schema(value_type = String, example = "partial_refund")]
    pub requested_action: RequestedAction,
    /// Contested amount. Required for `partial_refund`.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub amount: Option<Amount>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EscalateBody {
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResolveBody {
    /// `{"type": "release" | "refund", "amount"?}` or
    /// `{"type": "partial_refund", "amount"}`.
    #[schema(value_type = Object)]
    pub outcome: ResolutionOutcome,
    #[serde(default)]
    pub notes: Option<String>,
    /// Replay key. The `Idempotency-Key` header is used when absent.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/escrows/{id}/dispute", post(open_dispute))
        .route("/v1/escrows/{id}/dispute/acknowledge", post(acknowledge_dispute))
        .route("/v1/escrows/{id}/dispute/escalate", post(escalate_dispute))
        .route("/v1/escrows/{id}/dispute/resolve", post(resolve_dispute))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/dispute",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = OpenDisputeBody,
    responses(
        (status = 201, description = "Dispute opened, escrow DISPUTED", body = EscrowResponse),
        (status = 400, description = "Missing reason or evidence", body = crate::error::ErrorBody),
        (status = 409, description = "Escrow not ACTIVE", body = crate::error::ErrorBody),
    ),
    tag = "disputes"
)]
async fn open_dispute(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<OpenDisputeBody>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let id = escrow_id(id)?;
    let body = extract_json(body)?;
    let filing = DisputeFiling {
        reason: body.reason,
        description: body.description,
        evidence: body.evidence,
        requested_action: body.requested_action,
        contested_amount: body.amount,
    };
    let escrow = state.ledger.dispute(&id, filing, &actor).await?;
    Ok((StatusCode::CREATED, Json(EscrowResponse::from(&escrow))))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/dispute/acknowledge",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    responses(
        (status = 200, description = "Dispute moved to MEDIATION", body = EscrowResponse),
        (status = 409, description = "No OPEN dispute", body = crate::error::ErrorBody),
    ),
    tag = "disputes"
)]
async fn acknowledge_dispute(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    let id = escrow_id(id)?;
    let escrow = state.ledger.acknowledge_dispute(&id, &actor).await?;
    Ok(Json(EscrowResponse::from(&escrow)))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/dispute/escalate",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = EscalateBody,
    responses(
        (status = 200, description = "Dispute ESCALATED", body = EscrowResponse),
        (status = 409, description = "No OPEN or MEDIATION dispute", body = crate::error::ErrorBody),
    ),
    tag = "disputes"
)]
async fn escalate_dispute(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<EscalateBody>, JsonRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    let id = escrow_id(id)?;
    let req = EscalateRequest {
        reason: extract_json(body)?.reason,
    };
    let escrow = state.ledger.escalate_dispute(&id, req, &actor).await?;
    Ok(Json(EscrowResponse::from(&escrow)))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/dispute/resolve",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = ResolveBody,
    responses(
        (status = 200, description = "Dispute RESOLVED and payout applied", body = EscrowResponse),
        (status = 400, description = "Outcome amount invalid", body = crate::error::ErrorBody),
        (status = 409, description = "No active dispute or amount exceeds held", body = crate::error::ErrorBody),
    ),
    tag = "disputes"
)]
async fn resolve_dispute(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    id: Result<Path<Uuid>, PathRejection>,
    headers: HeaderMap,
    body: Result<Json<ResolveBody>, JsonRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    let id = escrow_id(id)?;
    let header_key = idempotency_key(&headers)?;
    let body = extract_json(body)?;
    let req = ResolveRequest {
        outcome: body.outcome,
        notes: body.notes,
        idempotency_key: body.idempotency_key.or(header_key),
    };
    let escrow = state.ledger.resolve_dispute(&id, req, &actor).await?;
    Ok(Json(EscrowResponse::from(&escrow)))
}
