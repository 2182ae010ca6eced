//! # Gateway Webhook
//!
//! `POST /v1/gateway/webhook`: the payment rail reporting that buyer funds
//! arrived or that a submitted settlement completed or failed. Only the
//! `system` and `admin` roles may call it; the sender is expected to be
//! authenticated upstream and forwarded with `X-Actor-Role: system`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use escrow_core::{EscrowId, Role, TransactionId};

use crate::error::AppError;
use crate::extractors::{extract_json, CallerActor};
use crate::routes::escrows::EscrowResponse;
use crate::state::AppState;

const DEFAULT_FAILURE_REASON: &str = "gateway reported settlement failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    FundsReceived,
    SettlementConfirmed,
    SettlementFailed,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookBody {
    pub event: WebhookEvent,
    pub transaction_id: String,
    /// Required for `funds_received`; settlement events are matched by
    /// transaction id.
    #[serde(default)]
    pub escrow_id: Option<Uuid>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/gateway/webhook", post(gateway_webhook))
}

#[utoipa::path(
    post,
    path = "/v1/gateway/webhook",
    request_body = WebhookBody,
    responses(
        (status = 200, description = "Event applied to the owning escrow", body = EscrowResponse),
        (status = 403, description = "Caller is not the gateway", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown escrow or transaction", body = crate::error::ErrorBody),
    ),
    tag = "gateway"
)]
async fn gateway_webhook(
    State(state): State<AppState>,
    CallerActor(actor): CallerActor,
    body: Result<Json<WebhookBody>, JsonRejection>,
) -> Result<Json<EscrowResponse>, AppError> {
    if !matches!(actor.role, Role::System | Role::Admin) {
        return Err(AppError::Forbidden(format!(
            "{} may not deliver gateway events",
            actor.id
        )));
    }
    let body = extract_json(body)?;
    let tx = TransactionId::new(body.transaction_id)?;
    tracing::info!(event = ?body.event, transaction_id = %tx, "gateway webhook received");

    let escrow = match body.event {
        WebhookEvent::FundsReceived => {
            let id = body.escrow_id.map(EscrowId::from_uuid).ok_or_else(|| {
                AppError::Validation("funds_received requires escrowId".to_string())
            })?;
            state.ledger.fund(&id, tx, &actor).await?
        }
        WebhookEvent::SettlementConfirmed => state.dispatcher.on_settlement_confirmed(tx).await?,
        WebhookEvent::SettlementFailed => {
            let reason = body
                .reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
            state.dispatcher.on_settlement_failed(tx, reason).await?
        }
    };
    Ok(Json(EscrowResponse::from(&escrow)))
}
