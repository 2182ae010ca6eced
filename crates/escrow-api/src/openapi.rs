//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into one OpenAPI 3.1 document,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Declares the actor headers as the API's security scheme.
struct ActorHeaders;

impl Modify for ActorHeaders {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "actor_id",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Actor-Id",
                    "Caller identity, set by the authenticating proxy.",
                ))),
            );
            components.add_security_scheme(
                "actor_role",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Actor-Role",
                    "participant (default), admin, mediator or system.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Escrow API",
        version = "0.1.0",
        description = "Milestone escrow and dispute resolution.\n\nFunds are held against an RFQ between one buyer and one supplier, then released, refunded or split through a mediated dispute. Every state change is recorded in a per-escrow hash-chained audit trail.\n\nCallers identify themselves with `X-Actor-Id` and `X-Actor-Role`. Health probes (`/health/*`) and `/metrics` need no identity.",
        license(name = "AGPL-3.0-or-later"),
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("actor_id" = [], "actor_role" = [])
    ),
    paths(
        // ── Escrows ─────────────────────────────────────────────────────
        crate::routes::escrows::create_escrow,
        crate::routes::escrows::list_escrows,
        crate::routes::escrows::get_escrow,
        crate::routes::escrows::fund_escrow,
        crate::routes::escrows::release_funds,
        crate::routes::escrows::refund_funds,
        crate::routes::escrows::extend_deadline,
        crate::routes::escrows::cancel_escrow,
        crate::routes::escrows::get_audit_trail,
        // ── Disputes ────────────────────────────────────────────────────
        crate::routes::disputes::open_dispute,
        crate::routes::disputes::acknowledge_dispute,
        crate::routes::disputes::escalate_dispute,
        crate::routes::disputes::resolve_dispute,
        // ── Gateway ─────────────────────────────────────────────────────
        crate::routes::gateway::gateway_webhook,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            // ── Escrow DTOs ─────────────────────────────────────────────
            crate::routes::escrows::CreateEscrowBody,
            crate::routes::escrows::FundBody,
            crate::routes::escrows::PayoutBody,
            crate::routes::escrows::ExtendBody,
            crate::routes::escrows::CancelBody,
            crate::routes::escrows::EscrowResponse,
            crate::routes::escrows::DisputeResponse,
            crate::routes::escrows::MovementResponse,
            crate::routes::escrows::EscrowListResponse,
            crate::routes::escrows::AuditTrailResponse,
            // ── Dispute DTOs ────────────────────────────────────────────
            crate::routes::disputes::OpenDisputeBody,
            crate::routes::disputes::EscalateBody,
            crate::routes::disputes::ResolveBody,
            // ── Gateway DTOs ────────────────────────────────────────────
            crate::routes::gateway::WebhookBody,
            crate::routes::gateway::WebhookEvent,
        ),
    ),
    modifiers(&ActorHeaders),
    tags(
        (name = "escrows", description = "Escrow lifecycle: create, fund, release, refund, extend, cancel, audit"),
        (name = "disputes", description = "Dispute filing, mediation, escalation and resolution"),
        (name = "gateway", description = "Payment rail callbacks"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_lists_every_route() {
        let spec = ApiDoc::openapi();
        for path in [
            "/v1/escrows",
            "/v1/escrows/{id}",
            "/v1/escrows/{id}/fund",
            "/v1/escrows/{id}/release",
            "/v1/escrows/{id}/refund",
            "/v1/escrows/{id}/extend",
            "/v1/escrows/{id}/cancel",
            "/v1/escrows/{id}/audit",
            "/v1/escrows/{id}/dispute",
            "/v1/escrows/{id}/dispute/acknowledge",
            "/v1/escrows/{id}/dispute/escalate",
            "/v1/escrows/{id}/dispute/resolve",
            "/v1/gateway/webhook",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn spec_declares_actor_headers() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("components");
        assert!(components.security_schemes.contains_key("actor_id"));
        assert!(components.security_schemes.contains_key("actor_role"));
        assert!(components.schemas.contains_key("EscrowResponse"));
    }
}
