//! # escrow-api — Axum API Services
//!
//! The HTTP surface of the escrow engine, built on Axum/Tower/Tokio.
//!
//! ## Routes
//!
//! - `/v1/escrows/*`: escrow lifecycle and audit trail
//! - `/v1/escrows/{id}/dispute/*`: dispute filing and resolution
//! - `/v1/gateway/webhook`: payment rail callbacks
//! - `/openapi.json`: generated OpenAPI document
//! - `/health/*`, `/metrics`: probes and Prometheus scrape (no identity)
//!
//! ## Middleware Stack (Tower)
//!
//! TraceLayer → TimeoutLayer → request metrics
//!
//! ## Crate Policy
//!
//! - No business logic in route handlers; everything goes through
//!   `EscrowLedger`.
//! - All errors map to structured HTTP responses via `AppError`.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use config::AppConfig;
pub use error::AppError;
pub use state::AppState;

/// Build the complete application router.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::escrows::router())
        .merge(routes::disputes::router())
        .merge(routes::gateway::router())
        .merge(openapi::router())
        .route_layer(from_fn(middleware::track_requests))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let mut unauthenticated = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness));
    if state.metrics.is_some() {
        unauthenticated = unauthenticated.route("/metrics", get(prometheus_metrics));
    }
    let unauthenticated = unauthenticated.with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

async fn liveness() -> &'static str {
    "ok"
}

/// Ready when the store answers and, if configured, Postgres does too.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }
    if let Err(e) = state.ledger.store().list(1, 0).await {
        tracing::warn!("Escrow store health check failed: {e}");
        return (StatusCode::SERVICE_UNAVAILABLE, "escrow store unavailable").into_response();
    }
    (StatusCode::OK, "ready").into_response()
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
