//! # Application State
//!
//! Shared state passed to all Axum route handlers. Cloning is cheap: every
//! field is an `Arc` or a handle.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;

use escrow_gateway::SettlementDispatcher;
use escrow_ledger::EscrowLedger;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<EscrowLedger>,
    /// Handles gateway webhooks and owns the in-flight settlement set.
    pub dispatcher: Arc<SettlementDispatcher>,
    /// `None` when running against the in-memory store.
    pub db_pool: Option<PgPool>,
    /// `None` when no Prometheus recorder is installed; `/metrics` is
    /// then not served.
    pub metrics: Option<PrometheusHandle>,
    pub config: Arc<AppConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("dispatcher", &self.dispatcher)
            .field("database", &self.db_pool.is_some())
            .field("metrics", &self.metrics.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl AppState {
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
