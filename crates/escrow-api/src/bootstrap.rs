//! # Service Assembly
//!
//! Wires the ledger, the settlement dispatcher and the deadline scheduler
//! from an [`AppConfig`]. The store is Postgres when `DATABASE_URL` is set
//! and in-memory otherwise; the gateway is the HTTP rail when
//! `GATEWAY_BASE_URL` is set and the mock rail otherwise. Both fallbacks
//! log a warning at startup.

use std::sync::Arc;

use tokio::sync::mpsc;

use escrow_core::{Clock, SystemClock};
use escrow_gateway::{GatewayError, HttpPaymentGateway, MockGateway, PaymentGateway, SettlementDispatcher};
use escrow_ledger::{
    AllowAllVerifier, DeadlineScheduler, EscrowLedger, EscrowStore, MemoryStore,
    SettlementInstruction, TracingNotifier,
};
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("payment gateway setup failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// Everything `escrowd` runs: the HTTP state plus the two background loops.
pub struct Services {
    pub state: AppState,
    pub scheduler: DeadlineScheduler,
    /// Instructions emitted by the ledger after each committing payout.
    /// Feed to [`SettlementDispatcher::run`].
    pub settlements: mpsc::UnboundedReceiver<SettlementInstruction>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("state", &self.state)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Assemble services over an explicit store, gateway and clock.
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn EscrowStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        db_pool: Option<PgPool>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = Arc::new(
            EscrowLedger::new(store)
                .with_clock(clock)
                .with_policy(config.ledger_policy())
                .with_notifier(Arc::new(TracingNotifier))
                .with_identity_verifier(Arc::new(AllowAllVerifier))
                .with_settlement_channel(tx),
        );
        let dispatcher = Arc::new(SettlementDispatcher::new(
            Arc::clone(&ledger),
            gateway,
            config.retry_policy(),
        ));
        let scheduler = DeadlineScheduler::new(Arc::clone(&ledger));

        Self {
            state: AppState {
                ledger,
                dispatcher,
                db_pool,
                metrics: None,
                config: Arc::new(config),
            },
            scheduler,
            settlements: rx,
        }
    }
}

/// Connect collaborators named by `config` and assemble the services.
///
/// # Errors
///
/// Fails if the database is configured but unreachable or its migrations
/// fail, or if the HTTP gateway client cannot be built.
pub async fn bootstrap(config: AppConfig) -> Result<Services, BootstrapError> {
    let (store, db_pool): (Arc<dyn EscrowStore>, Option<PgPool>) = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url).await?;
            db::migrate(&pool).await?;
            (Arc::new(db::escrows::PgEscrowStore::new(pool.clone())), Some(pool))
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set; running with the in-memory store. \
                 Escrows will not survive restarts."
            );
            (Arc::new(MemoryStore::new()), None)
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match config.http_gateway() {
        Some(gateway_config) => Arc::new(HttpPaymentGateway::new(gateway_config)?),
        None => {
            tracing::warn!(
                "GATEWAY_BASE_URL not set; settlements go to the mock gateway \
                 and no funds move."
            );
            Arc::new(MockGateway::new())
        }
    };

    Ok(Services::assemble(
        config,
        store,
        gateway,
        Arc::new(SystemClock),
        db_pool,
    ))
}
