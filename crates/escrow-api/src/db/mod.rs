//! # Database Persistence Layer
//!
//! Postgres persistence for escrows via SQLx.
//!
//! The database layer is **optional**. When `DATABASE_URL` is set the
//! ledger runs on [`escrows::PgEscrowStore`]; when absent it runs on the
//! in-memory store (suitable for development and testing).
//!
//! ## What is persisted
//!
//! - Escrow snapshots, with amount conservation enforced by a `CHECK`
//! - Disputes and fund movements
//! - The audit event log (append-only, enforced by a trigger)

pub mod escrows;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Connect to Postgres.
pub async fn init_pool(url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;
    tracing::info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
