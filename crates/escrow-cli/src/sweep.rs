//! # `escrowd sweep`
//!
//! Runs a single deadline-scheduler tick against the configured store,
//! dispatches any refunds it produced, and prints the report as JSON.
//! Intended for cron-driven deployments that do not run `serve`.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use escrow_api::bootstrap::bootstrap;
use escrow_api::AppConfig;
use escrow_gateway::DispatchOutcome;
use escrow_ledger::SweepReport;

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Skip dispatching the refunds the sweep commits. They are picked up
    /// by the next `serve` start.
    #[arg(long)]
    pub no_dispatch: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SweepOutput {
    #[serde(flatten)]
    report: SweepReport,
    dispatched: usize,
    dead_lettered: usize,
}

/// Returns exit code 1 when any candidate failed for a reason other than
/// losing a race to another writer.
pub async fn run_sweep(args: &SweepArgs, config: AppConfig) -> Result<u8> {
    if config.database_url.is_none() {
        tracing::warn!("DATABASE_URL is not set; sweeping an empty in-memory store");
    }
    let services = bootstrap(config).await?;
    let report = services.scheduler.tick().await;

    let mut dispatched = 0;
    let mut dead_lettered = 0;
    let mut settlements = services.settlements;
    while let Ok(instruction) = settlements.try_recv() {
        if args.no_dispatch {
            continue;
        }
        let movement_id = instruction.movement_id;
        match services.state.dispatcher.dispatch(instruction).await {
            Ok(DispatchOutcome::Submitted { .. }) => dispatched += 1,
            Ok(DispatchOutcome::DeadLettered { .. }) => dead_lettered += 1,
            Err(err) => {
                tracing::warn!(movement_id = %movement_id, error = %err, "sweep refund dispatch failed");
            }
        }
    }

    let failed = report.failed;
    let output = SweepOutput {
        report,
        dispatched,
        dead_lettered,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(if failed > 0 { 1 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_over_empty_memory_store_succeeds() {
        let code = run_sweep(&SweepArgs { no_dispatch: false }, AppConfig::default())
            .await
            .unwrap();
        assert_eq!(code, 0);
    }
}
