//! # `escrowd serve`
//!
//! Runs the HTTP API with the deadline scheduler and the settlement
//! dispatcher alongside it. On Ctrl-C the server drains in-flight requests,
//! then the scheduler is stopped and the dispatcher loop is aborted.
//! Movements left undispatched are re-submitted by the reconciliation pass
//! on the next start.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use escrow_api::bootstrap::bootstrap;
use escrow_api::AppConfig;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen port. Overrides `ESCROW_PORT`.
    #[arg(short, long)]
    pub port: Option<u16>,
}

pub async fn run_serve(args: &ServeArgs, mut config: AppConfig) -> Result<u8> {
    if let Some(port) = args.port {
        config.port = port;
    }
    let port = config.port;
    let sweep_interval = config.sweep_interval;

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    let services = bootstrap(config).await?;
    let state = services.state.with_metrics(metrics);

    let dispatcher = Arc::clone(&state.dispatcher);
    tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            match dispatcher.reconcile().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "reconciled undispatched settlements"),
                Err(err) => tracing::error!(error = %err, "settlement reconciliation failed"),
            }
        }
    });
    let dispatcher_task = tokio::spawn(dispatcher.run(services.settlements));

    let (stop_scheduler, scheduler_stopped) = oneshot::channel::<()>();
    let scheduler_task = tokio::spawn(services.scheduler.run(sweep_interval, async move {
        let _ = scheduler_stopped.await;
    }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "escrow API listening");

    axum::serve(listener, escrow_api::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    let _ = stop_scheduler.send(());
    if let Err(err) = scheduler_task.await {
        tracing::warn!(error = %err, "deadline scheduler task ended abnormally");
    }
    dispatcher_task.abort();
    tracing::info!("escrow API stopped");
    Ok(0)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => tracing::error!(error = %err, "failed to listen for shutdown signal"),
    }
}
