//! Long-running trigger commands: `adw serve` and `adw poll`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use adw::config::AdwConfig;
use adw::trigger::Ingestor;
use adw::trigger::poller::Poller;
use adw::trigger::webhook::{self, WebhookState};

use super::Runtime;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Wait for in-flight workflows. A second Ctrl+C exits right away; the
/// interrupted workflows resume on the next start.
async fn drain(dispatcher: JoinHandle<()>) -> Result<()> {
    println!("Waiting for in-flight workflows (Ctrl+C again to exit now)...");
    tokio::select! {
        joined = dispatcher => joined.context("Dispatcher task failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("exiting with workflows in flight; they resume on next start");
        }
    }
    Ok(())
}

fn report_warnings(config: &AdwConfig) {
    for warning in config.validate() {
        warn!("{}", warning);
    }
}

pub async fn cmd_serve(config: &AdwConfig, port: Option<u16>) -> Result<()> {
    report_warnings(config);
    let runtime = Runtime::build(config).await?;
    let (ingestor, dispatcher) = Ingestor::spawn(runtime.orchestrator.clone());

    let recovered = ingestor.recover().await?;
    if !recovered.is_empty() {
        info!(count = recovered.len(), "resumed interrupted workflows");
    }

    let state = Arc::new(WebhookState {
        ingestor,
        store: runtime.store.clone(),
        secret: config.webhook_secret.clone(),
        keyword: config.keyword.clone(),
    });

    let addr = format!("0.0.0.0:{}", port.unwrap_or(config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    println!(
        "adw webhook listening on http://{}",
        listener.local_addr().context("Listener has no local address")?
    );

    webhook::serve(listener, state, shutdown_signal()).await?;
    drain(dispatcher).await?;
    println!("Server shut down gracefully.");
    Ok(())
}

pub async fn cmd_poll(config: &AdwConfig, interval: Option<u64>, once: bool) -> Result<()> {
    report_warnings(config);
    let runtime = Runtime::build(config).await?;
    let (ingestor, dispatcher) = Ingestor::spawn(runtime.orchestrator.clone());

    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or(config.poll_interval);
    let poller = Poller::new(
        runtime.repo.clone(),
        ingestor.clone(),
        &config.state_dir,
        config.keyword.clone(),
        interval,
    );

    if once {
        drop(ingestor);
        let summary = poller.poll_once().await;
        drop(poller);
        // Workflows started by this cycle run to completion before exit.
        dispatcher.await.context("Dispatcher task failed")?;
        let summary = summary?;
        println!(
            "Poll complete: {} new, {} dispatched, {} skipped.",
            summary.seen, summary.dispatched, summary.skipped
        );
        return Ok(());
    }

    let recovered = ingestor.recover().await?;
    if !recovered.is_empty() {
        info!(count = recovered.len(), "resumed interrupted workflows");
    }
    drop(ingestor);

    println!("adw polling every {}s (Ctrl+C to stop)", interval.as_secs().max(1));
    poller.run(shutdown_signal()).await;
    drop(poller);
    drain(dispatcher).await
}
