//! Scrape command implementation.

use crate::ExitCode;
use anyhow::Result;
use chrono::Utc;
use kscrape_core::engine::ScrapeEngine;
use kscrape_core::scanner::StopReason;
use kscrape_core::Config;
use tokio::sync::broadcast;
use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run a single scrape and map its outcome to an exit code.
pub async fn run(config: Config) -> Result<ExitCode> {
    let request = config.to_request(Utc::now())?;

    let engine = ScrapeEngine::new(request, &config.kafka)?;
    let shutdown_tx = engine.shutdown_signal();

    // Spawn a task to handle shutdown signals (SIGINT and SIGTERM)
    tokio::spawn(wait_for_signal(shutdown_tx));

    let summary = engine.run(std::io::stdout()).await?;

    info!(
        matches = summary.matches,
        polled = summary.records_polled,
        reason = ?summary.stop_reason,
        "Scrape finished"
    );

    Ok(match summary.stop_reason {
        StopReason::Cancelled => ExitCode::SignalInterrupt,
        StopReason::Completed | StopReason::MatchLimit => ExitCode::Success,
    })
}

async fn wait_for_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), stopping scrape");
                let _ = shutdown_tx.send(());
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), stopping scrape");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, stopping scrape");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, stopping scrape");
    }

    let _ = shutdown_tx.send(());
}
