//! Service assembly
//!
//! Builds the checkpoint from an [`AegisConfig`] and runs either surface.
//! The CLI and tests share this so both wire components the same way.

use crate::api::build_app;
use crate::checkpoint::{stdio, Checkpoint};
use crate::config::AegisConfig;
use crate::error::{Error, Result};
use crate::events::EventLog;
use crate::policy::{FilePolicySource, PolicyStore};
use std::sync::Arc;

/// Wire policy store, scanners, tracker and event log.
pub async fn build_checkpoint(config: &AegisConfig) -> Result<(Arc<Checkpoint>, Arc<EventLog>)> {
    let source = Arc::new(FilePolicySource::new(config.policy.path.clone()));
    let policies = PolicyStore::new(source);

    // Report a bad policy at startup; calls still fall back per request
    if let Err(e) = policies.load().await {
        tracing::warn!(
            source = %policies.describe(),
            "Initial policy load failed, using bootstrap policy: {}",
            e
        );
    }

    let log = Arc::new(EventLog::open(&config.events).await?);
    let checkpoint = Checkpoint::new(policies, log.clone(), config.limits.max_content_bytes)?
        .with_stats(log.clone());

    tracing::info!(
        policy = %checkpoint.policies().describe(),
        event_log = %config.events.path.display(),
        persistent = log.is_persistent(),
        "Checkpoint ready"
    );
    Ok((Arc::new(checkpoint), log))
}

/// Serve the HTTP surface until Ctrl-C.
pub async fn run_server(config: AegisConfig, host: &str, port: u16) -> Result<()> {
    let (checkpoint, _log) = build_checkpoint(&config).await?;
    let app = build_app(checkpoint, &config.server.cors_origins);

    let addr: std::net::SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Config(format!("Invalid listen address {host}:{port}: {e}")))?;

    tracing::info!(%addr, "Aegis checkpoint listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    tracing::info!("Shutting down...");
    Ok(())
}

/// Serve JSON lines on stdin/stdout until stdin closes.
pub async fn run_stdio(config: AegisConfig) -> Result<()> {
    let (checkpoint, _log) = build_checkpoint(&config).await?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    stdio::serve(&checkpoint, stdin, tokio::io::stdout()).await
}
