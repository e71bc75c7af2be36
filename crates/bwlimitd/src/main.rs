//! bwlimitd: throttled TCP echo daemon.
//!
//!   bwlimitd [addr]
//!
//! SIGHUP re-reads the config file and applies the new limits to the live
//! listener, including connections that are already open.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use bwlimit::ThrottledListener;
use bwlimit_core::BwlimitConfig;

mod serve;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = BwlimitConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = BwlimitConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BwlimitConfig::default()
    });

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.listen.addr.clone());

    let raw = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let listener = Arc::new(ThrottledListener::from_config(raw, &config.limits));
    tracing::info!(
        addr = %listener.local_addr()?,
        global = %config.limits.global(),
        per_conn = %config.limits.per_conn(),
        wait_timeout_ms = config.limits.wait_timeout_ms,
        "bwlimitd listening"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    #[cfg(unix)]
    let _reload_task = {
        use tokio::signal::unix::{signal, SignalKind};
        let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
        let listener = listener.clone();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                tracing::info!("SIGHUP received, reloading config");
                serve::reload(&listener);
            }
        })
    };

    let server_task = tokio::spawn(serve::EchoServer::new(listener, shutdown_tx.subscribe()).run());

    // ── Wait for exit ────────────────────────────────────────────────────────

    match server_task.await {
        Ok(Ok(())) => tracing::info!("bwlimitd stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "echo server failed"),
        Err(e) => tracing::error!(error = %e, "echo server task panicked"),
    }

    Ok(())
}
