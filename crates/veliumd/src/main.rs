//! veliumd — Velium relay gateway daemon.

use anyhow::Result;

use velium_core::config::VeliumConfig;
use velium_services::{Gateway, GatewaySettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = VeliumConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = VeliumConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        VeliumConfig::default()
    });

    let settings = GatewaySettings::from_config(&config)?;
    tracing::info!(
        bind = %settings.bind,
        identify_grace_ms = config.timeouts.identify_grace_ms,
        idle_timeout_ms = config.timeouts.idle_timeout_ms,
        "veliumd starting"
    );

    let handle = Gateway::start(settings).await?;

    // ── Status API ───────────────────────────────────────────────────────────

    let api_task = if config.network.api_port != 0 {
        let state = velium_api::ApiState {
            gateway: handle.gateway().clone(),
        };
        let port = config.network.api_port;
        Some(tokio::spawn(async move {
            if let Err(e) = velium_api::serve(state, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        }))
    } else {
        None
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");

    if let Some(task) = api_task {
        task.abort();
    }
    handle.shutdown().await;
    tracing::info!("shut down");

    Ok(())
}
