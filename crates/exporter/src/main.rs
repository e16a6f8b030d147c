//! Load balancer controller exporter
//!
//! Polls the controller's management API on every scrape, correlates
//! metric series with entity metadata and republishes the latest
//! sample per metric as a labeled Prometheus gauge.

use anyhow::{Context, Result};
use exporter_lib::{
    Catalog, CollectionOrchestrator, ExporterMetrics, GaugeStore, HickoryReverseDns,
    HttpControllerClient, ReadinessProbe,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting lb-exporter");

    let config = config::ExporterConfig::load()?;

    let catalog = Catalog::load(Path::new(&config.definitions_dir))
        .context("failed to load metric definition documents")?
        .restrict(&config.selected_metrics())
        .context("invalid metric selection")?;
    info!(metrics = catalog.len(), "metric catalog loaded");

    let controller = Arc::new(HttpControllerClient::new(
        config.connection_opts(),
        Duration::from_secs(config.request_timeout_secs),
        config.insecure,
    )?);
    let dns = Arc::new(
        HickoryReverseDns::new(Duration::from_millis(config.dns_timeout_ms))
            .context("failed to build reverse DNS resolver")?,
    );

    let store = GaugeStore::new(&catalog).context("failed to register catalog gauges")?;
    let telemetry = ExporterMetrics::register(store.registry())
        .context("failed to register exporter telemetry")?;
    let orchestrator = Arc::new(CollectionOrchestrator::new(
        controller,
        dns,
        catalog,
        store,
        telemetry,
        config.controller_url.clone(),
    ));

    let probe = Arc::new(ReadinessProbe::new(
        ReadinessProbe::target_from_url(&config.controller_url)?,
        Duration::from_millis(50),
        Duration::from_secs(10),
    ));

    let state = Arc::new(api::AppState { orchestrator, probe });
    let _server = tokio::spawn(api::serve(config.listen_addr.clone(), state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
