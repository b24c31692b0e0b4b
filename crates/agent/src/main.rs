//! Autoscaling agent
//!
//! Keeps the node metrics store of one deployment fed and trimmed: pulls
//! snapshot batches from the spool directory into the store, drops old
//! partitions on a schedule, and serves health and Prometheus endpoints.

use anyhow::{Context, Result};
use autoscaler_lib::{
    clock::SystemClock,
    health::{components, HealthRegistry},
    maintenance::{MaintenanceLoopBuilder, SpoolSource},
    metrics_db::MetricsStore,
    observability::{AgentMetrics, StructuredLogger},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting autoscaling-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        data_dir = %config.data_dir.display(),
        spool_dir = %config.spool_dir.display(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION, &config.data_dir.display().to_string());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    let data_dir = config.data_dir.clone();
    let store = tokio::task::spawn_blocking(move || {
        MetricsStore::open(data_dir, Arc::new(SystemClock))
    })
    .await
    .context("Metrics store open task panicked")?;
    let store = match store {
        Ok(store) => Arc::new(store),
        Err(e) => {
            health_registry
                .set_unhealthy(components::METRICS_STORE, e.to_string())
                .await;
            return Err(e).context("Failed to open metrics store");
        }
    };
    metrics.set_watermark(store.watermark());
    health_registry.set_ready(true).await;

    let maintenance = MaintenanceLoopBuilder::new()
        .store(store.clone())
        .source(Arc::new(SpoolSource::new(&config.spool_dir)))
        .health(health_registry.clone())
        .node_name(&config.node_name)
        .collection_interval(config.collection_interval())
        .gc_interval(config.gc_interval())
        .max_scaling_window(config.max_scaling_window())
        .build()?;
    let maintenance_handle = tokio::spawn(maintenance.run(shutdown_tx.subscribe()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = maintenance_handle.await {
        warn!(error = %e, "Maintenance loop ended abnormally");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    store.close();
    info!("Shutdown complete");
    Ok(())
}
