//! Maintenance loop
//!
//! Runs two independent cycles against the metrics store: collection, which
//! pulls a batch from the snapshot source and appends it, and retention,
//! which drops partitions older than the retention horizon. Store calls are
//! blocking and run on the blocking pool. A failed cycle is logged, counted
//! and retried on the next tick.

use super::SnapshotSource;
use crate::health::{components, HealthRegistry};
use crate::metrics_db::{
    default_max_scaling_window, retention_horizon, AddOutcome, MetricsDb, MetricsDbError,
};
use crate::observability::{AgentMetrics, StructuredLogger};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often snapshots are collected (default: 60 seconds)
    pub collection_interval: Duration,
    /// How often retention runs (default: 1 hour)
    pub gc_interval: Duration,
    /// Longest window scaling decisions look back over; retention keeps one day more
    pub max_scaling_window: chrono::Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(60),
            gc_interval: Duration::from_secs(60 * 60),
            max_scaling_window: default_max_scaling_window(),
        }
    }
}

pub struct MaintenanceLoop {
    store: Arc<dyn MetricsDb>,
    source: Arc<dyn SnapshotSource>,
    config: MaintenanceConfig,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl MaintenanceLoop {
    pub fn new(
        store: Arc<dyn MetricsDb>,
        source: Arc<dyn SnapshotSource>,
        config: MaintenanceConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            source,
            config,
            health,
            metrics: AgentMetrics::new(),
            logger,
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Run until a shutdown signal arrives
    ///
    /// Both cycles fire once immediately, then on their own intervals.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            collection_interval_secs = self.config.collection_interval.as_secs(),
            gc_interval_secs = self.config.gc_interval.as_secs(),
            source = %self.source.name(),
            "Starting maintenance loop"
        );

        let mut collection_ticker = interval(self.config.collection_interval);
        collection_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut gc_ticker = interval(self.config.gc_interval);
        gc_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = collection_ticker.tick() => {
                    if let Err(e) = self.collect_once().await {
                        warn!(error = %e, "Collection cycle failed, retrying next cycle");
                    }
                }
                _ = gc_ticker.tick() => {
                    if let Err(e) = self.gc_once().await {
                        warn!(error = %e, "Retention cycle failed, retrying next cycle");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down maintenance loop");
                    break;
                }
            }
        }
    }

    /// Pull one batch from the source and append it to the store
    pub async fn collect_once(&self) -> Result<AddOutcome> {
        let batch = match self.source.collect().await {
            Ok(batch) => batch,
            Err(e) => {
                self.metrics.inc_collection_errors();
                self.health
                    .set_degraded(components::COLLECTOR, format!("source failed: {e}"))
                    .await;
                return Err(e.context(format!("Failed to collect from {}", self.source.name())));
            }
        };
        if batch.is_empty() {
            debug!(source = %self.source.name(), "No new snapshots");
            self.health.set_healthy(components::COLLECTOR).await;
            return Ok(AddOutcome::default());
        }

        let store = self.store.clone();
        let start = Instant::now();
        let added = tokio::task::spawn_blocking(move || store.add(&batch))
            .await
            .context("Store write task panicked")?;
        self.metrics
            .observe_add_latency(start.elapsed().as_secs_f64());

        match added {
            Ok(outcome) => {
                self.metrics.record_add(&outcome);
                self.metrics.set_watermark(self.store.watermark());
                self.logger.log_batch(self.source.name(), &outcome);
                self.health.set_healthy(components::COLLECTOR).await;
                self.health.set_healthy(components::METRICS_STORE).await;
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.inc_collection_errors();
                self.report_store_failure(&e).await;
                Err(e).context("Failed to store snapshot batch")
            }
        }
    }

    async fn report_store_failure(&self, error: &MetricsDbError) {
        match error {
            MetricsDbError::Corrupted(_) | MetricsDbError::SchemaEvolution(_) => {
                self.metrics.inc_store_repairs();
                self.health
                    .set_unhealthy(
                        components::METRICS_STORE,
                        format!("still corrupted after repair: {error}"),
                    )
                    .await;
            }
            MetricsDbError::Closed => {
                self.health
                    .set_unhealthy(components::METRICS_STORE, "metrics store is closed")
                    .await;
            }
            _ => {
                self.health
                    .set_degraded(components::COLLECTOR, error.to_string())
                    .await;
            }
        }
    }

    /// Drop partitions older than the retention horizon; returns how many went
    pub async fn gc_once(&self) -> Result<usize> {
        let horizon = retention_horizon(self.config.max_scaling_window);
        let store = self.store.clone();
        let collected = tokio::task::spawn_blocking(move || {
            let removed = store.try_gc(horizon)?;
            let remaining = store.partitions()?.len();
            Ok::<_, MetricsDbError>((removed, remaining))
        })
        .await
        .context("Retention task panicked")?;

        match collected {
            Ok((removed, remaining)) => {
                self.metrics.record_gc(removed);
                self.metrics.set_partitions(remaining);
                self.logger.log_gc(removed, remaining);
                self.health.set_healthy(components::GC).await;
                Ok(removed)
            }
            Err(e) => {
                self.metrics.inc_gc_failures();
                self.health
                    .set_degraded(components::GC, e.to_string())
                    .await;
                Err(e).context("Failed to remove old metrics partitions")
            }
        }
    }
}

/// Builder for the maintenance loop
pub struct MaintenanceLoopBuilder {
    store: Option<Arc<dyn MetricsDb>>,
    source: Option<Arc<dyn SnapshotSource>>,
    health: Option<HealthRegistry>,
    node_name: String,
    config: MaintenanceConfig,
}

impl MaintenanceLoopBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            source: None,
            health: None,
            node_name: "unknown".to_string(),
            config: MaintenanceConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn MetricsDb>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn collection_interval(mut self, interval: Duration) -> Self {
        self.config.collection_interval = interval;
        self
    }

    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.config.gc_interval = interval;
        self
    }

    pub fn max_scaling_window(mut self, window: chrono::Duration) -> Self {
        self.config.max_scaling_window = window;
        self
    }

    pub fn build(self) -> Result<MaintenanceLoop> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Metrics store is required"))?;
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Snapshot source is required"))?;
        if self.config.collection_interval.is_zero() || self.config.gc_interval.is_zero() {
            anyhow::bail!("Maintenance intervals must be positive");
        }

        Ok(MaintenanceLoop::new(
            store,
            source,
            self.config,
            self.health.unwrap_or_default(),
            StructuredLogger::new(self.node_name),
        ))
    }
}

impl Default for MaintenanceLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
