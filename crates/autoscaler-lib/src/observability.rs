//! Observability for the autoscaling agent
//!
//! Provides:
//! - Prometheus metrics (store latency, admission counts, repairs, retention)
//! - Structured JSON logging of maintenance events with tracing

use crate::metrics_db::AddOutcome;
use chrono::{DateTime, Utc};
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for store latencies, in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    add_latency_seconds: Histogram,
    snapshots_written: IntCounter,
    snapshots_dropped: IntCounter,
    snapshots_coerced: IntCounter,
    store_repairs: IntCounter,
    gc_partitions_removed: IntCounter,
    gc_failures: IntCounter,
    collection_errors: IntCounter,
    partitions: IntGauge,
    watermark_seconds: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            add_latency_seconds: register_histogram!(
                "autoscaler_metrics_add_latency_seconds",
                "Time spent committing a snapshot batch to the metrics store",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register add_latency_seconds"),

            snapshots_written: register_int_counter!(
                "autoscaler_snapshots_written_total",
                "Snapshots committed to the metrics store"
            )
            .expect("Failed to register snapshots_written"),

            snapshots_dropped: register_int_counter!(
                "autoscaler_snapshots_dropped_total",
                "Snapshots dropped for arriving after the grace window"
            )
            .expect("Failed to register snapshots_dropped"),

            snapshots_coerced: register_int_counter!(
                "autoscaler_snapshots_coerced_total",
                "Late snapshots stored at the watermark instead of their own timestamp"
            )
            .expect("Failed to register snapshots_coerced"),

            store_repairs: register_int_counter!(
                "autoscaler_metrics_store_repairs_total",
                "Times the metrics store was wiped after corruption"
            )
            .expect("Failed to register store_repairs"),

            gc_partitions_removed: register_int_counter!(
                "autoscaler_gc_partitions_removed_total",
                "Day partitions dropped by retention"
            )
            .expect("Failed to register gc_partitions_removed"),

            gc_failures: register_int_counter!(
                "autoscaler_gc_failures_total",
                "Retention runs that failed"
            )
            .expect("Failed to register gc_failures"),

            collection_errors: register_int_counter!(
                "autoscaler_collection_errors_total",
                "Collection cycles that failed to read or store snapshots"
            )
            .expect("Failed to register collection_errors"),

            partitions: register_int_gauge!(
                "autoscaler_metrics_partitions",
                "Day partitions currently held by the metrics store"
            )
            .expect("Failed to register partitions"),

            watermark_seconds: register_int_gauge!(
                "autoscaler_metrics_watermark_seconds",
                "Timestamp of the newest committed snapshot, in epoch seconds"
            )
            .expect("Failed to register watermark_seconds"),
        }
    }
}

/// Handle to the process-wide agent metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_add_latency(&self, duration_secs: f64) {
        self.inner().add_latency_seconds.observe(duration_secs);
    }

    /// Count what one `add` call did
    pub fn record_add(&self, outcome: &AddOutcome) {
        let inner = self.inner();
        inner.snapshots_written.inc_by(outcome.written as u64);
        inner.snapshots_dropped.inc_by(outcome.dropped as u64);
        inner.snapshots_coerced.inc_by(outcome.coerced as u64);
        if outcome.repaired {
            inner.store_repairs.inc();
        }
    }

    pub fn inc_store_repairs(&self) {
        self.inner().store_repairs.inc();
    }

    pub fn record_gc(&self, removed: usize) {
        self.inner().gc_partitions_removed.inc_by(removed as u64);
    }

    pub fn inc_gc_failures(&self) {
        self.inner().gc_failures.inc();
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }

    pub fn set_partitions(&self, count: usize) {
        self.inner().partitions.set(count as i64);
    }

    pub fn set_watermark(&self, watermark: DateTime<Utc>) {
        self.inner().watermark_seconds.set(watermark.timestamp());
    }
}

/// Structured logger for maintenance events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, data_dir: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            data_dir = %data_dir,
            "Autoscaling agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Autoscaling agent shutting down"
        );
    }

    /// Log a committed batch, with a separate event when anything was dropped or repaired
    pub fn log_batch(&self, source: &str, outcome: &AddOutcome) {
        debug!(
            event = "batch_committed",
            node = %self.node_name,
            source = %source,
            written = outcome.written,
            coerced = outcome.coerced,
            "Committed snapshot batch"
        );
        if outcome.dropped > 0 {
            warn!(
                event = "snapshots_dropped",
                node = %self.node_name,
                source = %source,
                dropped = outcome.dropped,
                "Dropped late or unstorable snapshots"
            );
        }
        if outcome.repaired {
            self.log_store_repaired("corruption while committing a batch");
        }
    }

    pub fn log_store_repaired(&self, reason: &str) {
        warn!(
            event = "metrics_store_repaired",
            node = %self.node_name,
            reason = %reason,
            "Metrics store was wiped and reinitialized"
        );
    }

    pub fn log_gc(&self, removed: usize, remaining: usize) {
        info!(
            event = "gc_completed",
            node = %self.node_name,
            removed = removed,
            remaining = remaining,
            "Metrics retention completed"
        );
    }
}
