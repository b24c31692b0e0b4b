//! Node metrics storage
//!
//! This module provides:
//! - A durable, day-partitioned store of per-node metric snapshots
//! - Out-of-order write admission against a per-store watermark
//! - Windowed multi-host reads
//! - Partition-granular retention and corruption repair

mod admission;
mod error;
mod partition;
mod schema;
mod store;

#[cfg(test)]
mod tests;

pub use admission::GRACE_WINDOW_MILLIS;
pub use error::{MetricsDbError, MetricsDbResult, StorageFault};
pub use partition::Partition;
pub use schema::{Column, ColumnType, Schema};
pub use store::{AddOutcome, MetricsStore};

use crate::models::{HostSnapshot, NodeTimeseries};
use chrono::{DateTime, Duration, Utc};

/// Largest scaling window the autoscaler bases decisions on, in hours
pub const DEFAULT_MAX_SCALING_WINDOW_HOURS: i64 = 24;

pub fn default_max_scaling_window() -> Duration {
    Duration::hours(DEFAULT_MAX_SCALING_WINDOW_HOURS)
}

/// How long metrics must be retained to serve a given maximum scaling window
///
/// Retention drops whole days, so one day is added on top of the window.
/// Saturates at `Duration::MAX`.
pub fn retention_horizon(max_scaling_window: Duration) -> Duration {
    max_scaling_window
        .checked_add(&Duration::days(1))
        .unwrap_or(Duration::MAX)
}

/// `now - span`, or the earliest representable instant when that underflows
pub(crate) fn saturating_before(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Trait for node metrics storage implementations
pub trait MetricsDb: Send + Sync {
    /// Append a batch of `(hostname, snapshot)` entries
    fn add(&self, batch: &[HostSnapshot]) -> MetricsDbResult<AddOutcome>;

    /// Read the snapshots of the given hosts over the last `period`
    fn get_node_timeseries(
        &self,
        period: Duration,
        hostnames: &[String],
    ) -> MetricsDbResult<Vec<NodeTimeseries>>;

    /// Drop data older than the retention horizon; returns partitions removed
    ///
    /// Failures are logged and reported as nothing removed.
    fn gc(&self, retention_horizon: Duration) -> usize;

    /// Like [`MetricsDb::gc`], but surfaces the failure
    fn try_gc(&self, retention_horizon: Duration) -> MetricsDbResult<usize>;

    /// Day partitions currently stored, oldest first
    fn partitions(&self) -> MetricsDbResult<Vec<Partition>>;

    /// Highest timestamp committed so far
    fn watermark(&self) -> DateTime<Utc>;

    fn close(&self);
}
