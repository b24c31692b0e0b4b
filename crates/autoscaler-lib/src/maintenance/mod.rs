//! Periodic maintenance of the metrics store
//!
//! This module provides:
//! - The [`SnapshotSource`] seam through which fresh node snapshots arrive
//! - A spool-directory source fed by the metrics-collection collaborator
//! - The maintenance loop running collection and retention cycles

mod r#loop;
mod spool;


pub use r#loop::{MaintenanceConfig, MaintenanceLoop, MaintenanceLoopBuilder};
pub use spool::{SpoolError, SpoolSource};

use crate::models::HostSnapshot;
use anyhow::Result;

pub use async_trait::async_trait;

/// Trait for anything that can hand the maintenance loop a batch of snapshots
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Snapshots gathered since the previous call
    async fn collect(&self) -> Result<Vec<HostSnapshot>>;
}
