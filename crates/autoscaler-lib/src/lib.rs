//! Autoscaling decision core
//!
//! This crate provides:
//! - A durable, day-partitioned store of per-node utilization snapshots
//! - The resource target calculation driven by aggregated cluster load
//! - The maintenance loop that feeds the store and applies retention
//! - Health checks and observability

pub mod clock;
pub mod health;
pub mod maintenance;
pub mod metrics_db;
pub mod models;
pub mod observability;
pub mod target;

pub use clock::{Clock, ManualClock, SystemClock};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metrics_db::{AddOutcome, MetricsDb, MetricsDbError, MetricsStore};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use target::{ResourceTargetCalculator, ScalingPolicy};
