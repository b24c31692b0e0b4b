//! Resource targets
//!
//! Converts aggregated cluster load into the per-node resources a cluster
//! should be scaled towards. Everything here is pure: no I/O and no shared
//! state, so one calculator can serve many clusters concurrently.

mod calculator;
mod policy;

pub use calculator::ResourceTargetCalculator;
pub use policy::{PolicyError, ScalingPolicy};
