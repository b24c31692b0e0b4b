//! Policy constants for resource targets

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ideal long-run cpu utilization before growth and traffic-shift headroom
pub const IDEAL_CPU_LOAD: f64 = 0.8;

pub const IDEAL_MEMORY_LOAD: f64 = 0.7;

pub const IDEAL_DISK_LOAD: f64 = 0.6;

/// Upper bound on the traffic-shift headroom factor
pub const MAX_TRAFFIC_SHIFT_HEADROOM: f64 = 2.0;

/// How far above the best-ever observed peak growth headroom may reach
pub const PEAK_HEADROOM_MARGIN: f64 = 0.1;

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("{name} must be a positive finite number, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{name} must be a non-negative finite number, got {value}")]
    Negative { name: &'static str, value: f64 },
}

/// Tunable constants of the target calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    pub ideal_cpu_load: f64,
    pub ideal_memory_load: f64,
    pub ideal_disk_load: f64,
    pub max_traffic_shift_headroom: f64,
    pub peak_headroom_margin: f64,
    /// Lower bound on the dynamic ideal cpu load; 0 disables it
    pub min_ideal_cpu_load: f64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            ideal_cpu_load: IDEAL_CPU_LOAD,
            ideal_memory_load: IDEAL_MEMORY_LOAD,
            ideal_disk_load: IDEAL_DISK_LOAD,
            max_traffic_shift_headroom: MAX_TRAFFIC_SHIFT_HEADROOM,
            peak_headroom_margin: PEAK_HEADROOM_MARGIN,
            min_ideal_cpu_load: 0.0,
        }
    }
}

impl ScalingPolicy {
    /// Check that every constant can be divided by and multiplied with safely
    pub fn validate(&self) -> Result<(), PolicyError> {
        for (name, value) in [
            ("ideal_cpu_load", self.ideal_cpu_load),
            ("ideal_memory_load", self.ideal_memory_load),
            ("ideal_disk_load", self.ideal_disk_load),
            ("max_traffic_shift_headroom", self.max_traffic_shift_headroom),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(PolicyError::NotPositive { name, value });
            }
        }
        for (name, value) in [
            ("peak_headroom_margin", self.peak_headroom_margin),
            ("min_ideal_cpu_load", self.min_ideal_cpu_load),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(PolicyError::Negative { name, value });
            }
        }
        Ok(())
    }
}
