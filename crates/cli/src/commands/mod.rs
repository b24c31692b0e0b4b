//! Subcommand implementations

pub mod store;
pub mod target;
pub mod timeseries;

use anyhow::{Context, Result};
use autoscaler_lib::{clock::SystemClock, metrics_db::MetricsStore};
use chrono::Duration;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PeriodError {
    #[error("period is empty")]
    Empty,
    #[error("invalid number in period '{0}'")]
    Number(String),
    #[error("unknown unit in period '{0}', expected s, m, h or d")]
    Unit(String),
    #[error("period '{0}' must be positive")]
    NotPositive(String),
    #[error("period '{0}' is too long")]
    OutOfRange(String),
}

/// Parse periods such as `90s`, `30m`, `24h` or `7d`
pub fn parse_period(input: &str) -> Result<Duration, PeriodError> {
    let input = input.trim();
    let Some(unit) = input.chars().last() else {
        return Err(PeriodError::Empty);
    };
    let digits = &input[..input.len() - unit.len_utf8()];
    let amount: i64 = digits
        .parse()
        .map_err(|_| PeriodError::Number(input.to_string()))?;
    if amount <= 0 {
        return Err(PeriodError::NotPositive(input.to_string()));
    }
    let period = match unit {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        _ => return Err(PeriodError::Unit(input.to_string())),
    };
    period.ok_or_else(|| PeriodError::OutOfRange(input.to_string()))
}

pub fn open_store(data_dir: &Path) -> Result<MetricsStore> {
    MetricsStore::open(data_dir, Arc::new(SystemClock))
        .with_context(|| format!("Failed to open metrics store at {}", data_dir.display()))
}
