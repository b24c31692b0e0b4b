//! Error types for the metrics store

use std::io;
use thiserror::Error;

/// Result type alias for metrics store operations
pub type MetricsDbResult<T> = Result<T, MetricsDbError>;

/// Errors surfaced by the metrics store
#[derive(Debug, Error)]
pub enum MetricsDbError {
    /// Persisted data is unreadable; the store repairs itself once before surfacing this
    #[error("metrics store is corrupted: {0}")]
    Corrupted(String),

    #[error("metrics store I/O failure: {0}")]
    Io(String),

    /// Reading a time window failed; the window's data must be treated as unavailable
    #[error("could not read timeseries data: {0}")]
    Query(String),

    #[error("could not verify or evolve the metrics table schema: {0}")]
    SchemaEvolution(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("metrics store is closed")]
    Closed,
}

impl MetricsDbError {
    /// Whether wiping and reinitializing the store is the way out of this error
    pub fn needs_repair(&self) -> bool {
        matches!(
            self,
            MetricsDbError::Corrupted(_) | MetricsDbError::SchemaEvolution(_)
        )
    }
}

/// Classification of a failure reported by the storage engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageFault {
    Corrupted(String),
    Io(String),
}

impl StorageFault {
    pub fn is_corruption(&self) -> bool {
        matches!(self, StorageFault::Corrupted(_))
    }
}

impl From<redb::Error> for StorageFault {
    fn from(err: redb::Error) -> Self {
        match err {
            redb::Error::Corrupted(reason) => StorageFault::Corrupted(reason),
            redb::Error::Io(e) if e.kind() == io::ErrorKind::InvalidData => {
                StorageFault::Corrupted(e.to_string())
            }
            other => StorageFault::Io(other.to_string()),
        }
    }
}

impl From<StorageFault> for MetricsDbError {
    fn from(fault: StorageFault) -> Self {
        match fault {
            StorageFault::Corrupted(reason) => MetricsDbError::Corrupted(reason),
            StorageFault::Io(reason) => MetricsDbError::Io(reason),
        }
    }
}

/// Classify any redb error into a store error
pub(crate) fn storage<E: Into<redb::Error>>(err: E) -> MetricsDbError {
    StorageFault::from(err.into()).into()
}

/// Classify a failure while reading a window; reads never trigger repair
pub(crate) fn query<E: Into<redb::Error>>(err: E) -> MetricsDbError {
    MetricsDbError::Query(err.into().to_string())
}

impl From<io::Error> for MetricsDbError {
    fn from(err: io::Error) -> Self {
        MetricsDbError::Io(err.to_string())
    }
}
