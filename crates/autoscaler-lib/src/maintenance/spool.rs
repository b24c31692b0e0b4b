//! Spool-directory snapshot source
//!
//! The metrics-collection collaborator drops batch files into an inbox
//! directory: each `*.json` file holds an array of `{hostname, snapshot}`
//! entries. Files are consumed in name order and removed once read. A file
//! that cannot be read or decoded is renamed to `<name>.rejected` so later
//! cycles skip it.

use super::{async_trait, SnapshotSource};
use crate::models::HostSnapshot;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

const BATCH_EXTENSION: &str = "json";
const REJECTED_EXTENSION: &str = "rejected";
const PENDING_EXTENSION: &str = "tmp";

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("spool I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode spool batch: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SpoolError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        SpoolError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct SpoolSource {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl SpoolSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a batch file for a later `collect`
    ///
    /// The file is written under a temporary name and renamed into place, so
    /// a reader never sees it half written.
    pub async fn enqueue(&self, batch: &[HostSnapshot]) -> Result<PathBuf, SpoolError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SpoolError::io(&self.dir, e))?;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let stem = format!(
            "{:013}-{:06}",
            chrono::Utc::now().timestamp_millis(),
            sequence
        );
        let path = self.dir.join(&stem).with_extension(BATCH_EXTENSION);
        let pending = self.dir.join(&stem).with_extension(PENDING_EXTENSION);

        let json = serde_json::to_vec(batch)?;
        fs::write(&pending, json)
            .await
            .map_err(|e| SpoolError::io(&pending, e))?;
        fs::rename(&pending, &path)
            .await
            .map_err(|e| SpoolError::io(&path, e))?;
        Ok(path)
    }

    /// Batch files waiting to be consumed, in name order
    pub async fn pending(&self) -> Result<Vec<PathBuf>, SpoolError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SpoolError::io(&self.dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SpoolError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(BATCH_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn reject(&self, path: &Path) -> Result<(), SpoolError> {
        let mut rejected = path.as_os_str().to_owned();
        rejected.push(".");
        rejected.push(REJECTED_EXTENSION);
        fs::rename(path, &rejected)
            .await
            .map_err(|e| SpoolError::io(path, e))
    }

    /// Move a batch file that cannot be consumed out of the way
    ///
    /// If even that fails the file stays pending and is retried next cycle.
    async fn set_aside(&self, path: &Path) {
        if let Err(e) = self.reject(path).await {
            warn!(path = %path.display(), error = %e, "Failed to set aside spool batch");
        }
    }

    /// Read every pending batch file
    ///
    /// Files that cannot be read or decoded are set aside without failing the
    /// others. Consumed files are removed only after all of them were read.
    async fn drain(&self) -> Result<Vec<HostSnapshot>, SpoolError> {
        let mut batch = Vec::new();
        let mut consumed = Vec::new();
        for path in self.pending().await? {
            let data = match fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Rejecting unreadable spool batch");
                    self.set_aside(&path).await;
                    continue;
                }
            };
            match serde_json::from_slice::<Vec<HostSnapshot>>(&data) {
                Ok(entries) => {
                    debug!(path = %path.display(), entries = entries.len(), "Read spool batch");
                    batch.extend(entries);
                    consumed.push(path);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Rejecting undecodable spool batch");
                    self.set_aside(&path).await;
                }
            }
        }

        for path in consumed {
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove consumed spool batch");
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl SnapshotSource for SpoolSource {
    fn name(&self) -> &str {
        "spool"
    }

    async fn collect(&self) -> anyhow::Result<Vec<HostSnapshot>> {
        Ok(self.drain().await?)
    }
}
