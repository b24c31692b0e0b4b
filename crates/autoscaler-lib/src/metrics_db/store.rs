//! redb-backed persistence of node metric snapshots
//!
//! Snapshots are appended to one table per UTC day, keyed by
//! `(timestamp millis, row id)`. Every `add` is a single write transaction
//! and every query reads from one read transaction, so readers see a batch
//! either completely or not at all. Day tables are what retention drops.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

#[cfg(test)]
use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, TableHandle, UntypedTableHandle,
};
use tracing::{debug, info, warn};

use super::admission::{admit, Admission};
use super::error::{query, storage, MetricsDbError, MetricsDbResult, StorageFault};
use super::partition::{select_for_removal, Partition};
use super::schema::{Schema, StoredRow};
use super::{saturating_before, MetricsDb};
use crate::clock::Clock;
use crate::models::{HostSnapshot, MetricSnapshot, NodeTimeseries};

/// Directory under the data dir holding the metrics table
const TABLE_DIR: &str = "metrics";
const DB_FILE: &str = "metrics.redb";

/// Persisted column list
const SCHEMA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("schema");
const SCHEMA_KEY: &str = "columns";

/// Row id allocation
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");
const NEXT_ROW_ID: &str = "next_row_id";

/// `(at epoch millis, row id)`
type RowKey = (i64, u64);

fn partition_table(name: &str) -> TableDefinition<'_, RowKey, &'static [u8]> {
    TableDefinition::new(name)
}

fn partitions_of(tables: impl Iterator<Item = UntypedTableHandle>) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = tables
        .filter_map(|table| Partition::from_table_name(table.name()))
        .collect();
    partitions.sort();
    partitions
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Result of one `add` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Rows committed
    pub written: usize,
    /// Rows committed with their timestamp moved forward to the watermark
    pub coerced: usize,
    /// Snapshots dropped for being too old or having unstorable readings
    pub dropped: usize,
    /// Whether the store was wiped and reinitialized to get the batch in
    pub repaired: bool,
}

/// An open database together with the column layout it was opened with
struct Engine {
    db: Database,
    schema: Schema,
}

/// Durable, day-partitioned store of node metric snapshots
///
/// One writer at a time is expected to call [`MetricsStore::add`]; queries and
/// gc may run concurrently with it.
pub struct MetricsStore {
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
    engine: RwLock<Option<Arc<Engine>>>,
    /// Highest timestamp committed, epoch millis. Held for the whole of `add`.
    watermark: Mutex<i64>,
    #[cfg(test)]
    injected_faults: Mutex<VecDeque<StorageFault>>,
}

impl MetricsStore {
    /// Open (or create) the store under `data_dir`
    ///
    /// A store that cannot be opened because it is corrupt, or whose schema
    /// cannot be verified, is wiped and created empty.
    pub fn open(data_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> MetricsDbResult<Self> {
        let store = Self {
            data_dir: data_dir.into(),
            clock,
            engine: RwLock::new(None),
            watermark: Mutex::new(0),
            #[cfg(test)]
            injected_faults: Mutex::new(VecDeque::new()),
        };

        let (engine, watermark) = match store.initialize() {
            Ok(opened) => opened,
            Err(e) if e.needs_repair() => {
                warn!(
                    error = %e,
                    data_dir = %store.data_dir.display(),
                    "Metrics store could not be opened, wiping data and starting over"
                );
                store.wipe()?;
                store.initialize()?
            }
            Err(e) => return Err(e),
        };

        *lock(&store.watermark) = watermark;
        *store.engine.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(engine));

        info!(
            data_dir = %store.data_dir.display(),
            watermark = *lock(&store.watermark),
            "Metrics store opened"
        );
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn table_dir(&self) -> PathBuf {
        self.data_dir.join(TABLE_DIR)
    }

    /// Highest timestamp committed by this store
    pub fn watermark(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(*lock(&self.watermark)).unwrap_or_default()
    }

    /// Create the table directory, open the database and bring its schema up to date
    ///
    /// Returns the engine and the timestamp of the newest row already stored.
    fn initialize(&self) -> MetricsDbResult<(Engine, i64)> {
        let table_dir = self.table_dir();
        fs::create_dir_all(&table_dir)?;

        let db = Database::create(table_dir.join(DB_FILE)).map_err(storage)?;
        let schema = ensure_schema(&db)?;
        let engine = Engine { db, schema };
        let latest = latest_timestamp(&engine)?;
        Ok((engine, latest))
    }

    /// Remove everything this store has persisted
    fn wipe(&self) -> MetricsDbResult<()> {
        let table_dir = self.table_dir();
        if table_dir.exists() {
            fs::remove_dir_all(&table_dir)?;
        }
        Ok(())
    }

    fn engine(&self) -> MetricsDbResult<Arc<Engine>> {
        self.engine
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(MetricsDbError::Closed)
    }

    /// Drop the open database, wipe the data and start over with an empty store
    fn repair(&self, reason: &MetricsDbError) -> MetricsDbResult<Arc<Engine>> {
        warn!(
            error = %reason,
            data_dir = %self.data_dir.display(),
            "Metrics store seems corrupted, wiping data and starting over"
        );
        let mut slot = self.engine.write().unwrap_or_else(|e| e.into_inner());
        slot.take();
        self.wipe()?;
        let (engine, _) = self.initialize()?;
        let engine = Arc::new(engine);
        *slot = Some(engine.clone());
        Ok(engine)
    }

    /// Append a batch of snapshots
    ///
    /// Each snapshot is admitted against the watermark: at or after it is
    /// kept as is, up to one minute before it is stored at the watermark,
    /// anything older is dropped. Snapshots with a negative, non-finite or
    /// out-of-range reading are dropped too. Accepted rows commit atomically. If the
    /// commit hits corruption the store is wiped and the batch retried once.
    pub fn add(&self, batch: &[HostSnapshot]) -> MetricsDbResult<AddOutcome> {
        let mut watermark = lock(&self.watermark);

        let admission = admit(batch, *watermark);
        let first_attempt = {
            let engine = self.engine()?;
            self.commit(&engine, &admission)
        };
        let (admission, repaired) = match first_attempt {
            Ok(()) => (admission, false),
            Err(e) if e.needs_repair() => {
                *watermark = 0;
                let engine = self.repair(&e)?;
                let admission = admit(batch, 0);
                self.commit(&engine, &admission)?;
                (admission, true)
            }
            Err(e) => return Err(e),
        };

        *watermark = admission.watermark;
        let outcome = AddOutcome {
            written: admission.rows.len(),
            coerced: admission.coerced,
            dropped: admission.dropped,
            repaired,
        };
        if outcome.dropped > 0 {
            debug!(dropped = outcome.dropped, "Ignored late or unstorable snapshots");
        }
        Ok(outcome)
    }

    fn commit(&self, engine: &Engine, admission: &Admission<'_>) -> MetricsDbResult<()> {
        if admission.rows.is_empty() {
            return Ok(());
        }

        if let Some(fault) = self.next_injected_fault() {
            return Err(fault.into());
        }

        let mut by_partition: BTreeMap<Partition, Vec<(i64, &HostSnapshot)>> = BTreeMap::new();
        for &(at, entry) in &admission.rows {
            let at_time = DateTime::from_timestamp_millis(at).ok_or_else(|| {
                MetricsDbError::Serialization(format!("timestamp {at} out of range"))
            })?;
            by_partition
                .entry(Partition::containing(at_time))
                .or_default()
                .push((at, entry));
        }

        let txn = engine.db.begin_write().map_err(storage)?;
        {
            let mut counters = txn.open_table(COUNTERS_TABLE).map_err(storage)?;
            let mut next_id = counters
                .get(NEXT_ROW_ID)
                .map_err(storage)?
                .map(|id| id.value())
                .unwrap_or(0);

            for (partition, rows) in &by_partition {
                let name = partition.table_name();
                let mut table = txn.open_table(partition_table(&name)).map_err(storage)?;
                for (at, entry) in rows {
                    let row = StoredRow::new(&entry.hostname, &entry.snapshot);
                    let document = serde_json::to_vec(&row)
                        .map_err(|e| MetricsDbError::Serialization(e.to_string()))?;
                    table
                        .insert((*at, next_id), document.as_slice())
                        .map_err(storage)?;
                    next_id += 1;
                }
            }
            counters.insert(NEXT_ROW_ID, next_id).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;
        Ok(())
    }

    /// Read the snapshots of the given hosts within `[now - period, now)`
    ///
    /// Hosts without any snapshot in the window are left out of the result.
    pub fn get_node_timeseries(
        &self,
        period: Duration,
        hostnames: &[String],
    ) -> MetricsDbResult<Vec<NodeTimeseries>> {
        let engine = self.engine()?;
        if period <= Duration::zero() {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let from = saturating_before(now, period);
        let wanted: HashSet<&str> = hostnames.iter().map(String::as_str).collect();
        let range = (from.timestamp_millis(), 0)..(now.timestamp_millis(), 0);

        let txn = engine.db.begin_read().map_err(query)?;
        let partitions = partitions_of(txn.list_tables().map_err(query)?);

        let mut series: BTreeMap<String, Vec<MetricSnapshot>> = BTreeMap::new();
        for partition in partitions.iter().filter(|p| p.overlaps(from, now)) {
            let name = partition.table_name();
            let table = txn.open_table(partition_table(&name)).map_err(query)?;
            for entry in table.range(range.clone()).map_err(query)? {
                let (key, document) = entry.map_err(query)?;
                let (at, _) = key.value();
                let row = engine
                    .schema
                    .decode(document.value())
                    .map_err(|e| MetricsDbError::Query(format!("undecodable row in {name}: {e}")))?;
                if !wanted.contains(row.hostname.as_str()) {
                    continue;
                }
                let at = DateTime::from_timestamp_millis(at).ok_or_else(|| {
                    MetricsDbError::Query(format!("timestamp {at} out of range in {name}"))
                })?;
                let (hostname, snapshot) = row.into_snapshot(at);
                series.entry(hostname).or_default().push(snapshot);
            }
        }

        Ok(series
            .into_iter()
            .map(|(hostname, snapshots)| NodeTimeseries::new(hostname, snapshots))
            .collect())
    }

    /// Drop the day partitions lying entirely before `now - retention_horizon`
    ///
    /// The newest partition is always kept. Failures are logged and left for
    /// the next call. Returns the number of partitions removed.
    pub fn gc(&self, retention_horizon: Duration) -> usize {
        match self.try_gc(retention_horizon) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(
                    error = %e,
                    data_dir = %self.data_dir.display(),
                    "Failed to gc old metrics data"
                );
                0
            }
        }
    }

    pub fn try_gc(&self, retention_horizon: Duration) -> MetricsDbResult<usize> {
        let engine = self.engine()?;
        let cutoff = saturating_before(self.clock.now(), retention_horizon);

        let txn = engine.db.begin_write().map_err(storage)?;
        let partitions = partitions_of(txn.list_tables().map_err(storage)?);
        let removable = select_for_removal(&partitions, cutoff);
        if removable.is_empty() {
            txn.abort().map_err(storage)?;
            return Ok(0);
        }

        for partition in &removable {
            let name = partition.table_name();
            txn.delete_table(partition_table(&name)).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;

        info!(
            removed = removable.len(),
            oldest_kept = %partitions[removable.len()],
            cutoff = %cutoff.to_rfc3339(),
            "Removed old metrics partitions"
        );
        Ok(removable.len())
    }

    /// Day partitions currently stored, oldest first
    pub fn partitions(&self) -> MetricsDbResult<Vec<Partition>> {
        let engine = self.engine()?;
        let txn = engine.db.begin_read().map_err(query)?;
        let partitions = partitions_of(txn.list_tables().map_err(query)?);
        Ok(partitions)
    }

    /// Release the database; later calls fail with [`MetricsDbError::Closed`]
    pub fn close(&self) {
        let closed = self
            .engine
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if closed.is_some() {
            debug!(data_dir = %self.data_dir.display(), "Metrics store closed");
        }
    }

    /// Make the next commits fail with the given faults, in order
    #[cfg(test)]
    pub(crate) fn inject_commit_faults(&self, faults: impl IntoIterator<Item = StorageFault>) {
        lock(&self.injected_faults).extend(faults);
    }

    #[cfg(test)]
    fn next_injected_fault(&self) -> Option<StorageFault> {
        lock(&self.injected_faults).pop_front()
    }

    #[cfg(not(test))]
    fn next_injected_fault(&self) -> Option<StorageFault> {
        None
    }
}

impl MetricsDb for MetricsStore {
    fn add(&self, batch: &[HostSnapshot]) -> MetricsDbResult<AddOutcome> {
        MetricsStore::add(self, batch)
    }

    fn get_node_timeseries(
        &self,
        period: Duration,
        hostnames: &[String],
    ) -> MetricsDbResult<Vec<NodeTimeseries>> {
        MetricsStore::get_node_timeseries(self, period, hostnames)
    }

    fn gc(&self, retention_horizon: Duration) -> usize {
        MetricsStore::gc(self, retention_horizon)
    }

    fn try_gc(&self, retention_horizon: Duration) -> MetricsDbResult<usize> {
        MetricsStore::try_gc(self, retention_horizon)
    }

    fn partitions(&self) -> MetricsDbResult<Vec<Partition>> {
        MetricsStore::partitions(self)
    }

    fn watermark(&self) -> DateTime<Utc> {
        MetricsStore::watermark(self)
    }

    fn close(&self) {
        MetricsStore::close(self)
    }
}

/// Write the current schema to a new store, or add missing columns to an existing one
fn ensure_schema(db: &Database) -> MetricsDbResult<Schema> {
    let target = Schema::current();
    let txn = db.begin_write().map_err(storage)?;
    let schema = {
        let mut table = txn.open_table(SCHEMA_TABLE).map_err(storage)?;
        let existing = table
            .get(SCHEMA_KEY)
            .map_err(storage)?
            .map(|document| document.value().to_vec());

        let (schema, changed) = match existing {
            None => {
                info!("Creating metrics table");
                (target, true)
            }
            Some(document) => {
                let mut schema: Schema = serde_json::from_slice(&document)
                    .map_err(|e| MetricsDbError::SchemaEvolution(e.to_string()))?;
                let added = schema.evolve(&target);
                if !added.is_empty() {
                    info!(columns = ?added, "Added missing columns to metrics table");
                }
                let changed = !added.is_empty();
                (schema, changed)
            }
        };

        if changed {
            let document = serde_json::to_vec(&schema)
                .map_err(|e| MetricsDbError::SchemaEvolution(e.to_string()))?;
            table
                .insert(SCHEMA_KEY, document.as_slice())
                .map_err(storage)?;
        }
        txn.open_table(COUNTERS_TABLE).map_err(storage)?;
        schema
    };
    txn.commit().map_err(storage)?;
    Ok(schema)
}

/// Timestamp of the newest committed row, 0 for an empty store
fn latest_timestamp(engine: &Engine) -> MetricsDbResult<i64> {
    let txn = engine.db.begin_read().map_err(storage)?;
    let partitions = partitions_of(txn.list_tables().map_err(storage)?);
    for partition in partitions.iter().rev() {
        let name = partition.table_name();
        let table = txn.open_table(partition_table(&name)).map_err(storage)?;
        if let Some((key, _)) = table.last().map_err(storage)? {
            return Ok(key.value().0);
        };
    }
    Ok(0)
}
