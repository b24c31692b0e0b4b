//! Scenario tests for the metrics store
//!
//! These run against real redb files in temporary directories, with a
//! manual clock driving the query window and retention.

#[cfg(test)]
mod store_scenarios {
    use crate::clock::{Clock, ManualClock};
    use crate::metrics_db::schema::{Schema, StoredRow};
    use crate::metrics_db::{
        default_max_scaling_window, retention_horizon, MetricsDb, MetricsDbError, MetricsStore,
        StorageFault,
    };
    use crate::models::{HostSnapshot, MetricSnapshot, NodeTimeseries};
    use chrono::{DateTime, Duration, Utc};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DELTA: f64 = 0.000_000_1;

    fn clock() -> ManualClock {
        ManualClock::at("2020-10-01T00:00:00").unwrap()
    }

    fn open(dir: &Path, clock: &ManualClock) -> MetricsStore {
        MetricsStore::open(dir, Arc::new(clock.clone())).unwrap()
    }

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|h| h.to_string()).collect()
    }

    /// `count_per_host` samples per host, `sample_rate` apart, the first at `start`
    fn timeseries(
        count_per_host: usize,
        sample_rate: Duration,
        start: DateTime<Utc>,
        hostnames: &[&str],
    ) -> Vec<HostSnapshot> {
        let mut batch = Vec::new();
        for i in 1..=count_per_host {
            let at = start + sample_rate * (i as i32 - 1);
            for host in hostnames {
                batch.push(HostSnapshot::new(
                    *host,
                    MetricSnapshot {
                        at,
                        cpu: i as f64 * 0.1,
                        memory: i as f64 * 0.2,
                        disk: i as f64 * 0.4,
                        generation: (i % 100) as i64,
                        in_service: true,
                        stable: true,
                        query_rate: 30.0,
                    },
                ));
            }
        }
        batch
    }

    /// `count_per_host` samples per host, all at the same instant
    fn timeseries_at(count_per_host: usize, at: DateTime<Utc>, hostnames: &[&str]) -> Vec<HostSnapshot> {
        let mut batch = Vec::new();
        for i in 1..=count_per_host {
            for host in hostnames {
                batch.push(HostSnapshot::new(
                    *host,
                    MetricSnapshot {
                        at,
                        cpu: i as f64 * 0.1,
                        memory: i as f64 * 0.2,
                        disk: i as f64 * 0.4,
                        generation: (i % 100) as i64,
                        in_service: true,
                        stable: false,
                        query_rate: 0.0,
                    },
                ));
            }
        }
        batch
    }

    fn size_of(series: &[NodeTimeseries], hostname: &str) -> usize {
        series
            .iter()
            .find(|s| s.hostname() == hostname)
            .map(NodeTimeseries::size)
            .unwrap_or(0)
    }

    #[test]
    fn test_read_write() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);
        let start_time = clock.now();

        store
            .add(&timeseries(
                1000,
                Duration::seconds(1),
                start_time + Duration::seconds(1),
                &["host1", "host2", "host3"],
            ))
            .unwrap();

        // Only the first sample lies in [T0, T0+2s)
        clock.set(start_time + Duration::seconds(2));
        let series = store
            .get_node_timeseries(Duration::seconds(2), &hosts(&["host1"]))
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].hostname(), "host1");
        assert_eq!(series[0].size(), 1);
        let snapshot = &series[0].as_slice()[0];
        assert_eq!(snapshot.at, start_time + Duration::seconds(1));
        assert!((snapshot.cpu - 0.1).abs() < DELTA);
        assert!((snapshot.memory - 0.2).abs() < DELTA);
        assert!((snapshot.disk - 0.4).abs() < DELTA);
        assert_eq!(snapshot.generation, 1);
        assert!((snapshot.query_rate - 30.0).abs() < DELTA);

        // Everything written, for two hosts
        clock.set(start_time + Duration::seconds(1001));
        let series = store
            .get_node_timeseries(Duration::seconds(1001), &hosts(&["host2", "host3"]))
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].hostname(), "host2");
        assert_eq!(series[1].hostname(), "host3");
        assert_eq!(series[0].size(), 1000);
        assert_eq!(series[1].size(), 1000);
        let times: Vec<_> = series[0].as_slice().iter().map(|s| s.at).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));

        // A short interval from three hosts
        let series = store
            .get_node_timeseries(Duration::seconds(3), &hosts(&["host1", "host2", "host3"]))
            .unwrap();
        assert_eq!(series.len(), 3);
        for s in &series {
            assert_eq!(s.size(), 3);
        }
    }

    #[test]
    fn test_write_old_data() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);
        let start_time = clock.now();
        let all = ["host1", "host2", "host3"];

        clock.advance(Duration::seconds(300));
        let written_at = clock.now();
        store.add(&timeseries_at(10, written_at, &all)).unwrap();
        clock.advance(Duration::seconds(1));

        let period = clock.now() - start_time;
        let series = store.get_node_timeseries(period, &hosts(&["host1"])).unwrap();
        assert_eq!(size_of(&series, "host1"), 10);

        let outcome = store
            .add(&timeseries_at(10, clock.now() - Duration::seconds(20), &all))
            .unwrap();
        assert_eq!(outcome.coerced, 30);
        let series = store.get_node_timeseries(period, &hosts(&["host1"])).unwrap();
        assert_eq!(size_of(&series, "host1"), 20, "Recent data is accepted");
        assert!(series[0].as_slice().iter().all(|s| s.at == written_at));

        let outcome = store
            .add(&timeseries_at(10, clock.now() - Duration::seconds(200), &all))
            .unwrap();
        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.dropped, 30);
        let series = store.get_node_timeseries(period, &hosts(&["host1"])).unwrap();
        assert_eq!(size_of(&series, "host1"), 20, "Too old data is rejected");
    }

    #[test]
    fn test_gc() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);
        let start_time = clock.now();
        let day_offset = 3;

        store
            .add(&timeseries(
                24 * 10,
                Duration::hours(1),
                start_time + Duration::hours(day_offset),
                &["host1", "host2", "host3"],
            ))
            .unwrap();
        clock.set(start_time + Duration::hours(day_offset + 24 * 10));
        let period = clock.now() - start_time;
        let host1 = hosts(&["host1"]);

        let series = store.get_node_timeseries(period, &host1).unwrap();
        assert_eq!(size_of(&series, "host1"), 24 * 10);

        let horizon = retention_horizon(default_max_scaling_window());
        assert_eq!(store.gc(horizon), 8);
        let series = store.get_node_timeseries(period, &host1).unwrap();
        assert_eq!(size_of(&series, "host1"), 48 + day_offset as usize);

        assert_eq!(store.gc(horizon), 0, "second gc is a no-op");
        let series = store.get_node_timeseries(period, &host1).unwrap();
        assert_eq!(size_of(&series, "host1"), 48 + day_offset as usize);
    }

    #[test]
    fn test_gc_keeps_last_partition_when_all_qualify() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);

        store
            .add(&timeseries(3, Duration::days(1), clock.now(), &["host1"]))
            .unwrap();
        assert_eq!(store.partitions().unwrap().len(), 3);

        clock.advance(Duration::days(60));
        assert_eq!(store.gc(Duration::days(2)), 2);

        let remaining = store.partitions().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].to_string(), "2020-10-03");
        assert_eq!(store.gc(Duration::days(2)), 0);
    }

    #[test]
    fn test_admission_is_monotonic_across_adds() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);
        let start_time = clock.now();

        for round in 0..5 {
            let at = start_time + Duration::minutes(round * 5);
            store.add(&timeseries_at(1, at, &["host1"])).unwrap();
        }
        clock.set(start_time + Duration::hours(1));

        let series = store
            .get_node_timeseries(Duration::hours(1), &hosts(&["host1"]))
            .unwrap();
        let offsets: Vec<i64> = series[0]
            .as_slice()
            .iter()
            .map(|s| (s.at - start_time).num_minutes())
            .collect();
        assert_eq!(offsets, vec![0, 5, 10, 15, 20]);
    }

    #[test]
    fn test_hosts_without_data_are_omitted() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);

        store.add(&timeseries_at(2, clock.now(), &["host1"])).unwrap();
        clock.advance(Duration::seconds(1));

        let series = store
            .get_node_timeseries(Duration::minutes(1), &hosts(&["host1", "unknown"]))
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].hostname(), "host1");

        let none = store
            .get_node_timeseries(Duration::minutes(1), &hosts(&["unknown"]))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_query_does_not_move_watermark() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);
        let at = clock.now() + Duration::minutes(10);

        store.add(&timeseries_at(1, at, &["host1"])).unwrap();
        clock.advance(Duration::hours(1));
        store
            .get_node_timeseries(Duration::hours(2), &hosts(&["host1"]))
            .unwrap();

        assert_eq!(store.watermark(), at);
    }

    #[test]
    fn test_unstorable_readings_do_not_block_queries() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);

        let mut batch = timeseries_at(1, clock.now(), &["host1", "host2", "host3"]);
        batch[1].snapshot.query_rate = 1e39;
        batch[2].snapshot.cpu = f64::NAN;
        let outcome = store.add(&batch).unwrap();
        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.dropped, 2);
        clock.advance(Duration::seconds(1));

        let series = store
            .get_node_timeseries(Duration::minutes(1), &hosts(&["host1", "host2", "host3"]))
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].hostname(), "host1");
    }

    #[test]
    fn test_window_beyond_time_range_reads_everything() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);

        store.add(&timeseries(3, Duration::days(1), clock.now(), &["host1"])).unwrap();
        clock.advance(Duration::days(5));

        let series = store
            .get_node_timeseries(Duration::MAX, &hosts(&["host1"]))
            .unwrap();
        assert_eq!(size_of(&series, "host1"), 3);
    }

    #[test]
    fn test_gc_with_horizon_beyond_time_range_removes_nothing() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);

        store.add(&timeseries(3, Duration::days(1), clock.now(), &["host1"])).unwrap();
        clock.advance(Duration::days(60));

        assert_eq!(store.gc(Duration::MAX), 0);
        assert_eq!(store.partitions().unwrap().len(), 3);
        assert_eq!(
            retention_horizon(Duration::MAX),
            Duration::MAX,
            "horizon saturates instead of overflowing"
        );
    }

    #[test]
    fn test_corruption_on_commit_wipes_and_retries_once() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);
        let start_time = clock.now();

        store.add(&timeseries_at(5, start_time, &["host1"])).unwrap();
        store.inject_commit_faults([StorageFault::Corrupted("cannot read offset".to_string())]);

        let next = start_time + Duration::seconds(1);
        let outcome = store.add(&timeseries_at(3, next, &["host2"])).unwrap();
        assert!(outcome.repaired);
        assert_eq!(outcome.written, 3);
        assert_eq!(store.watermark(), next);

        clock.advance(Duration::seconds(1));
        let series = store
            .get_node_timeseries(Duration::hours(1), &hosts(&["host1", "host2"]))
            .unwrap();
        assert_eq!(size_of(&series, "host1"), 0, "data before the repair is gone");
        assert_eq!(size_of(&series, "host2"), 3);
    }

    #[test]
    fn test_corruption_on_retry_is_fatal() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);

        store.inject_commit_faults([
            StorageFault::Corrupted("first".to_string()),
            StorageFault::Corrupted("second".to_string()),
        ]);

        let result = store.add(&timeseries_at(1, clock.now(), &["host1"]));
        assert!(matches!(result, Err(MetricsDbError::Corrupted(reason)) if reason == "second"));
    }

    #[test]
    fn test_io_failure_propagates_without_wiping() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = open(dir.path(), &clock);
        let start_time = clock.now();

        store.add(&timeseries_at(4, start_time, &["host1"])).unwrap();
        store.inject_commit_faults([StorageFault::Io("disk full".to_string())]);

        let result = store.add(&timeseries_at(1, start_time + Duration::seconds(5), &["host1"]));
        assert!(matches!(result, Err(MetricsDbError::Io(_))));

        clock.advance(Duration::minutes(1));
        let series = store
            .get_node_timeseries(Duration::hours(1), &hosts(&["host1"]))
            .unwrap();
        assert_eq!(size_of(&series, "host1"), 4);
        assert_eq!(store.watermark(), start_time, "failed batch does not move the watermark");

        // The next cycle goes through
        store
            .add(&timeseries_at(1, start_time + Duration::seconds(5), &["host1"]))
            .unwrap();
    }

    #[test]
    fn test_reopen_reads_existing_data_and_watermark() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let written_at = clock.now() + Duration::seconds(9);

        {
            let store = open(dir.path(), &clock);
            store.add(&timeseries_at(10, written_at, &["host1"])).unwrap();
            store.close();
        }

        let store = open(dir.path(), &clock);
        assert_eq!(store.watermark(), written_at);

        clock.advance(Duration::seconds(10));
        let series = store
            .get_node_timeseries(Duration::seconds(10), &hosts(&["host1"]))
            .unwrap();
        assert_eq!(size_of(&series, "host1"), 10);

        let outcome = store
            .add(&timeseries_at(1, written_at - Duration::minutes(5), &["host1"]))
            .unwrap();
        assert_eq!(outcome.dropped, 1);
    }

    #[test]
    fn test_open_over_garbage_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let table_dir = dir.path().join("metrics");
        std::fs::create_dir_all(&table_dir).unwrap();
        std::fs::write(table_dir.join("metrics.redb"), vec![0xAB; 8192]).unwrap();

        let clock = clock();
        let store = open(dir.path(), &clock);

        assert!(store.partitions().unwrap().is_empty());
        store.add(&timeseries_at(1, clock.now(), &["host1"])).unwrap();
    }

    /// Write a store the way an older layout without `queries_rate` did
    fn write_legacy_store(dir: &Path, at: DateTime<Utc>) {
        let table_dir = dir.join("metrics");
        std::fs::create_dir_all(&table_dir).unwrap();
        let db = redb::Database::create(table_dir.join("metrics.redb")).unwrap();

        let legacy = Schema::from_columns(
            Schema::current()
                .columns()
                .iter()
                .filter(|c| c.name != "queries_rate")
                .cloned()
                .collect(),
        );
        let mut row = serde_json::to_value(StoredRow::new(
            "host1",
            &timeseries_at(1, at, &["host1"])[0].snapshot,
        ))
        .unwrap();
        row.as_object_mut().unwrap().remove("queries_rate");

        let schema_table: redb::TableDefinition<&str, &[u8]> = redb::TableDefinition::new("schema");
        let day_table: redb::TableDefinition<(i64, u64), &[u8]> =
            redb::TableDefinition::new("metrics_2020-10-01");
        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(schema_table).unwrap();
            let document = serde_json::to_vec(&legacy).unwrap();
            table.insert("columns", document.as_slice()).unwrap();

            let mut table = txn.open_table(day_table).unwrap();
            let document = serde_json::to_vec(&row).unwrap();
            table
                .insert((at.timestamp_millis(), 0u64), document.as_slice())
                .unwrap();
        }
        txn.commit().unwrap();
    }

    #[test]
    fn test_open_adds_missing_columns() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let at = clock.now();
        write_legacy_store(dir.path(), at);

        let store = open(dir.path(), &clock);
        clock.advance(Duration::seconds(1));

        let series = store
            .get_node_timeseries(Duration::minutes(1), &hosts(&["host1"]))
            .unwrap();
        assert_eq!(size_of(&series, "host1"), 1, "existing rows survive evolution");
        assert_eq!(series[0].as_slice()[0].query_rate, 0.0);
        assert_eq!(store.watermark(), at);

        // New rows carry the added column
        let mut batch = timeseries_at(1, clock.now(), &["host1"]);
        batch[0].snapshot.query_rate = 42.0;
        store.add(&batch).unwrap();
        clock.advance(Duration::seconds(1));
        let series = store
            .get_node_timeseries(Duration::minutes(1), &hosts(&["host1"]))
            .unwrap();
        assert_eq!(series[0].last().unwrap().query_rate, 42.0);
    }

    #[test]
    fn test_unreadable_schema_is_repaired_on_open() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        {
            let table_dir = dir.path().join("metrics");
            std::fs::create_dir_all(&table_dir).unwrap();
            let db = redb::Database::create(table_dir.join("metrics.redb")).unwrap();
            let schema_table: redb::TableDefinition<&str, &[u8]> =
                redb::TableDefinition::new("schema");
            let txn = db.begin_write().unwrap();
            {
                let mut table = txn.open_table(schema_table).unwrap();
                table.insert("columns", b"{not a schema".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        let store = open(dir.path(), &clock);

        assert!(store.partitions().unwrap().is_empty());
        store.add(&timeseries_at(1, clock.now(), &["host1"])).unwrap();
    }

    #[test]
    fn test_undecodable_row_fails_query_without_repair() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let at = clock.now();
        {
            let store = open(dir.path(), &clock);
            store.add(&timeseries_at(1, at, &["host1"])).unwrap();
            store.close();
        }
        {
            let db = redb::Database::create(dir.path().join("metrics").join("metrics.redb")).unwrap();
            let day_table: redb::TableDefinition<(i64, u64), &[u8]> =
                redb::TableDefinition::new("metrics_2020-10-01");
            let txn = db.begin_write().unwrap();
            {
                let mut table = txn.open_table(day_table).unwrap();
                table
                    .insert((at.timestamp_millis(), 99u64), b"\xff\xfe".as_slice())
                    .unwrap();
            }
            txn.commit().unwrap();
        }

        let store = open(dir.path(), &clock);
        clock.advance(Duration::seconds(1));

        let result = store.get_node_timeseries(Duration::minutes(1), &hosts(&["host1"]));
        assert!(matches!(result, Err(MetricsDbError::Query(_))));
        assert_eq!(store.partitions().unwrap().len(), 1, "reads never wipe data");
    }

    #[test]
    fn test_readers_never_see_partial_batches() {
        const BATCH: usize = 10;
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = Arc::new(open(dir.path(), &clock));
        let start_time = clock.now();
        clock.set(start_time + Duration::days(1));

        std::thread::scope(|scope| {
            let writer = store.clone();
            scope.spawn(move || {
                for round in 0..50 {
                    let at = start_time + Duration::seconds(round);
                    writer.add(&timeseries_at(BATCH, at, &["host1"])).unwrap();
                }
            });

            for _ in 0..50 {
                let series = store
                    .get_node_timeseries(Duration::days(1), &hosts(&["host1"]))
                    .unwrap();
                assert_eq!(size_of(&series, "host1") % BATCH, 0);
            }
        });

        let series = store
            .get_node_timeseries(Duration::days(1), &hosts(&["host1"]))
            .unwrap();
        assert_eq!(size_of(&series, "host1"), 50 * BATCH);
    }

    #[test]
    fn test_store_behind_trait_object() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let db: Arc<dyn MetricsDb> = Arc::new(open(dir.path(), &clock));

        db.add(&timeseries_at(2, clock.now(), &["host1"])).unwrap();
        clock.advance(Duration::seconds(1));

        let series = db
            .get_node_timeseries(Duration::minutes(1), &hosts(&["host1"]))
            .unwrap();
        assert_eq!(size_of(&series, "host1"), 2);
        db.close();
        db.close();
    }
}
