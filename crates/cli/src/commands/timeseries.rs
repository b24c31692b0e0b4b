//! Node timeseries inspection

use anyhow::Result;
use chrono::Duration;
use colored::Colorize;
use std::path::Path;
use tabled::Tabled;

use super::open_store;
use crate::output::{color_fraction, format_timestamp, print_json, print_rows, OutputFormat};

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Host")]
    hostname: String,
    #[tabled(rename = "At (UTC)")]
    at: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Disk")]
    disk: String,
    #[tabled(rename = "Generation")]
    generation: i64,
    #[tabled(rename = "In service")]
    in_service: bool,
    #[tabled(rename = "Stable")]
    stable: bool,
    #[tabled(rename = "Queries/s")]
    query_rate: String,
}

/// Print the snapshots of the given hosts over the last `period`
pub fn show_timeseries(
    data_dir: &Path,
    hosts: &[String],
    period: Duration,
    format: OutputFormat,
) -> Result<()> {
    let store = open_store(data_dir)?;
    let series = store.get_node_timeseries(period, hosts)?;
    store.close();

    match format {
        OutputFormat::Json => print_json(&series)?,
        OutputFormat::Table => {
            println!("{}", "Node Timeseries".bold());
            println!("{}", "=".repeat(60));
            let rows: Vec<SnapshotRow> = series
                .iter()
                .flat_map(|s| {
                    s.as_slice().iter().map(move |snapshot| SnapshotRow {
                        hostname: s.hostname().to_string(),
                        at: format_timestamp(snapshot.at),
                        cpu: color_fraction(snapshot.cpu),
                        memory: color_fraction(snapshot.memory),
                        disk: color_fraction(snapshot.disk),
                        generation: snapshot.generation,
                        in_service: snapshot.in_service,
                        stable: snapshot.stable,
                        query_rate: format!("{:.1}", snapshot.query_rate),
                    })
                })
                .collect();
            let total = rows.len();
            print_rows(rows);
            println!("\nTotal: {} snapshots from {} hosts", total, series.len());
        }
    }
    Ok(())
}
