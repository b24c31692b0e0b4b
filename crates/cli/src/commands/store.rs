//! Store maintenance commands

use anyhow::{Context, Result};
use autoscaler_lib::metrics_db::retention_horizon;
use autoscaler_lib::models::HostSnapshot;
use chrono::Duration;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

use super::open_store;
use crate::output::{format_timestamp, print_info, print_json, print_success, print_warning, OutputFormat};

#[derive(Serialize)]
struct IngestReport {
    written: usize,
    coerced: usize,
    dropped: usize,
    repaired: bool,
}

/// Append a JSON batch file of `{hostname, snapshot}` entries to the store
pub fn ingest(data_dir: &Path, file: &Path, format: OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read batch file {}", file.display()))?;
    let batch: Vec<HostSnapshot> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse batch file {}", file.display()))?;

    let store = open_store(data_dir)?;
    let outcome = store.add(&batch)?;
    store.close();

    let report = IngestReport {
        written: outcome.written,
        coerced: outcome.coerced,
        dropped: outcome.dropped,
        repaired: outcome.repaired,
    };
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_success(&format!("Stored {} snapshots", report.written));
            if report.coerced > 0 {
                print_info(&format!(
                    "{} late snapshots were stored at the watermark",
                    report.coerced
                ));
            }
            if report.dropped > 0 {
                print_warning(&format!(
                    "{} snapshots were too late or had unstorable readings and were dropped",
                    report.dropped
                ));
            }
            if report.repaired {
                print_warning("The store was corrupted and has been wiped");
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct GcReport {
    removed: usize,
    partitions: Vec<String>,
}

/// Drop partitions no longer needed for the given maximum scaling window
pub fn gc(data_dir: &Path, max_scaling_window: Duration, format: OutputFormat) -> Result<()> {
    let store = open_store(data_dir)?;
    let removed = store
        .try_gc(retention_horizon(max_scaling_window))
        .context("Failed to remove old partitions")?;
    let partitions = store.partitions()?;
    store.close();

    let report = GcReport {
        removed,
        partitions: partitions.iter().map(ToString::to_string).collect(),
    };
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if removed == 0 {
                print_info("Nothing to remove");
            } else {
                print_success(&format!("Removed {} partitions", removed));
            }
            println!("Remaining: {}", report.partitions.join(", ").cyan());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StoreStatus {
    data_dir: String,
    watermark: Option<String>,
    partitions: Vec<String>,
}

/// Show the partitions and watermark of the store
pub fn status(data_dir: &Path, format: OutputFormat) -> Result<()> {
    let store = open_store(data_dir)?;
    let partitions = store.partitions()?;
    let watermark = store.watermark();
    store.close();

    let status = StoreStatus {
        data_dir: data_dir.display().to_string(),
        watermark: (watermark.timestamp_millis() > 0).then(|| watermark.to_rfc3339()),
        partitions: partitions.iter().map(ToString::to_string).collect(),
    };
    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("{}", "Metrics Store".bold());
            println!("{}", "=".repeat(60));
            println!("Data dir:   {}", status.data_dir.cyan());
            match status.watermark {
                Some(_) => println!("Watermark:  {}", format_timestamp(watermark)),
                None => println!("Watermark:  {}", "empty store".yellow()),
            }
            println!("Partitions: {}", status.partitions.len());
            for partition in &status.partitions {
                println!("  {}", partition);
            }
        }
    }
    Ok(())
}
