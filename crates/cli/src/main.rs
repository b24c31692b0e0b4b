//! Autoscaler operator CLI
//!
//! Works directly on a node metrics store directory: inspect stored
//! timeseries, ingest batches, run retention, and compute resource targets
//! from aggregated load.

mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::Duration;
use clap::{Parser, Subcommand};
use commands::{parse_period, store, target, timeseries};
use std::path::PathBuf;

/// Autoscaler operator CLI
#[derive(Parser)]
#[command(name = "autoscalectl")]
#[command(author, version, about = "Inspect node metrics stores and compute resource targets", long_about = None)]
pub struct Cli {
    /// Metrics store directory (falls back to the config file, then data/autoscaling)
    #[arg(long, global = true, env = "AUTOSCALER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show stored snapshots of some hosts
    Timeseries {
        /// Hostnames to read
        #[arg(long, short = 'H', required = true, value_delimiter = ',')]
        hosts: Vec<String>,

        /// How far back to read (e.g. 30m, 24h, 7d)
        #[arg(long, default_value = "1h", value_parser = parse_period)]
        period: Duration,
    },

    /// Append a JSON batch of {hostname, snapshot} entries
    Ingest {
        /// Batch file
        file: PathBuf,
    },

    /// Remove partitions older than the retention horizon
    Gc {
        /// Longest window scaling decisions look back over; one extra day is kept
        #[arg(long, default_value = "24h", value_parser = parse_period)]
        max_scaling_window: Duration,
    },

    /// Show partitions and watermark of the store
    Status,

    /// Compute the ideal per-node resources of a cluster
    Target {
        /// JSON file with cluster load, current allocation and traffic status
        #[arg(long, short)]
        input: PathBuf,

        /// JSON file overriding scaling policy constants
        #[arg(long)]
        policy: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Timeseries { hosts, period } => {
            let data_dir = config::resolve_data_dir(cli.data_dir)?;
            timeseries::show_timeseries(&data_dir, &hosts, period, cli.format)?;
        }
        Commands::Ingest { file } => {
            let data_dir = config::resolve_data_dir(cli.data_dir)?;
            store::ingest(&data_dir, &file, cli.format)?;
        }
        Commands::Gc { max_scaling_window } => {
            let data_dir = config::resolve_data_dir(cli.data_dir)?;
            store::gc(&data_dir, max_scaling_window, cli.format)?;
        }
        Commands::Status => {
            let data_dir = config::resolve_data_dir(cli.data_dir)?;
            store::status(&data_dir, cli.format)?;
        }
        Commands::Target { input, policy } => {
            target::compute_target(&input, policy.as_deref(), cli.format)?;
        }
    }

    Ok(())
}
