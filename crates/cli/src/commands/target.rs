//! Resource target computation from aggregated load

use anyhow::{bail, Context, Result};
use autoscaler_lib::models::{ClusterLoad, NodeResources, Resource, ResourceTarget, TrafficStatus};
use autoscaler_lib::target::{ResourceTargetCalculator, ScalingPolicy};
use chrono::Duration;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tabled::Tabled;

use crate::output::{format_change, format_fraction, print_json, print_rows, OutputFormat};

/// Aggregated signals of one cluster, as produced by the load aggregator
#[derive(Debug, Deserialize)]
pub struct TargetInput {
    #[serde(default)]
    pub cluster: String,
    /// How long a rescale of this cluster takes to complete
    #[serde(default)]
    pub scaling_duration_minutes: i64,
    /// Missing when signal quality is too low to retarget
    pub load: Option<ClusterLoad>,
    pub current: NodeResources,
    #[serde(default)]
    pub traffic: TrafficStatus,
    /// Keep the current allocation regardless of load
    #[serde(default)]
    pub preserve: bool,
}

#[derive(Serialize)]
struct TargetReport {
    cluster: String,
    ideal_cpu_load: Option<f64>,
    target: ResourceTarget,
}

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Change")]
    change: String,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} {}", what, path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} {}", what, path.display()))
}

fn compute(calculator: &ResourceTargetCalculator, input: &TargetInput) -> Result<TargetReport> {
    if input.preserve {
        return Ok(TargetReport {
            cluster: input.cluster.clone(),
            ideal_cpu_load: None,
            target: calculator.preserve(&input.current),
        });
    }
    let Some(load) = input.load.as_ref() else {
        bail!("Input has no load; set \"preserve\": true to keep the current allocation");
    };
    if input.scaling_duration_minutes < 0 {
        bail!("scaling_duration_minutes must not be negative");
    }

    let scaling_duration = Duration::minutes(input.scaling_duration_minutes);
    Ok(TargetReport {
        cluster: input.cluster.clone(),
        ideal_cpu_load: Some(calculator.ideal_cpu_load(scaling_duration, load, &input.traffic)),
        target: calculator.ideal_load(scaling_duration, load, &input.current, &input.traffic),
    })
}

/// Compute the resource target for the cluster described in `input`
pub fn compute_target(input: &Path, policy: Option<&Path>, format: OutputFormat) -> Result<()> {
    let input: TargetInput = read_json(input, "target input")?;
    let policy = match policy {
        Some(path) => read_json::<ScalingPolicy>(path, "scaling policy")?,
        None => ScalingPolicy::default(),
    };
    let calculator = ResourceTargetCalculator::new(policy).context("Invalid scaling policy")?;
    let report = compute(&calculator, &input)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!("{}", "Resource Target".bold());
            println!("{}", "=".repeat(60));
            if !report.cluster.is_empty() {
                println!("Cluster:        {}", report.cluster.cyan());
            }
            if let Some(load) = report.ideal_cpu_load {
                println!("Ideal CPU load: {}", format_fraction(load));
            }
            println!(
                "Redundancy:     {}",
                if report.target.adjust_for_redundancy {
                    "added by the allocation optimizer"
                } else {
                    "current allocation kept"
                }
            );
            println!();

            let rows: Vec<ResourceRow> = Resource::ALL
                .iter()
                .map(|resource| {
                    let current = input.current.value_of(*resource);
                    let target = report.target.value_of(*resource);
                    ResourceRow {
                        resource: resource.to_string(),
                        current: format!("{:.2}", current),
                        target: format!("{:.2}", target),
                        change: format_change(current, target),
                    }
                })
                .collect();
            print_rows(rows);
        }
    }
    Ok(())
}
