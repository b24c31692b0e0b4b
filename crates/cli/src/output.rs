//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_rows<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        print_warning("No items found");
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a load fraction as a percentage
pub fn format_fraction(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Colour a utilization fraction by how close it runs to saturation
pub fn color_fraction(value: f64) -> String {
    let formatted = format_fraction(value);
    if value >= 0.9 {
        formatted.red().to_string()
    } else if value >= 0.7 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Signed relative change from `current` to `target`
pub fn format_change(current: f64, target: f64) -> String {
    if current == 0.0 {
        return "-".to_string();
    }
    let change = (target - current) / current * 100.0;
    let formatted = format!("{:+.1}%", change);
    if change > 0.0 {
        formatted.yellow().to_string()
    } else if change < 0.0 {
        formatted.green().to_string()
    } else {
        formatted
    }
}
