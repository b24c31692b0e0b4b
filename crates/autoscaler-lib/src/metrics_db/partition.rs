//! Day partitions of the metrics table
//!
//! Each UTC calendar day lives in its own redb table, which is the unit
//! retention removes.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::fmt;

const TABLE_PREFIX: &str = "metrics_";
const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition {
    day: NaiveDate,
}

impl Partition {
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            day: at.date_naive(),
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        let day = name.strip_prefix(TABLE_PREFIX)?;
        NaiveDate::parse_from_str(day, DAY_FORMAT)
            .ok()
            .map(|day| Self { day })
    }

    pub fn table_name(&self) -> String {
        format!("{}{}", TABLE_PREFIX, self)
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.day.and_time(NaiveTime::default()).and_utc()
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start() + Duration::days(1)
    }

    /// Whether any instant of `[from, to)` falls in this partition
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start() < to && from < self.end()
    }

    /// Whether the whole partition is older than `cutoff`
    pub fn lies_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.end() <= cutoff
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.day.format(DAY_FORMAT))
    }
}

/// Picks the partitions retention should drop for a cutoff
///
/// Only partitions lying entirely before the cutoff qualify, and the newest
/// partition always survives.
pub fn select_for_removal(partitions: &[Partition], cutoff: DateTime<Utc>) -> Vec<Partition> {
    let newest = match partitions.iter().max() {
        Some(newest) => *newest,
        None => return Vec::new(),
    };
    let mut removable: Vec<Partition> = partitions
        .iter()
        .copied()
        .filter(|p| *p != newest && p.lies_before(cutoff))
        .collect();
    removable.sort();
    removable
}
