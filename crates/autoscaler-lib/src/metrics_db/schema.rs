//! Column layout of the metrics table
//!
//! Every row is stored as a JSON document of its non-key columns. The
//! column list itself is persisted next to the data so that a store written
//! by an older layout can be opened: columns it lacks are added with their
//! default and filled in when old rows are decoded. Columns are never
//! renamed or removed.

use crate::models::MetricSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The timestamp column, stored in the row key rather than the document
pub const KEY_COLUMN: &str = "at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Timestamp,
    Float,
    Long,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(default)]
    pub default: Value,
}

impl Column {
    fn new(name: &str, kind: ColumnType) -> Self {
        let default = match kind {
            ColumnType::String => Value::from(""),
            ColumnType::Timestamp | ColumnType::Long => Value::from(0i64),
            ColumnType::Float => Value::from(0.0f32),
            ColumnType::Boolean => Value::from(false),
        };
        Self {
            name: name.to_string(),
            kind,
            default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// The layout this version of the store writes
    pub fn current() -> Self {
        use ColumnType::*;
        Self {
            columns: vec![
                Column::new("hostname", String),
                Column::new(KEY_COLUMN, Timestamp),
                Column::new("cpu_util", Float),
                Column::new("mem_total_util", Float),
                Column::new("disk_util", Float),
                Column::new("application_generation", Long),
                Column::new("inService", Boolean),
                Column::new("stable", Boolean),
                Column::new("queries_rate", Float),
            ],
        }
    }

    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Appends every column of `target` this schema lacks, returning the names added
    pub fn evolve(&mut self, target: &Schema) -> Vec<String> {
        let mut added = Vec::new();
        for column in &target.columns {
            if !self.has_column(&column.name) {
                self.columns.push(column.clone());
                added.push(column.name.clone());
            }
        }
        added
    }

    /// Decodes a stored row document, filling absent columns with their defaults
    pub fn decode(&self, document: &[u8]) -> Result<StoredRow, serde_json::Error> {
        let mut fields: Map<String, Value> = serde_json::from_slice(document)?;
        for column in &self.columns {
            if column.name != KEY_COLUMN && !fields.contains_key(&column.name) {
                fields.insert(column.name.clone(), column.default.clone());
            }
        }
        serde_json::from_value(Value::Object(fields))
    }
}

/// One row of the metrics table, without its key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub hostname: String,
    pub cpu_util: f32,
    pub mem_total_util: f32,
    pub disk_util: f32,
    pub application_generation: i64,
    #[serde(rename = "inService")]
    pub in_service: bool,
    pub stable: bool,
    pub queries_rate: f32,
}

impl StoredRow {
    pub fn new(hostname: &str, snapshot: &MetricSnapshot) -> Self {
        Self {
            hostname: hostname.to_string(),
            cpu_util: snapshot.cpu as f32,
            mem_total_util: snapshot.memory as f32,
            disk_util: snapshot.disk as f32,
            application_generation: snapshot.generation,
            in_service: snapshot.in_service,
            stable: snapshot.stable,
            queries_rate: snapshot.query_rate as f32,
        }
    }

    pub fn into_snapshot(self, at: DateTime<Utc>) -> (String, MetricSnapshot) {
        let snapshot = MetricSnapshot {
            at,
            cpu: f64::from(self.cpu_util),
            memory: f64::from(self.mem_total_util),
            disk: f64::from(self.disk_util),
            generation: self.application_generation,
            in_service: self.in_service,
            stable: self.stable,
            query_rate: f64::from(self.queries_rate),
        };
        (self.hostname, snapshot)
    }
}
