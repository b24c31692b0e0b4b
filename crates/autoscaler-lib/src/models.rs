//! Core data models for node autoscaling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One point-in-time measurement of a node's resource utilization and service status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub at: DateTime<Utc>,
    /// CPU utilization as a fraction of the node's allocation
    pub cpu: f64,
    /// Memory utilization as a fraction of the node's allocation
    pub memory: f64,
    /// Disk utilization as a fraction of the node's allocation
    pub disk: f64,
    /// Application config generation the node was running
    pub generation: i64,
    pub in_service: bool,
    pub stable: bool,
    /// Queries per second served by the node
    pub query_rate: f64,
}

impl fmt::Display for MetricSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: cpu {:.3}, memory {:.3}, disk {:.3}, generation {}, in service {}, stable {}, queries {:.1}/s",
            self.at.to_rfc3339(),
            self.cpu,
            self.memory,
            self.disk,
            self.generation,
            self.in_service,
            self.stable,
            self.query_rate
        )
    }
}

/// A snapshot addressed to the host it was measured on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub hostname: String,
    pub snapshot: MetricSnapshot,
}

impl HostSnapshot {
    pub fn new(hostname: impl Into<String>, snapshot: MetricSnapshot) -> Self {
        Self {
            hostname: hostname.into(),
            snapshot,
        }
    }
}

/// The snapshots of one host within a query window, ascending by time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTimeseries {
    pub hostname: String,
    snapshots: Vec<MetricSnapshot>,
}

impl NodeTimeseries {
    /// Creates a series, sorting the snapshots by time (stable for equal timestamps)
    pub fn new(hostname: impl Into<String>, mut snapshots: Vec<MetricSnapshot>) -> Self {
        snapshots.sort_by_key(|s| s.at);
        Self {
            hostname: hostname.into(),
            snapshots,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn size(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn as_slice(&self) -> &[MetricSnapshot] {
        &self.snapshots
    }

    pub fn first(&self) -> Option<&MetricSnapshot> {
        self.snapshots.first()
    }

    pub fn last(&self) -> Option<&MetricSnapshot> {
        self.snapshots.last()
    }
}

/// A resource kind a target is computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Cpu, Resource::Memory, Resource::Disk];
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cpu => write!(f, "cpu"),
            Resource::Memory => write!(f, "memory"),
            Resource::Disk => write!(f, "disk"),
        }
    }
}

/// Real resources of one node in the current allocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    pub vcpu: f64,
    pub memory_gb: f64,
    pub disk_gb: f64,
}

impl NodeResources {
    pub fn new(vcpu: f64, memory_gb: f64, disk_gb: f64) -> Self {
        Self {
            vcpu,
            memory_gb,
            disk_gb,
        }
    }

    pub fn value_of(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.vcpu,
            Resource::Memory => self.memory_gb,
            Resource::Disk => self.disk_gb,
        }
    }
}

/// Load statistics of one cluster, as produced by the load aggregator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterLoad {
    /// Average observed cpu load as a fraction of the allocated cpu
    pub average_cpu: f64,
    pub average_memory: f64,
    pub average_disk: f64,
    /// Highest observed query growth, as a fraction of current traffic per minute
    #[serde(default)]
    pub max_query_growth_rate: f64,
    /// Current query rate as a fraction of the highest rate ever observed, 0 if unknown
    #[serde(default)]
    pub current_query_fraction_of_max: f64,
}

impl ClusterLoad {
    pub fn average_load(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.average_cpu,
            Resource::Memory => self.average_memory,
            Resource::Disk => self.average_disk,
        }
    }
}

/// Share of global read traffic served by this cluster's deployment zone
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrafficStatus {
    pub current_read_share: f64,
    /// Highest share this zone could be asked to serve, 0 when no share data is recorded
    pub max_read_share: f64,
}

impl TrafficStatus {
    pub fn new(current_read_share: f64, max_read_share: f64) -> Self {
        Self {
            current_read_share,
            max_read_share,
        }
    }

    pub fn has_share_data(&self) -> bool {
        self.max_read_share != 0.0
    }
}

/// Per-node resources to aim for, in terms of the current allocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceTarget {
    pub node_cpu: f64,
    pub node_memory: f64,
    pub node_disk: f64,
    /// Whether the allocation optimizer should add redundancy on top of this target
    pub adjust_for_redundancy: bool,
}

impl ResourceTarget {
    pub fn value_of(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.node_cpu,
            Resource::Memory => self.node_memory,
            Resource::Disk => self.node_disk,
        }
    }
}

impl fmt::Display for ResourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target {}[vcpu {}, memoryGb {}, diskGb {}]",
            if self.adjust_for_redundancy {
                "(with redundancy adjustment) "
            } else {
                ""
            },
            self.node_cpu,
            self.node_memory,
            self.node_disk
        )
    }
}
