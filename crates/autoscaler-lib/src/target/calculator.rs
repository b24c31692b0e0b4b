//! ResourceTargetCalculator
//!
//! For each resource the target is the node usage divided by the ideal
//! average load of that resource:
//!
//! ```text
//! node_usage(r) = average_load(r) * current_allocation(r)
//! target(r)     = node_usage(r) / ideal_average_load(r)
//! ```
//!
//! Memory and disk use fixed ideal loads. The cpu ideal load shrinks with
//! two headroom factors: expected query growth over the scaling window, and
//! the traffic this zone would take over if a peer zone went away.

use super::policy::{PolicyError, ScalingPolicy};
use crate::models::{ClusterLoad, NodeResources, Resource, ResourceTarget, TrafficStatus};
use chrono::Duration;

#[derive(Debug, Clone, Default)]
pub struct ResourceTargetCalculator {
    policy: ScalingPolicy,
}

impl ResourceTargetCalculator {
    pub fn new(policy: ScalingPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// The per-node resources that would bring the cluster to its ideal load
    ///
    /// The result excludes redundancy; the allocation optimizer adds it back.
    pub fn ideal_load(
        &self,
        scaling_duration: Duration,
        load: &ClusterLoad,
        current: &NodeResources,
        traffic: &TrafficStatus,
    ) -> ResourceTarget {
        let target = |resource: Resource| {
            let node_usage = load.average_load(resource) * current.value_of(resource);
            node_usage / self.ideal_average_load(resource, scaling_duration, load, traffic)
        };
        ResourceTarget {
            node_cpu: target(Resource::Cpu),
            node_memory: target(Resource::Memory),
            node_disk: target(Resource::Disk),
            adjust_for_redundancy: true,
        }
    }

    /// Keep the current allocation as it is
    pub fn preserve(&self, current: &NodeResources) -> ResourceTarget {
        ResourceTarget {
            node_cpu: current.vcpu,
            node_memory: current.memory_gb,
            node_disk: current.disk_gb,
            adjust_for_redundancy: false,
        }
    }

    pub fn ideal_average_load(
        &self,
        resource: Resource,
        scaling_duration: Duration,
        load: &ClusterLoad,
        traffic: &TrafficStatus,
    ) -> f64 {
        match resource {
            Resource::Cpu => self.ideal_cpu_load(scaling_duration, load, traffic),
            Resource::Memory => self.policy.ideal_memory_load,
            Resource::Disk => self.policy.ideal_disk_load,
        }
    }

    pub fn ideal_cpu_load(
        &self,
        scaling_duration: Duration,
        load: &ClusterLoad,
        traffic: &TrafficStatus,
    ) -> f64 {
        let ideal = (1.0 / self.growth_rate_headroom(scaling_duration, load))
            * (1.0 / self.traffic_shift_headroom(traffic))
            * self.policy.ideal_cpu_load;
        ideal.max(self.policy.min_ideal_cpu_load)
    }

    /// Capacity to keep for the query growth that can happen before a rescale completes
    ///
    /// Never more than the margin above the best-ever observed peak, when a
    /// peak is known.
    pub fn growth_rate_headroom(&self, scaling_duration: Duration, load: &ClusterLoad) -> f64 {
        let growth_rate = load.max_query_growth_rate.max(0.0);
        let headroom = 1.0 + growth_rate * scaling_duration.num_minutes() as f64;
        if load.current_query_fraction_of_max > 0.0 {
            headroom.min(1.0 / load.current_query_fraction_of_max + self.policy.peak_headroom_margin)
        } else {
            headroom
        }
    }

    /// Capacity to keep for traffic shifted here from a failing peer zone
    ///
    /// Without share data this zone is assumed to serve half its fair share.
    pub fn traffic_shift_headroom(&self, traffic: &TrafficStatus) -> f64 {
        let cap = self.policy.max_traffic_shift_headroom;
        if !traffic.has_share_data() {
            return cap;
        }
        (traffic.max_read_share / traffic.current_read_share).min(cap)
    }
}
