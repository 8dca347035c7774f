//! Cluster targets: the destinations that receive workload replicas.

use serde::{Deserialize, Serialize};

use crate::Labels;
use crate::error::ModelResult;
use crate::quantity::{ResourceAmounts, ResourceList, parse_resources};

/// Well-known topology keys resolved from [`Location`] when the target has
/// no label of that name.
pub const REGION_KEY: &str = "topology.kubernetes.io/region";
pub const ZONE_KEY: &str = "topology.kubernetes.io/zone";
pub const PROVIDER_KEY: &str = "canopy.dev/provider";
pub const CLUSTER_KEY: &str = "canopy.dev/cluster";

/// Physical location of a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub region: Option<String>,
    pub zone: Option<String>,
    pub provider: Option<String>,
}

impl Location {
    pub fn new(region: &str, zone: &str) -> Self {
        Self {
            region: Some(region.to_string()),
            zone: Some(zone.to_string()),
            provider: None,
        }
    }
}

/// Effect of a taint on workloads that do not tolerate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// Exclusion marker on a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

impl Taint {
    pub fn new(key: &str, effect: TaintEffect) -> Self {
        Self {
            key: key.to_string(),
            value: None,
            effect,
        }
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }
}

/// A workload already placed on a target.
///
/// Used for pod affinity / anti-affinity and for preemption planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningWorkload {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    /// Higher value = more important.
    #[serde(default)]
    pub priority: i32,
    pub replicas: u32,
    /// Requests per replica.
    #[serde(default)]
    pub requests: ResourceList,
}

/// A destination capable of hosting workload replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTarget {
    pub name: String,
    /// Path of the owning workspace.
    pub workspace: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub capacity: ResourceList,
    #[serde(default)]
    pub allocated: ResourceList,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub running: Vec<RunningWorkload>,
    #[serde(default)]
    pub ready: bool,
}

impl ClusterTarget {
    /// Create a ready target with no capacity declared.
    pub fn new(name: &str, workspace: &str) -> Self {
        Self {
            name: name.to_string(),
            workspace: workspace.to_string(),
            location: None,
            capacity: ResourceList::new(),
            allocated: ResourceList::new(),
            labels: Labels::new(),
            annotations: Labels::new(),
            taints: Vec::new(),
            running: Vec::new(),
            ready: true,
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_capacity(mut self, resource: &str, quantity: &str) -> Self {
        self.capacity.insert(resource.to_string(), quantity.to_string());
        self
    }

    pub fn with_allocated(mut self, resource: &str, quantity: &str) -> Self {
        self.allocated.insert(resource.to_string(), quantity.to_string());
        self
    }

    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.taints.push(taint);
        self
    }

    pub fn with_running(mut self, workload: RunningWorkload) -> Self {
        self.running.push(workload);
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Unique key across workspaces: `{workspace}/{name}`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.workspace, self.name)
    }

    /// Resolve a topology key. Labels win; well-known keys fall back to
    /// the location, and the cluster key to the target name.
    pub fn topology_value(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.labels.get(key) {
            return Some(v.as_str());
        }
        let location = self.location.as_ref();
        match key {
            REGION_KEY | "region" => location.and_then(|l| l.region.as_deref()),
            ZONE_KEY | "zone" => location.and_then(|l| l.zone.as_deref()),
            PROVIDER_KEY | "provider" => location.and_then(|l| l.provider.as_deref()),
            CLUSTER_KEY | "cluster" => Some(self.name.as_str()),
            _ => None,
        }
    }

    /// Free resources per declared capacity dimension: `capacity - allocated`,
    /// floored at zero.
    pub fn available(&self) -> ModelResult<ResourceAmounts> {
        let capacity = parse_resources(&self.capacity)?;
        let allocated = parse_resources(&self.allocated)?;
        Ok(capacity
            .into_iter()
            .map(|(name, cap)| {
                let used = allocated.get(&name).copied().unwrap_or(0.0);
                (name, (cap - used).max(0.0))
            })
            .collect())
    }

    /// Fraction of capacity in use for one dimension, if declared.
    pub fn utilization(&self, resource: &str) -> ModelResult<Option<f64>> {
        let capacity = parse_resources(&self.capacity)?;
        let allocated = parse_resources(&self.allocated)?;
        Ok(capacity.get(resource).filter(|c| **c > 0.0).map(|cap| {
            (allocated.get(resource).copied().unwrap_or(0.0) / cap).min(1.0)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_includes_workspace() {
        let t = ClusterTarget::new("east-1", "root:org");
        assert_eq!(t.key(), "root:org/east-1");
    }

    #[test]
    fn topology_prefers_labels_then_location() {
        let t = ClusterTarget::new("c1", "root")
            .with_location(Location::new("us-east", "us-east-1a"))
            .with_label("zone", "override");

        assert_eq!(t.topology_value("zone"), Some("override"));
        assert_eq!(t.topology_value(REGION_KEY), Some("us-east"));
        assert_eq!(t.topology_value(ZONE_KEY), Some("us-east-1a"));
        assert_eq!(t.topology_value("cluster"), Some("c1"));
        assert_eq!(t.topology_value("rack"), None);
    }

    #[test]
    fn available_subtracts_allocation() {
        let t = ClusterTarget::new("c1", "root")
            .with_capacity("cpu", "8")
            .with_capacity("memory", "16Gi")
            .with_allocated("cpu", "6500m")
            .with_allocated("memory", "20Gi");

        let free = t.available().unwrap();
        assert_eq!(free["cpu"], 1.5);
        assert_eq!(free["memory"], 0.0);
    }

    #[test]
    fn utilization_is_bounded() {
        let t = ClusterTarget::new("c1", "root")
            .with_capacity("cpu", "4")
            .with_allocated("cpu", "1");
        assert_eq!(t.utilization("cpu").unwrap(), Some(0.25));
        assert_eq!(t.utilization("gpu").unwrap(), None);
    }

    #[test]
    fn malformed_capacity_is_an_error() {
        let t = ClusterTarget::new("c1", "root").with_capacity("cpu", "many");
        assert!(t.available().is_err());
    }
}
