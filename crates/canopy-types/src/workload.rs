//! The workload being placed.

use serde::{Deserialize, Serialize};

use crate::Labels;
use crate::quantity::ResourceList;

/// Default priority for workloads that don't specify one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// A workload that needs `replicas` copies placed across targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    /// Path of the workspace the workload belongs to.
    pub workspace: String,
    #[serde(default)]
    pub labels: Labels,
    pub replicas: u32,
    /// Requests per replica (`cpu = "500m"`).
    #[serde(default)]
    pub requests: ResourceList,
    /// Higher value = more important. Lower-priority placements may be
    /// preempted to make room for higher-priority ones.
    #[serde(default)]
    pub priority: i32,
}

impl Workload {
    pub fn new(name: &str, workspace: &str, replicas: u32) -> Self {
        Self {
            name: name.to_string(),
            workspace: workspace.to_string(),
            labels: Labels::new(),
            replicas,
            requests: ResourceList::new(),
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_request(mut self, resource: &str, quantity: &str) -> Self {
        self.requests.insert(resource.to_string(), quantity.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// `{workspace}/{name}`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.workspace, self.name)
    }
}
