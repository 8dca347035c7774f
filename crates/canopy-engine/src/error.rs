//! Error types for the placement engine.

use canopy_discovery::DiscoveryError;
use canopy_placement::PlacementError;
use canopy_scheduler::SchedulerError;
use canopy_types::{ClusterTarget, Interrupted};
use thiserror::Error;

/// A workspace whose cluster listing failed during fan-out.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkspaceFailure {
    pub workspace: String,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("cluster listing failed in all {} workspaces", .failures.len())]
    AllWorkspacesFailed { failures: Vec<WorkspaceFailure> },

    /// Fan-out stopped early. `partial` holds the clusters found so far.
    #[error("cluster search interrupted after {} clusters: {cause}", .partial.len())]
    Interrupted {
        cause: Interrupted,
        partial: Vec<ClusterTarget>,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Reason of a scheduling phase failure, if this is one.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Scheduler(e) => e.failure_reason(),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
