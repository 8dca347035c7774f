//! Read-only workspace and cluster inventory.

use async_trait::async_trait;
use canopy_types::{ClusterTarget, WorkspaceInfo};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("inventory backend error: {0}")]
    Backend(String),
}

impl InventoryError {
    /// Not-found and forbidden answers read as an empty result.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Forbidden(_))
    }
}

/// Source of workspace metadata and registered cluster targets. The engine
/// never mutates it.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn get_workspace(&self, path: &str) -> Result<WorkspaceInfo, InventoryError>;

    /// Direct children of a workspace.
    async fn list_children(&self, path: &str) -> Result<Vec<WorkspaceInfo>, InventoryError>;

    /// Cluster targets registered in a workspace.
    async fn list_clusters(&self, workspace: &str) -> Result<Vec<ClusterTarget>, InventoryError>;
}
