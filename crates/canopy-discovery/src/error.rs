//! Error types for workspace discovery.

use canopy_types::{Interrupted, ModelError, WorkspaceInfo};
use thiserror::Error;

use crate::authz::AuthzError;
use crate::inventory::InventoryError;

/// Result type alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors surfaced by discovery. Denied and missing workspaces are not
/// errors; they are skipped.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("authorization check for {workspace} failed: {source}")]
    Authorization {
        workspace: String,
        #[source]
        source: AuthzError,
    },

    #[error("inventory lookup for {workspace} failed: {source}")]
    Inventory {
        workspace: String,
        #[source]
        source: InventoryError,
    },

    #[error(transparent)]
    InvalidSelector(#[from] ModelError),

    /// The walk stopped early. `partial` holds what was found so far.
    #[error("discovery interrupted after {} workspaces: {cause}", .partial.len())]
    Interrupted {
        partial: Vec<WorkspaceInfo>,
        cause: Interrupted,
    },
}

impl DiscoveryError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}
