//! Workspace discovery for the Canopy placement engine.
//!
//! Walks the workspace tree depth-first from a configured root, consulting
//! an [`Authorizer`] at every node. A denied workspace hides its whole
//! subtree without failing the walk. Listings, cluster inventories,
//! permission decisions and hierarchies are cached with per-cache TTLs.
//!
//! The external collaborators are the [`Authorizer`] and [`Inventory`]
//! traits. [`MemoryInventory`] and [`StaticAuthorizer`] implement them in
//! memory for tests and embedding.

pub mod authz;
pub mod discovery;
pub mod error;
pub mod hierarchy;
pub mod inventory;
pub mod memory;

pub use authz::{AccessRequest, Authorizer, AuthzError, PermissionChecker};
pub use discovery::{DiscoveryConfig, WorkspaceDiscovery};
pub use error::{DiscoveryError, DiscoveryResult};
pub use hierarchy::{HierarchyNode, WorkspaceHierarchy};
pub use inventory::{Inventory, InventoryError};
pub use memory::{MemoryInventory, StaticAuthorizer};
