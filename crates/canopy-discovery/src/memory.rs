//! In-memory collaborators for tests and embedding.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use canopy_types::{ClusterTarget, WorkspaceInfo};
use tokio::sync::RwLock;
use tracing::debug;

use crate::authz::{AccessRequest, Authorizer, AuthzError};
use crate::inventory::{Inventory, InventoryError};

/// Inventory held in memory. Mutators take `&self` so a shared instance
/// can be changed while the engine holds it.
#[derive(Default)]
pub struct MemoryInventory {
    workspaces: RwLock<BTreeMap<String, WorkspaceInfo>>,
    clusters: RwLock<BTreeMap<String, Vec<ClusterTarget>>>,
    workspace_errors: RwLock<HashMap<String, InventoryError>>,
    cluster_errors: RwLock<HashMap<String, InventoryError>>,
    calls: AtomicUsize,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_workspace(&self, info: WorkspaceInfo) {
        debug!(workspace = %info.name, "workspace registered");
        self.workspaces.write().await.insert(info.name.clone(), info);
    }

    pub async fn remove_workspace(&self, path: &str) {
        self.workspaces.write().await.remove(path);
        self.clusters.write().await.remove(path);
    }

    /// Insert a target, replacing any with the same name in its workspace.
    pub async fn upsert_cluster(&self, target: ClusterTarget) {
        let mut clusters = self.clusters.write().await;
        let list = clusters.entry(target.workspace.clone()).or_default();
        list.retain(|c| c.name != target.name);
        list.push(target);
        list.sort_by(|a, b| a.name.cmp(&b.name));
    }

    pub async fn remove_cluster(&self, workspace: &str, name: &str) {
        if let Some(list) = self.clusters.write().await.get_mut(workspace) {
            list.retain(|c| c.name != name);
        }
    }

    /// Make workspace lookups for `path` fail with `error`.
    pub async fn fail_workspace(&self, path: &str, error: InventoryError) {
        self.workspace_errors
            .write()
            .await
            .insert(path.to_string(), error);
    }

    /// Make cluster listings for `workspace` fail with `error`.
    pub async fn fail_clusters(&self, workspace: &str, error: InventoryError) {
        self.cluster_errors
            .write()
            .await
            .insert(workspace.to_string(), error);
    }

    pub async fn heal(&self, path: &str) {
        self.workspace_errors.write().await.remove(path);
        self.cluster_errors.write().await.remove(path);
    }

    /// Total collaborator calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn workspace_error(&self, path: &str) -> Option<InventoryError> {
        self.workspace_errors.read().await.get(path).cloned()
    }
}

#[async_trait]
impl Inventory for MemoryInventory {
    async fn get_workspace(&self, path: &str) -> Result<WorkspaceInfo, InventoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.workspace_error(path).await {
            return Err(e);
        }
        self.workspaces
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| InventoryError::NotFound(path.to_string()))
    }

    async fn list_children(&self, path: &str) -> Result<Vec<WorkspaceInfo>, InventoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.workspace_error(path).await {
            return Err(e);
        }
        let workspaces = self.workspaces.read().await;
        if !workspaces.contains_key(path) {
            return Err(InventoryError::NotFound(path.to_string()));
        }
        Ok(workspaces
            .values()
            .filter(|w| w.parent.as_deref() == Some(path))
            .cloned()
            .collect())
    }

    async fn list_clusters(&self, workspace: &str) -> Result<Vec<ClusterTarget>, InventoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.cluster_errors.read().await.get(workspace).cloned() {
            return Err(e);
        }
        if !self.workspaces.read().await.contains_key(workspace) {
            return Err(InventoryError::NotFound(workspace.to_string()));
        }
        Ok(self
            .clusters
            .read()
            .await
            .get(workspace)
            .cloned()
            .unwrap_or_default())
    }
}

/// Rule-table authorizer with a call counter.
pub struct StaticAuthorizer {
    default_allow: bool,
    allowed: RwLock<BTreeSet<String>>,
    denied: RwLock<BTreeSet<String>>,
    denied_resources: RwLock<BTreeSet<(String, String)>>,
    errors: RwLock<HashMap<String, AuthzError>>,
    calls: AtomicUsize,
}

impl StaticAuthorizer {
    fn with_default(default_allow: bool) -> Self {
        Self {
            default_allow,
            allowed: RwLock::default(),
            denied: RwLock::default(),
            denied_resources: RwLock::default(),
            errors: RwLock::default(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn allow_all() -> Self {
        Self::with_default(true)
    }

    pub fn deny_all() -> Self {
        Self::with_default(false)
    }

    pub async fn allow(&self, workspace: &str) {
        self.denied.write().await.remove(workspace);
        self.allowed.write().await.insert(workspace.to_string());
    }

    pub async fn deny(&self, workspace: &str) {
        self.allowed.write().await.remove(workspace);
        self.denied.write().await.insert(workspace.to_string());
    }

    pub async fn deny_resource(&self, workspace: &str, resource: &str) {
        self.denied_resources
            .write()
            .await
            .insert((workspace.to_string(), resource.to_string()));
    }

    /// Answer every request for `workspace` with `error`.
    pub async fn fail(&self, workspace: &str, error: AuthzError) {
        self.errors.write().await.insert(workspace.to_string(), error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn can_access(&self, request: &AccessRequest) -> Result<bool, AuthzError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ws = request.workspace.as_str();

        if let Some(e) = self.errors.read().await.get(ws) {
            return Err(e.clone());
        }
        if self.denied.read().await.contains(ws) {
            return Ok(false);
        }
        if let Some(resource) = &request.resource
            && self
                .denied_resources
                .read()
                .await
                .contains(&(ws.to_string(), resource.clone()))
        {
            return Ok(false);
        }
        if self.allowed.read().await.contains(ws) {
            return Ok(true);
        }
        Ok(self.default_allow)
    }
}
