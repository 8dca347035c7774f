//! Permission-filtered traversal of the workspace tree.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use canopy_cache::{CacheConfig, Clock, SystemClock, TtlCache};
use canopy_types::workspace::{ROOT_WORKSPACE, is_descendant, parent_path};
use canopy_types::{ClusterTarget, LabelSelector, OpContext, WorkspaceInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::authz::{Authorizer, PermissionChecker};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::hierarchy::WorkspaceHierarchy;
use crate::inventory::Inventory;

/// Discovery settings. TTLs are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Workspace the walk starts from.
    pub root: String,
    /// Identity presented to the authorizer.
    pub user: String,
    /// Verb checked before entering a workspace.
    pub list_verb: String,
    /// Deepest level descended into, relative to the start of a walk.
    pub max_depth: usize,
    pub workspace_ttl_secs: u64,
    pub cluster_ttl_secs: u64,
    pub permission_ttl_secs: u64,
    pub hierarchy_ttl_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root: ROOT_WORKSPACE.to_string(),
            user: "system:canopy".to_string(),
            list_verb: "list".to_string(),
            max_depth: 10,
            workspace_ttl_secs: 600,
            cluster_ttl_secs: 120,
            permission_ttl_secs: 300,
            hierarchy_ttl_secs: 600,
        }
    }
}

/// A workspace reached by a walk.
struct Visited {
    info: WorkspaceInfo,
    parent: Option<String>,
    depth: usize,
}

type VisitFuture<'a> = Pin<Box<dyn Future<Output = DiscoveryResult<()>> + Send + 'a>>;

/// Discovers workspaces and their cluster targets on behalf of one user.
///
/// Every cache is owned by this instance. Population is read-through with
/// no de-duplication of concurrent misses.
pub struct WorkspaceDiscovery {
    inventory: Arc<dyn Inventory>,
    permissions: PermissionChecker,
    config: DiscoveryConfig,
    workspaces: TtlCache<String, Vec<WorkspaceInfo>>,
    clusters: TtlCache<String, Vec<ClusterTarget>>,
    hierarchies: TtlCache<String, WorkspaceHierarchy>,
}

impl WorkspaceDiscovery {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        authorizer: Arc<dyn Authorizer>,
        config: DiscoveryConfig,
    ) -> Self {
        Self::with_clock(inventory, authorizer, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        inventory: Arc<dyn Inventory>,
        authorizer: Arc<dyn Authorizer>,
        config: DiscoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = Duration::from_secs;
        Self {
            permissions: PermissionChecker::new(
                authorizer,
                &config.user,
                ttl(config.permission_ttl_secs),
                clock.clone(),
            ),
            workspaces: TtlCache::with_clock(
                CacheConfig::new("workspaces", ttl(config.workspace_ttl_secs)),
                clock.clone(),
            ),
            clusters: TtlCache::with_clock(
                CacheConfig::new("clusters", ttl(config.cluster_ttl_secs)),
                clock.clone(),
            ),
            hierarchies: TtlCache::with_clock(
                CacheConfig::new("hierarchies", ttl(config.hierarchy_ttl_secs)),
                clock,
            ),
            inventory,
            config,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn permissions(&self) -> &PermissionChecker {
        &self.permissions
    }

    /// Every accessible workspace under the configured root whose labels
    /// match `selector`, in depth-first order with children sorted by name.
    ///
    /// A denied workspace hides its subtree. Errors below the root are
    /// logged and isolate only the failing subtree.
    pub async fn list_workspaces(
        &self,
        ctx: &OpContext,
        selector: &LabelSelector,
    ) -> DiscoveryResult<Vec<WorkspaceInfo>> {
        selector.validate()?;

        let key = format!("{}|{}", self.config.user, selector.canonical());
        if let Some(cached) = self.workspaces.get(&key).await {
            return Ok(cached);
        }

        let matching = |infos: Vec<WorkspaceInfo>| -> Vec<WorkspaceInfo> {
            infos
                .into_iter()
                .filter(|w| selector.matches(&w.labels))
                .collect()
        };

        let visited = match self.walk(ctx, &self.config.root).await {
            Ok(v) => v,
            Err(DiscoveryError::Interrupted { partial, cause }) => {
                return Err(DiscoveryError::Interrupted {
                    partial: matching(partial),
                    cause,
                });
            }
            Err(e) => return Err(e),
        };
        let total = visited.len();
        let found = matching(visited.into_iter().map(|v| v.info).collect());

        info!(
            root = %self.config.root,
            selector = %selector,
            visited = total,
            matched = found.len(),
            "workspaces discovered"
        );
        self.workspaces.put(key, found.clone()).await;
        Ok(found)
    }

    /// Cluster targets registered in a workspace. A missing or forbidden
    /// workspace yields an empty list.
    pub async fn get_clusters(&self, workspace: &str) -> DiscoveryResult<Vec<ClusterTarget>> {
        let key = workspace.to_string();
        if let Some(cached) = self.clusters.get(&key).await {
            return Ok(cached);
        }

        let mut clusters = match self.inventory.list_clusters(workspace).await {
            Ok(c) => c,
            Err(e) if e.is_absent() => {
                debug!(workspace, error = %e, "no clusters visible in workspace");
                Vec::new()
            }
            Err(source) => {
                return Err(DiscoveryError::Inventory {
                    workspace: key,
                    source,
                });
            }
        };

        clusters.retain_mut(|c| {
            if c.workspace.is_empty() {
                c.workspace = workspace.to_string();
            }
            if c.workspace != workspace {
                warn!(
                    workspace,
                    cluster = %c.name,
                    reported = %c.workspace,
                    "cluster reports a different workspace, skipping"
                );
                return false;
            }
            true
        });
        clusters.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(workspace, count = clusters.len(), "clusters listed");
        self.clusters.put(key, clusters.clone()).await;
        Ok(clusters)
    }

    /// The accessible subtree under `root`. An absent root gives an empty
    /// hierarchy.
    pub async fn get_workspace_hierarchy(
        &self,
        ctx: &OpContext,
        root: &str,
    ) -> DiscoveryResult<WorkspaceHierarchy> {
        let key = root.to_string();
        if let Some(cached) = self.hierarchies.get(&key).await {
            return Ok(cached);
        }

        let visited = self.walk(ctx, root).await?;
        let mut hierarchy = WorkspaceHierarchy::new(root);
        for v in visited {
            hierarchy.insert(v.info, v.parent.as_deref(), v.depth);
        }

        info!(
            root,
            workspaces = hierarchy.len(),
            max_depth = hierarchy.max_depth(),
            "workspace hierarchy built"
        );
        self.hierarchies.put(key, hierarchy.clone()).await;
        Ok(hierarchy)
    }

    /// Forget everything cached about `path` and its descendants, and every
    /// workspace listing.
    pub async fn invalidate_workspace(&self, path: &str) {
        let touches = |ws: &String| ws == path || is_descendant(ws, path);

        let clusters = self.clusters.invalidate_where(touches).await;
        let permissions = self.permissions.invalidate_workspace(path).await;
        let hierarchies = self
            .hierarchies
            .invalidate_where(|root| root == path || is_descendant(path, root))
            .await;
        self.workspaces.clear().await;

        info!(
            workspace = path,
            clusters,
            permissions,
            hierarchies,
            "workspace caches invalidated"
        );
    }

    pub async fn clear(&self) {
        self.workspaces.clear().await;
        self.clusters.clear().await;
        self.hierarchies.clear().await;
        self.permissions.clear().await;
        info!("discovery caches cleared");
    }

    async fn walk(&self, ctx: &OpContext, start: &str) -> DiscoveryResult<Vec<Visited>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        match self
            .visit(ctx, start.to_string(), None, 0, &mut out, &mut seen)
            .await
        {
            Ok(()) => Ok(out),
            Err(DiscoveryError::Interrupted { cause, .. }) => {
                warn!(start, visited = out.len(), %cause, "workspace walk interrupted");
                Err(DiscoveryError::Interrupted {
                    partial: out.into_iter().map(|v| v.info).collect(),
                    cause,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn visit<'a>(
        &'a self,
        ctx: &'a OpContext,
        path: String,
        parent: Option<String>,
        depth: usize,
        out: &'a mut Vec<Visited>,
        seen: &'a mut HashSet<String>,
    ) -> VisitFuture<'a> {
        Box::pin(async move {
            ctx.check().map_err(|cause| DiscoveryError::Interrupted {
                partial: Vec::new(),
                cause,
            })?;

            if depth > self.config.max_depth {
                warn!(
                    workspace = %path,
                    depth,
                    max_depth = self.config.max_depth,
                    "workspace tree exceeds max depth, not descending"
                );
                return Ok(());
            }
            if !seen.insert(path.clone()) {
                warn!(workspace = %path, "workspace reached twice, parent links form a cycle");
                return Ok(());
            }

            let allowed = self
                .permissions
                .check_access(&path, &self.config.list_verb)
                .await
                .map_err(|source| DiscoveryError::Authorization {
                    workspace: path.clone(),
                    source,
                })?;
            if !allowed {
                debug!(workspace = %path, "workspace not accessible, skipping subtree");
                return Ok(());
            }

            let info = match self.inventory.get_workspace(&path).await {
                Ok(info) => info,
                Err(e) if e.is_absent() => {
                    debug!(workspace = %path, error = %e, "workspace vanished, skipping");
                    return Ok(());
                }
                Err(source) => {
                    return Err(DiscoveryError::Inventory {
                        workspace: path,
                        source,
                    });
                }
            };
            out.push(Visited {
                info,
                parent,
                depth,
            });

            let mut children = match self.inventory.list_children(&path).await {
                Ok(children) => children,
                Err(e) if e.is_absent() => Vec::new(),
                Err(source) => {
                    return Err(DiscoveryError::Inventory {
                        workspace: path,
                        source,
                    });
                }
            };
            children.sort_by(|a, b| a.name.cmp(&b.name));

            for child in children {
                if parent_path(&child.name) != Some(path.as_str()) {
                    warn!(
                        workspace = %child.name,
                        parent = %path,
                        "child path does not extend its parent, skipping"
                    );
                    continue;
                }
                let result = self
                    .visit(ctx, child.name.clone(), Some(path.clone()), depth + 1, out, seen)
                    .await;
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_interrupted() => return Err(e),
                    Err(e) => {
                        warn!(workspace = %child.name, error = %e, "skipping workspace subtree");
                    }
                }
            }
            Ok(())
        })
    }
}
