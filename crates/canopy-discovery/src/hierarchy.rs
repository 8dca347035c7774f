//! Workspace hierarchy snapshots.

use std::collections::BTreeMap;

use canopy_types::WorkspaceInfo;

/// One workspace in a [`WorkspaceHierarchy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyNode {
    pub workspace: WorkspaceInfo,
    /// `None` for the hierarchy root.
    pub parent: Option<String>,
    /// Child paths in name order.
    pub children: Vec<String>,
    /// Distance from the hierarchy root.
    pub depth: usize,
}

/// A subtree of the workspace tree rooted at `root`.
///
/// Depths are relative to `root`: the root node has depth 0 and every child
/// is exactly one deeper than its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceHierarchy {
    pub root: String,
    pub nodes: BTreeMap<String, HierarchyNode>,
}

impl WorkspaceHierarchy {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            nodes: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, workspace: WorkspaceInfo, parent: Option<&str>, depth: usize) {
        let path = workspace.name.clone();
        if let Some(parent) = parent
            && let Some(p) = self.nodes.get_mut(parent)
        {
            p.children.push(path.clone());
            p.children.sort();
        }
        self.nodes.insert(
            path,
            HierarchyNode {
                workspace,
                parent: parent.map(str::to_string),
                children: Vec::new(),
                depth,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn node(&self, path: &str) -> Option<&HierarchyNode> {
        self.nodes.get(path)
    }

    pub fn children(&self, path: &str) -> Vec<&HierarchyNode> {
        self.nodes
            .get(path)
            .map(|n| n.children.iter().filter_map(|c| self.nodes.get(c)).collect())
            .unwrap_or_default()
    }

    /// Ancestors nearest first, ending at the hierarchy root.
    pub fn ancestors(&self, path: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(path).and_then(|n| n.parent.clone());
        while let Some(p) = current {
            if out.contains(&p) || out.len() > self.nodes.len() {
                break;
            }
            current = self.nodes.get(&p).and_then(|n| n.parent.clone());
            out.push(p);
        }
        out
    }

    /// All descendants in depth-first pre-order.
    pub fn descendants(&self, path: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = match self.nodes.get(path) {
            Some(n) => n.children.iter().rev().map(String::as_str).collect(),
            None => return out,
        };
        while let Some(p) = stack.pop() {
            if out.iter().any(|o| o == p) {
                continue;
            }
            out.push(p.to_string());
            if let Some(n) = self.nodes.get(p) {
                stack.extend(n.children.iter().rev().map(String::as_str));
            }
        }
        out
    }

    /// Deepest node depth, 0 for an empty or single-node hierarchy.
    pub fn max_depth(&self) -> usize {
        self.nodes.values().map(|n| n.depth).max().unwrap_or(0)
    }

    pub fn workspaces(&self) -> Vec<WorkspaceInfo> {
        self.nodes.values().map(|n| n.workspace.clone()).collect()
    }
}
