//! Hierarchical workspaces.
//!
//! A workspace is addressed by its colon-separated path from the root
//! (`root:org:team`). A child's path is always its parent's path plus one
//! segment, so parent links can be derived from the path alone.

use serde::{Deserialize, Serialize};

use crate::Labels;
use crate::error::{ModelError, ModelResult};

/// Path of the root workspace.
pub const ROOT_WORKSPACE: &str = "root";

/// Separator between path segments.
pub const PATH_SEPARATOR: char = ':';

/// Metadata for a single workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    /// Full path, e.g. `root:org:team`.
    pub name: String,
    /// Parent path. `None` only for the root.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    #[serde(default = "default_ready")]
    pub ready: bool,
}

fn default_ready() -> bool {
    true
}

impl WorkspaceInfo {
    /// Create a ready workspace; the parent is derived from the path.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: parent_path(name).map(str::to_string),
            labels: Labels::new(),
            annotations: Labels::new(),
            ready: true,
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    /// Distance from the root (root is 0).
    pub fn depth(&self) -> usize {
        path_depth(&self.name)
    }

    /// Final path segment (`team` for `root:org:team`).
    pub fn short_name(&self) -> &str {
        self.name
            .rsplit_once(PATH_SEPARATOR)
            .map_or(self.name.as_str(), |(_, last)| last)
    }
}

/// Parent of a path, or `None` for a single-segment path.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once(PATH_SEPARATOR).map(|(parent, _)| parent)
}

/// Append one segment to a parent path.
pub fn join_path(parent: &str, segment: &str) -> String {
    format!("{parent}{PATH_SEPARATOR}{segment}")
}

/// Number of separators in the path.
pub fn path_depth(path: &str) -> usize {
    path.matches(PATH_SEPARATOR).count()
}

/// True when `path` is a strict descendant of `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with(PATH_SEPARATOR)
}

/// Check that every segment is a non-empty DNS-label-like name.
pub fn validate_path(path: &str) -> ModelResult<()> {
    if path.is_empty() {
        return Err(ModelError::InvalidPath("empty path".to_string()));
    }
    for segment in path.split(PATH_SEPARATOR) {
        let valid = !segment.is_empty()
            && segment.len() <= 63
            && segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !segment.starts_with('-')
            && !segment.ends_with('-');
        if !valid {
            return Err(ModelError::InvalidPath(format!(
                "{path:?}: invalid segment {segment:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_is_derived_from_path() {
        let ws = WorkspaceInfo::new("root:org:team");
        assert_eq!(ws.parent.as_deref(), Some("root:org"));
        assert_eq!(ws.depth(), 2);
        assert_eq!(ws.short_name(), "team");

        let root = WorkspaceInfo::new(ROOT_WORKSPACE);
        assert_eq!(root.parent, None);
        assert_eq!(root.depth(), 0);
    }

    #[test]
    fn join_adds_one_level() {
        let child = join_path("root:org", "team");
        assert_eq!(child, "root:org:team");
        assert_eq!(parent_path(&child), Some("root:org"));
        assert_eq!(path_depth(&child), path_depth("root:org") + 1);
    }

    #[test]
    fn descendant_requires_segment_boundary() {
        assert!(is_descendant("root:org:team", "root:org"));
        assert!(is_descendant("root:org:team", "root"));
        assert!(!is_descendant("root:organic", "root:org"));
        assert!(!is_descendant("root:org", "root:org"));
    }

    #[test]
    fn path_validation() {
        assert!(validate_path("root:org-1:team").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("root::team").is_err());
        assert!(validate_path("root:Team").is_err());
        assert!(validate_path("root:-x").is_err());
    }
}
