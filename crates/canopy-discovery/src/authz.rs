//! Authorization collaborator and the permission-decision cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canopy_cache::{CacheConfig, CacheStats, Clock, TtlCache};
use canopy_types::workspace::is_descendant;
use thiserror::Error;
use tracing::debug;

/// One access question put to the [`Authorizer`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessRequest {
    pub user: String,
    pub workspace: String,
    pub verb: String,
    /// Finer scope than the workspace, e.g. `clusters`.
    pub resource: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("authorizer unavailable: {0}")]
    Unavailable(String),
}

/// External authorization capability.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn can_access(&self, request: &AccessRequest) -> Result<bool, AuthzError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PermissionKey {
    workspace: String,
    verb: String,
    resource: Option<String>,
}

/// Caches authorization decisions for a single user.
///
/// `NotFound` and `Forbidden` answers become a cached `false`, so callers
/// cannot tell a denied workspace from a missing one. Any other error is
/// returned and not cached.
pub struct PermissionChecker {
    authorizer: Arc<dyn Authorizer>,
    user: String,
    cache: TtlCache<PermissionKey, bool>,
}

impl PermissionChecker {
    pub fn new(authorizer: Arc<dyn Authorizer>, user: &str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            authorizer,
            user: user.to_string(),
            cache: TtlCache::with_clock(CacheConfig::new("permissions", ttl), clock),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub async fn check_access(&self, workspace: &str, verb: &str) -> Result<bool, AuthzError> {
        self.check(workspace, verb, None).await
    }

    pub async fn check_resource_access(
        &self,
        workspace: &str,
        verb: &str,
        resource: &str,
    ) -> Result<bool, AuthzError> {
        self.check(workspace, verb, Some(resource)).await
    }

    async fn check(
        &self,
        workspace: &str,
        verb: &str,
        resource: Option<&str>,
    ) -> Result<bool, AuthzError> {
        let key = PermissionKey {
            workspace: workspace.to_string(),
            verb: verb.to_string(),
            resource: resource.map(str::to_string),
        };
        if let Some(allowed) = self.cache.get(&key).await {
            return Ok(allowed);
        }

        let request = AccessRequest {
            user: self.user.clone(),
            workspace: workspace.to_string(),
            verb: verb.to_string(),
            resource: resource.map(str::to_string),
        };
        let allowed = match self.authorizer.can_access(&request).await {
            Ok(allowed) => allowed,
            Err(AuthzError::NotFound(_) | AuthzError::Forbidden(_)) => false,
            Err(e) => return Err(e),
        };
        debug!(workspace, verb, ?resource, allowed, "permission decision cached");
        self.cache.put(key, allowed).await;
        Ok(allowed)
    }

    /// Drop decisions for a workspace and everything beneath it.
    pub async fn invalidate_workspace(&self, path: &str) -> usize {
        self.cache
            .invalidate_where(|k| k.workspace == path || is_descendant(&k.workspace, path))
            .await
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StaticAuthorizer;
    use canopy_cache::ManualClock;

    fn checker(authz: Arc<StaticAuthorizer>) -> (PermissionChecker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let checker = PermissionChecker::new(authz, "alice", Duration::from_secs(300), clock.clone());
        (checker, clock)
    }

    #[tokio::test]
    async fn second_check_within_ttl_is_cached() {
        let authz = Arc::new(StaticAuthorizer::allow_all());
        let (checker, _) = checker(authz.clone());

        assert!(checker.check_access("root:org", "list").await.unwrap());
        assert!(checker.check_access("root:org", "list").await.unwrap());
        assert_eq!(authz.calls(), 1);
    }

    #[tokio::test]
    async fn expired_decision_is_refetched() {
        let authz = Arc::new(StaticAuthorizer::allow_all());
        let (checker, clock) = checker(authz.clone());

        checker.check_access("root:org", "list").await.unwrap();
        clock.advance(Duration::from_secs(301));
        checker.check_access("root:org", "list").await.unwrap();
        assert_eq!(authz.calls(), 2);
    }

    #[tokio::test]
    async fn not_found_and_forbidden_read_as_denied() {
        let authz = Arc::new(StaticAuthorizer::allow_all());
        authz
            .fail("root:gone", AuthzError::NotFound("root:gone".into()))
            .await;
        authz
            .fail("root:secret", AuthzError::Forbidden("root:secret".into()))
            .await;
        let (checker, _) = checker(authz.clone());

        assert!(!checker.check_access("root:gone", "list").await.unwrap());
        assert!(!checker.check_access("root:secret", "list").await.unwrap());
        assert!(!checker.check_access("root:secret", "list").await.unwrap());
        assert_eq!(authz.calls(), 2, "denials are cached");
    }

    #[tokio::test]
    async fn unavailable_is_returned_and_not_cached() {
        let authz = Arc::new(StaticAuthorizer::allow_all());
        authz
            .fail("root:flaky", AuthzError::Unavailable("timeout".into()))
            .await;
        let (checker, _) = checker(authz.clone());

        assert!(checker.check_access("root:flaky", "list").await.is_err());
        assert!(checker.check_access("root:flaky", "list").await.is_err());
        assert_eq!(authz.calls(), 2);
    }

    #[tokio::test]
    async fn resource_scope_is_part_of_the_key() {
        let authz = Arc::new(StaticAuthorizer::allow_all());
        authz.deny_resource("root:org", "clusters").await;
        let (checker, _) = checker(authz.clone());

        assert!(checker.check_access("root:org", "get").await.unwrap());
        assert!(
            !checker
                .check_resource_access("root:org", "get", "clusters")
                .await
                .unwrap()
        );
        assert_eq!(authz.calls(), 2);
    }

    #[tokio::test]
    async fn invalidate_covers_descendants() {
        let authz = Arc::new(StaticAuthorizer::allow_all());
        let (checker, _) = checker(authz.clone());

        for ws in ["root:org", "root:org:team", "root:other"] {
            checker.check_access(ws, "list").await.unwrap();
        }
        assert_eq!(checker.invalidate_workspace("root:org").await, 2);

        checker.check_access("root:other", "list").await.unwrap();
        assert_eq!(authz.calls(), 3);
        checker.check_access("root:org:team", "list").await.unwrap();
        assert_eq!(authz.calls(), 4);
    }
}
