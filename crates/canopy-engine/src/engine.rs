//! Placement engine: discovery, scheduling and decisions behind one façade.
//!
//! `find_clusters → evaluate → place`, plus drift detection for decisions
//! made earlier (`validate_placement`, `update_placement`) and the whole
//! pipeline in one call (`schedule_workload`). `revalidate_placement` and
//! `refresh_placement` do the drift work against freshly discovered
//! targets.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use canopy_cache::{Clock, SystemClock};
use canopy_discovery::{Authorizer, DiscoveryError, Inventory, WorkspaceDiscovery};
use canopy_placement::{
    EvalOptions, ScorerRegistry, evaluate_target_with, evaluate_targets, resources,
    spread_violations, validate_policy,
};
use canopy_scheduler::{ScheduleOutcome, Scheduler, validate_workload};
use canopy_types::{
    ClusterTarget, Distribution, EvaluationResult, LabelSelector, LocationPlacement, OpContext,
    PlacementDecision, PlacementPolicy, PlacementStrategy, ScoredTarget, SchedulingResult, Workload,
    sort_by_rank,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, WorkspaceFailure};

/// Clusters found across workspaces, with per-workspace failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSearch {
    /// Ordered by workspace, then name.
    pub clusters: Vec<ClusterTarget>,
    pub workspaces: Vec<String>,
    pub failures: Vec<WorkspaceFailure>,
}

/// Why a previously placed target no longer holds its replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Drift {
    TargetGone { target: String },
    NotReady { target: String },
    CapacityExhausted { target: String, resources: Vec<String> },
    ConstraintViolated { target: String, reasons: Vec<String> },
    SpreadViolated { topology_key: String, skew: u32, max_skew: u32 },
    ReplicaCountChanged { placed: u32, wanted: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementValidation {
    pub drift: Vec<Drift>,
}

impl PlacementValidation {
    pub fn is_valid(&self) -> bool {
        self.drift.is_empty()
    }
}

/// Composes discovery and scheduling. Owns every cache it uses.
pub struct PlacementEngine {
    discovery: Arc<WorkspaceDiscovery>,
    scheduler: Scheduler,
    config: EngineConfig,
}

impl std::fmt::Debug for PlacementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementEngine")
            .field("scheduler", &self.scheduler)
            .field("root", &self.config.discovery.root)
            .finish_non_exhaustive()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Serialize)]
struct DecisionDigest<'a> {
    workload: &'a str,
    policy: &'a str,
    strategy: &'a str,
    targets: &'a [LocationPlacement],
    timestamp: u64,
}

impl PlacementEngine {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        authorizer: Arc<dyn Authorizer>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        Self::with_parts(
            inventory,
            authorizer,
            config,
            &ScorerRegistry::with_builtins(),
            Arc::new(SystemClock),
        )
    }

    /// Build with a custom scorer registry and cache clock.
    pub fn with_parts(
        inventory: Arc<dyn Inventory>,
        authorizer: Arc<dyn Authorizer>,
        config: EngineConfig,
        registry: &ScorerRegistry,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        let scheduler = Scheduler::with_registry(config.scheduler_config(), registry)?;
        let discovery = Arc::new(WorkspaceDiscovery::with_clock(
            inventory,
            authorizer,
            config.discovery.clone(),
            clock,
        ));
        Ok(Self {
            discovery,
            scheduler,
            config,
        })
    }

    pub fn discovery(&self) -> &WorkspaceDiscovery {
        &self.discovery
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clusters of every accessible workspace matching `selector`.
    ///
    /// Listings run concurrently, at most `max_concurrent_workspaces` at a
    /// time. A failing workspace is recorded and skipped; the call fails
    /// only when every workspace failed.
    pub async fn find_clusters(&self, ctx: &OpContext, selector: &LabelSelector) -> EngineResult<ClusterSearch> {
        let workspaces = self.discovery.list_workspaces(ctx, selector).await?;
        let names: Vec<String> = workspaces.into_iter().map(|w| w.name).collect();
        let limit = self.config.max_concurrent_workspaces.max(1);

        let mut search = ClusterSearch {
            workspaces: names.clone(),
            ..Default::default()
        };
        let mut pending = names.into_iter();
        let mut set: JoinSet<(String, Result<Vec<ClusterTarget>, DiscoveryError>)> = JoinSet::new();

        loop {
            while set.len() < limit {
                let Some(ws) = pending.next() else { break };
                if let Err(cause) = ctx.check() {
                    set.abort_all();
                    sort_clusters(&mut search.clusters);
                    return Err(EngineError::Interrupted {
                        cause,
                        partial: search.clusters,
                    });
                }
                let discovery = Arc::clone(&self.discovery);
                set.spawn(async move {
                    let result = discovery.get_clusters(&ws).await;
                    (ws, result)
                });
            }
            let Some(joined) = set.join_next().await else {
                break;
            };
            match joined {
                Ok((_, Ok(clusters))) => search.clusters.extend(clusters),
                Ok((ws, Err(e))) => {
                    warn!(workspace = %ws, error = %e, "cluster listing failed");
                    search.failures.push(WorkspaceFailure {
                        workspace: ws,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "cluster listing task failed");
                    search.failures.push(WorkspaceFailure {
                        workspace: String::new(),
                        error: e.to_string(),
                    });
                }
            }
        }

        sort_clusters(&mut search.clusters);
        search.failures.sort_by(|a, b| a.workspace.cmp(&b.workspace));
        if !search.workspaces.is_empty() && search.failures.len() == search.workspaces.len() {
            return Err(EngineError::AllWorkspacesFailed {
                failures: search.failures,
            });
        }
        info!(
            workspaces = search.workspaces.len(),
            clusters = search.clusters.len(),
            failures = search.failures.len(),
            "found clusters"
        );
        Ok(search)
    }

    /// Filter and score `targets`. Identical inputs give identical results.
    pub fn evaluate(
        &self,
        ctx: &OpContext,
        workload: &Workload,
        policy: &PlacementPolicy,
        targets: &[ClusterTarget],
    ) -> EngineResult<ScheduleOutcome> {
        Ok(self.scheduler.schedule(ctx, workload, policy, targets)?)
    }

    /// Bind replicas over already scored targets and record the decision.
    pub fn place(
        &self,
        workload: &Workload,
        policy: &PlacementPolicy,
        scored: &[ScoredTarget],
    ) -> EngineResult<PlacementDecision> {
        validate_workload(workload)?;
        validate_policy(policy)?;
        let distribution = self.scheduler.bind(workload, policy, scored)?;
        let targets: Vec<ClusterTarget> = scored.iter().map(|s| s.target.clone()).collect();
        let evaluations = evaluate_targets(workload, &targets, policy)?;
        let scheduling = SchedulingResult {
            algorithm: self.scheduler.strategy(policy)?.name().to_string(),
            clusters_evaluated: scored.len(),
            clusters_feasible: scored.len(),
            ..Default::default()
        };
        self.decide(workload, policy, scored, &distribution, evaluations, scheduling)
    }

    /// Discover, evaluate and place in one call.
    pub async fn schedule_workload(
        &self,
        ctx: &OpContext,
        workload: &Workload,
        policy: &PlacementPolicy,
    ) -> EngineResult<PlacementDecision> {
        validate_workload(workload)?;
        validate_policy(policy)?;
        let search = self.find_clusters(ctx, &policy.workspace_selector).await?;
        let mut outcome = self.evaluate(ctx, workload, policy, &search.clusters)?;
        let distribution = self.scheduler.complete(&mut outcome, workload, policy)?;
        self.decide(
            workload,
            policy,
            &outcome.scored,
            &distribution,
            outcome.evaluations,
            outcome.result,
        )
    }

    /// Check a decision against the current state of its targets.
    pub fn validate_placement(
        &self,
        decision: &PlacementDecision,
        workload: &Workload,
        policy: &PlacementPolicy,
        current: &[ClusterTarget],
    ) -> EngineResult<PlacementValidation> {
        validate_policy(policy)?;
        let per_replica = resources::requirements(workload)?;
        let mut validation = PlacementValidation::default();
        let skip_resources = EvalOptions {
            check_resources: false,
        };

        for placement in &decision.target_clusters {
            let key = placement.key();
            let Some(target) = current.iter().find(|t| t.key() == key) else {
                validation.drift.push(Drift::TargetGone { target: key });
                continue;
            };
            if !target.ready && !policy.allow_not_ready {
                validation.drift.push(Drift::NotReady { target: key });
                continue;
            }
            let exhausted = resources::overcommitted(target, &per_replica, placement.replicas)?;
            if !exhausted.is_empty() {
                validation.drift.push(Drift::CapacityExhausted {
                    target: key.clone(),
                    resources: exhausted,
                });
            }
            let eval = evaluate_target_with(workload, target, policy, current, skip_resources)?;
            if !eval.suitable {
                validation.drift.push(Drift::ConstraintViolated {
                    target: key,
                    reasons: eval.violated,
                });
            }
        }

        for v in spread_violations(&policy.spread_constraints, &decision.distribution(), current) {
            validation.drift.push(Drift::SpreadViolated {
                topology_key: v.topology_key,
                skew: v.skew,
                max_skew: v.max_skew,
            });
        }
        if decision.total_replicas() != workload.replicas {
            validation.drift.push(Drift::ReplicaCountChanged {
                placed: decision.total_replicas(),
                wanted: workload.replicas,
            });
        }

        if !validation.is_valid() {
            debug!(decision = %decision.id, drift = ?validation.drift, "placement drifted");
        }
        Ok(validation)
    }

    /// Return `decision` unchanged when it is still valid, otherwise a
    /// revised decision that moves as few replicas as possible.
    pub fn update_placement(
        &self,
        ctx: &OpContext,
        decision: &PlacementDecision,
        workload: &Workload,
        policy: &PlacementPolicy,
        current: &[ClusterTarget],
    ) -> EngineResult<PlacementDecision> {
        let validation = self.validate_placement(decision, workload, policy, current)?;
        if validation.is_valid() {
            return Ok(decision.clone());
        }

        // Replicas already on a target are counted in its allocation, so
        // they are credited back before the target is filtered again.
        let previous = decision.distribution();
        let per_replica = resources::requirements(workload)?;
        let released = current
            .iter()
            .map(|t| match previous.get(&t.key()) {
                Some(own) => resources::release(t, &per_replica, *own),
                None => Ok(t.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut outcome = self.evaluate(ctx, workload, policy, &released)?;
        let strategy = self.scheduler.strategy(policy)?;
        let mut candidates = outcome.scored.clone();
        if let Some(max) = policy.max_clusters {
            candidates.truncate(max);
        }

        let distribution = strategy.rebalance_to(
            workload.replicas,
            &previous,
            &candidates,
            &policy.spread_constraints,
        );
        self.scheduler
            .verify(workload, policy, &candidates, &distribution)
            .map_err(|reason| canopy_scheduler::SchedulerError::PhaseFailed {
                workload: workload.key(),
                phase: "binding".into(),
                reason,
            })?;

        let moved = moved_replicas(&previous, &distribution);
        info!(
            workload = %workload.key(),
            previous = %decision.id,
            moved,
            drift = validation.drift.len(),
            "revised placement"
        );
        outcome.result.algorithm = strategy.name().to_string();
        self.decide(
            workload,
            policy,
            &candidates,
            &distribution,
            outcome.evaluations,
            outcome.result,
        )
    }

    /// [`validate_placement`](Self::validate_placement) against the targets
    /// discovery finds now. Targets in workspaces that are no longer
    /// accessible count as gone.
    pub async fn revalidate_placement(
        &self,
        ctx: &OpContext,
        decision: &PlacementDecision,
        workload: &Workload,
        policy: &PlacementPolicy,
    ) -> EngineResult<PlacementValidation> {
        let search = self.find_clusters(ctx, &policy.workspace_selector).await?;
        self.validate_placement(decision, workload, policy, &search.clusters)
    }

    /// [`update_placement`](Self::update_placement) against the targets
    /// discovery finds now.
    pub async fn refresh_placement(
        &self,
        ctx: &OpContext,
        decision: &PlacementDecision,
        workload: &Workload,
        policy: &PlacementPolicy,
    ) -> EngineResult<PlacementDecision> {
        let search = self.find_clusters(ctx, &policy.workspace_selector).await?;
        self.update_placement(ctx, decision, workload, policy, &search.clusters)
    }

    fn decide(
        &self,
        workload: &Workload,
        policy: &PlacementPolicy,
        scored: &[ScoredTarget],
        distribution: &Distribution,
        evaluations: Vec<EvaluationResult>,
        scheduling: SchedulingResult,
    ) -> EngineResult<PlacementDecision> {
        let mut ranked = scored.to_vec();
        sort_by_rank(&mut ranked);
        let target_clusters: Vec<LocationPlacement> = ranked
            .iter()
            .filter_map(|s| {
                let replicas = distribution.get(&s.key()).copied().unwrap_or(0);
                (replicas > 0).then(|| LocationPlacement {
                    cluster: s.target.name.clone(),
                    workspace: s.target.workspace.clone(),
                    replicas,
                })
            })
            .collect();

        let timestamp = now_secs();
        let workload_key = workload.key();
        let digest = serde_json::to_vec(&DecisionDigest {
            workload: &workload_key,
            policy: &policy.name,
            strategy: &scheduling.algorithm,
            targets: &target_clusters,
            timestamp,
        })?;
        let id = hex::encode(Sha256::digest(&digest));

        info!(
            decision = %id,
            workload = %workload_key,
            targets = target_clusters.len(),
            replicas = workload.replicas,
            "placement decided"
        );
        Ok(PlacementDecision {
            id,
            workload: workload_key,
            policy: policy.name.clone(),
            strategy: PlacementStrategy::from_name(&scheduling.algorithm).unwrap_or(policy.strategy),
            target_clusters,
            policy_evaluations: evaluations,
            scheduling,
            timestamp,
        })
    }
}

fn sort_clusters(clusters: &mut [ClusterTarget]) {
    clusters.sort_by(|a, b| a.workspace.cmp(&b.workspace).then_with(|| a.name.cmp(&b.name)));
}

/// Replicas that changed target between two distributions.
pub fn moved_replicas(before: &Distribution, after: &Distribution) -> u32 {
    before
        .iter()
        .map(|(k, n)| n.saturating_sub(after.get(k).copied().unwrap_or(0)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moved_counts_only_departures() {
        let before = Distribution::from([("a".to_string(), 3), ("b".to_string(), 1)]);
        let after = Distribution::from([("a".to_string(), 2), ("c".to_string(), 2)]);
        assert_eq!(moved_replicas(&before, &after), 2);
        assert_eq!(moved_replicas(&before, &before), 0);
    }

    #[test]
    fn clusters_sort_by_workspace_then_name() {
        let mut c = vec![
            ClusterTarget::new("b", "root:x"),
            ClusterTarget::new("a", "root:y"),
            ClusterTarget::new("a", "root:x"),
        ];
        sort_clusters(&mut c);
        let keys: Vec<String> = c.iter().map(|t| t.key()).collect();
        assert_eq!(keys, ["root:x/a", "root:x/b", "root:y/a"]);
    }

    #[test]
    fn validation_without_drift_is_valid() {
        assert!(PlacementValidation::default().is_valid());
    }
}
