//! Scheduler: filter, score and bind for one workload at a time.
//!
//! The `Scheduler` owns a scoring framework built from configuration and
//! resolves a distribution strategy per policy. It is synchronous and holds
//! no per-workload state, so one instance can serve concurrent callers.

use std::time::Instant;

use canopy_placement::{
    DistributionStrategy, Normalization, PreemptionPlan, ScorerConfig, ScorerRegistry,
    ScoringFramework, StrategyConfig, check_resources, default_scorers, evaluate_target,
    plan_preemption, placed, spread_violations, strategy_for, validate_policy,
};
use canopy_types::{
    ClusterTarget, Distribution, EvaluationResult, OpContext, PlacementPolicy, ScoredTarget,
    SchedulingResult, Workload, parse_resources, sort_by_rank, validate_path,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SchedulerError, SchedulerResult};
use crate::phase::{PhaseTracker, SchedulingPhase};

/// Scheduler configuration: which scorers run and how strategies behave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub scorers: Vec<ScorerConfig>,
    pub normalization: Normalization,
    pub strategy: StrategyConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scorers: default_scorers(),
            normalization: Normalization::None,
            strategy: StrategyConfig::default(),
        }
    }
}

/// Why a target was filtered out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub target: String,
    pub reasons: Vec<String>,
}

/// Result of the filter and score phases.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    /// Feasible targets, ranked.
    pub scored: Vec<ScoredTarget>,
    /// One evaluation per input target, in input order.
    pub evaluations: Vec<EvaluationResult>,
    pub rejected: Vec<Rejection>,
    pub result: SchedulingResult,
    pub tracker: PhaseTracker,
}

/// Preemption proposal for a workload that does not fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreemptionResult {
    pub workload: String,
    pub plan: PreemptionPlan,
    /// Every replica would fit after the proposed evictions.
    pub sufficient: bool,
}

pub struct Scheduler {
    config: SchedulerConfig,
    framework: ScoringFramework,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("scorers", &self.framework.plugin_names())
            .field("normalization", &self.config.normalization)
            .finish()
    }
}

/// Check a workload before any computation.
pub fn validate_workload(workload: &Workload) -> SchedulerResult<()> {
    let invalid = |reason: String| SchedulerError::InvalidWorkload {
        workload: workload.name.clone(),
        reason,
    };
    if workload.name.trim().is_empty() {
        return Err(invalid("name is empty".into()));
    }
    if workload.replicas == 0 {
        return Err(invalid("replicas must be at least 1".into()));
    }
    validate_path(&workload.workspace).map_err(|e| invalid(e.to_string()))?;
    parse_resources(&workload.requests).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

impl Scheduler {
    /// Build with the built-in scorer plugins.
    pub fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        Self::with_registry(config, &ScorerRegistry::with_builtins())
    }

    /// Build with a caller-supplied registry, e.g. one holding custom
    /// scorers.
    pub fn with_registry(config: SchedulerConfig, registry: &ScorerRegistry) -> SchedulerResult<Self> {
        config.strategy.validate()?;
        let framework = registry.build_framework(&config.scorers, config.normalization)?;
        info!(
            scorers = ?framework.plugin_names(),
            normalization = ?config.normalization,
            "scheduler ready"
        );
        Ok(Self { config, framework })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The distribution strategy used for `policy`.
    pub fn strategy(&self, policy: &PlacementPolicy) -> SchedulerResult<Box<dyn DistributionStrategy>> {
        Ok(strategy_for(policy, &self.config.strategy)?)
    }

    /// Filter and score `clusters` for `workload`.
    ///
    /// The context is checked before each target and before scoring; on
    /// interruption the evaluations finished so far are returned inside the
    /// error. Fails with [`SchedulerError::PhaseFailed`] when no target
    /// passes the filter.
    pub fn schedule(
        &self,
        ctx: &OpContext,
        workload: &Workload,
        policy: &PlacementPolicy,
        clusters: &[ClusterTarget],
    ) -> SchedulerResult<ScheduleOutcome> {
        let started = Instant::now();
        validate_workload(workload)?;
        validate_policy(policy)?;
        let algorithm = self.strategy(policy)?.name().to_string();

        let mut tracker = PhaseTracker::new(&workload.key());
        tracker.advance(SchedulingPhase::Filtering)?;

        let mut evaluations = Vec::with_capacity(clusters.len());
        for target in clusters {
            if let Err(cause) = ctx.check() {
                tracker.abort(cause.to_string())?;
                return Err(SchedulerError::Interrupted {
                    phase: SchedulingPhase::Filtering.as_str().to_string(),
                    cause,
                    partial: evaluations,
                });
            }
            let eval = evaluate_target(workload, target, policy, clusters)?;
            debug!(
                cluster = %eval.target,
                suitable = eval.suitable,
                score = eval.score,
                "evaluated target"
            );
            evaluations.push(eval);
        }

        let rejected: Vec<Rejection> = evaluations
            .iter()
            .filter(|e| !e.suitable)
            .map(|e| Rejection {
                target: e.target.clone(),
                reasons: e.violated.clone(),
            })
            .collect();
        let feasible: Vec<(&ClusterTarget, &EvaluationResult)> = clusters
            .iter()
            .zip(&evaluations)
            .filter(|(_, e)| e.suitable)
            .collect();

        if feasible.is_empty() {
            let reason = if rejected.is_empty() {
                "no candidate targets".to_string()
            } else {
                let details: Vec<String> = rejected
                    .iter()
                    .map(|r| format!("{}: {}", r.target, r.reasons.join(", ")))
                    .collect();
                format!("no feasible targets ({})", details.join("; "))
            };
            return Err(tracker.fail(reason));
        }

        tracker.advance(SchedulingPhase::Scoring)?;
        if let Err(cause) = ctx.check() {
            tracker.abort(cause.to_string())?;
            return Err(SchedulerError::Interrupted {
                phase: SchedulingPhase::Scoring.as_str().to_string(),
                cause,
                partial: evaluations.clone(),
            });
        }

        let scores = self.framework.score_targets(workload, &feasible, clusters)?;
        let mut scored = Vec::with_capacity(feasible.len());
        for ((target, _), score) in feasible.iter().zip(&scores) {
            let fit = check_resources(workload, target)?;
            let mut s = ScoredTarget::new((*target).clone(), score.score.round() as u32);
            s.reasons = score
                .breakdown
                .iter()
                .map(|(name, v)| format!("{name}={v:.1}"))
                .collect();
            s.max_replicas = fit.max_replicas;
            scored.push(s);
        }
        sort_by_rank(&mut scored);

        let feasible_count = scored.len();
        let plugin_count = self.framework.plugin_names().len().max(1);
        let result = SchedulingResult {
            algorithm,
            duration_ms: started.elapsed().as_millis() as u64,
            iterations: (feasible_count * plugin_count) as u32,
            clusters_evaluated: clusters.len(),
            clusters_feasible: feasible_count,
        };
        info!(
            workload = %workload.key(),
            evaluated = result.clusters_evaluated,
            feasible = result.clusters_feasible,
            best = %scored.first().map(|s| s.key()).unwrap_or_default(),
            "scheduled"
        );

        Ok(ScheduleOutcome {
            scored,
            evaluations,
            rejected,
            result,
            tracker,
        })
    }

    /// Distribute the workload's replicas over ranked targets.
    ///
    /// Uses at most `max_clusters` of the best targets. Fails when not every
    /// replica fits or a hard spread constraint would be violated.
    pub fn bind(
        &self,
        workload: &Workload,
        policy: &PlacementPolicy,
        scored: &[ScoredTarget],
    ) -> SchedulerResult<Distribution> {
        let fail = |reason: String| SchedulerError::PhaseFailed {
            workload: workload.key(),
            phase: SchedulingPhase::Binding.as_str().to_string(),
            reason,
        };

        let mut candidates = scored.to_vec();
        sort_by_rank(&mut candidates);
        if let Some(max) = policy.max_clusters {
            candidates.truncate(max);
        }
        if candidates.is_empty() {
            return Err(fail("no scored targets".into()));
        }

        let strategy = self.strategy(policy)?;
        let distribution =
            strategy.compute_distribution(workload.replicas, &candidates, &policy.spread_constraints);
        self.verify(workload, policy, &candidates, &distribution)
            .map_err(fail)?;
        debug!(
            workload = %workload.key(),
            strategy = strategy.name(),
            targets = distribution.len(),
            "bound replicas"
        );
        Ok(distribution)
    }

    /// Check a distribution covers every replica and keeps hard spread.
    pub fn verify(
        &self,
        workload: &Workload,
        policy: &PlacementPolicy,
        candidates: &[ScoredTarget],
        distribution: &Distribution,
    ) -> Result<(), String> {
        let total = placed(distribution);
        if total < workload.replicas {
            return Err(format!(
                "only {total} of {} replicas fit on {} targets",
                workload.replicas,
                candidates.len()
            ));
        }
        let targets: Vec<ClusterTarget> = candidates.iter().map(|s| s.target.clone()).collect();
        let violations = spread_violations(&policy.spread_constraints, distribution, &targets);
        if let Some(v) = violations.first() {
            return Err(format!(
                "spread on {} has skew {} > {}",
                v.topology_key, v.skew, v.max_skew
            ));
        }
        Ok(())
    }

    /// Run binding on a scheduled outcome, finishing its phase tracking.
    pub fn complete(
        &self,
        outcome: &mut ScheduleOutcome,
        workload: &Workload,
        policy: &PlacementPolicy,
    ) -> SchedulerResult<Distribution> {
        outcome.tracker.advance(SchedulingPhase::Binding)?;
        match self.bind(workload, policy, &outcome.scored) {
            Ok(distribution) => {
                outcome.tracker.advance(SchedulingPhase::Complete)?;
                outcome.result.duration_ms = outcome.tracker.elapsed().as_millis() as u64;
                Ok(distribution)
            }
            Err(SchedulerError::PhaseFailed { reason, .. }) => Err(outcome.tracker.fail(reason)),
            Err(other) => {
                outcome.tracker.abort(other.to_string())?;
                Err(other)
            }
        }
    }

    /// Propose evictions that would let `workload` fit. Never evicts.
    pub fn preempt(
        &self,
        workload: &Workload,
        policy: &PlacementPolicy,
        targets: &[ClusterTarget],
    ) -> SchedulerResult<PreemptionResult> {
        validate_workload(workload)?;
        validate_policy(policy)?;
        let plan = plan_preemption(workload, policy, targets)?;
        info!(
            workload = %workload.key(),
            victims = plan.victims.len(),
            evicted = plan.evicted_replicas(),
            unplaced = plan.unplaced,
            "preemption planned"
        );
        Ok(PreemptionResult {
            workload: workload.key(),
            sufficient: plan.unplaced == 0,
            plan,
        })
    }
}
