//! Evaluation results and placement decisions.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterTarget;
use crate::policy::PlacementStrategy;

/// Replica counts keyed by target key (`{workspace}/{name}`).
pub type Distribution = BTreeMap<String, u32>;

/// Outcome of evaluating one target against a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Target key.
    pub target: String,
    /// All hard constraints hold.
    pub suitable: bool,
    /// Soft-preference score in `[0, 100]`.
    pub score: f64,
    pub satisfied: Vec<String>,
    pub violated: Vec<String>,
    #[serde(default)]
    pub message: String,
}

impl EvaluationResult {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            suitable: true,
            score: 0.0,
            satisfied: Vec::new(),
            violated: Vec::new(),
            message: String::new(),
        }
    }

    pub fn pass(&mut self, reason: impl Into<String>) {
        self.satisfied.push(reason.into());
    }

    /// Record a hard failure.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.suitable = false;
        self.violated.push(reason.into());
    }
}

/// A target that survived filtering, with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTarget {
    pub target: ClusterTarget,
    /// Integer score in `[0, 100]`.
    pub score: u32,
    #[serde(default)]
    pub reasons: Vec<String>,
    /// How many replicas of the workload fit, if any resource is bounded.
    #[serde(default)]
    pub max_replicas: Option<u32>,
}

impl ScoredTarget {
    pub fn new(target: ClusterTarget, score: u32) -> Self {
        Self {
            target,
            score: score.min(100),
            reasons: Vec::new(),
            max_replicas: None,
        }
    }

    pub fn with_max_replicas(mut self, max: u32) -> Self {
        self.max_replicas = Some(max);
        self
    }

    pub fn key(&self) -> String {
        self.target.key()
    }

    /// Remaining room for replicas; unbounded when no resource was requested.
    pub fn room(&self) -> u32 {
        self.max_replicas.unwrap_or(u32::MAX)
    }

    /// Ranking order: score descending, then name, then workspace.
    pub fn ranking(a: &Self, b: &Self) -> Ordering {
        b.score
            .cmp(&a.score)
            .then_with(|| a.target.name.cmp(&b.target.name))
            .then_with(|| a.target.workspace.cmp(&b.target.workspace))
    }
}

/// Sort targets into ranking order.
pub fn sort_by_rank(targets: &mut [ScoredTarget]) {
    targets.sort_by(ScoredTarget::ranking);
}

/// Replicas assigned to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationPlacement {
    pub cluster: String,
    pub workspace: String,
    pub replicas: u32,
}

impl LocationPlacement {
    pub fn key(&self) -> String {
        format!("{}/{}", self.workspace, self.cluster)
    }
}

/// How the decision was reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingResult {
    pub algorithm: String,
    pub duration_ms: u64,
    pub iterations: u32,
    pub clusters_evaluated: usize,
    pub clusters_feasible: usize,
}

/// Auditable record of where a workload's replicas go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub id: String,
    /// Workload key.
    pub workload: String,
    pub policy: String,
    pub strategy: PlacementStrategy,
    /// Ordered by rank.
    pub target_clusters: Vec<LocationPlacement>,
    #[serde(default)]
    pub policy_evaluations: Vec<EvaluationResult>,
    pub scheduling: SchedulingResult,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl PlacementDecision {
    pub fn total_replicas(&self) -> u32 {
        self.target_clusters.iter().map(|p| p.replicas).sum()
    }

    /// Replicas assigned to a target key, 0 when absent.
    pub fn replicas_for(&self, key: &str) -> u32 {
        self.target_clusters
            .iter()
            .find(|p| p.key() == key)
            .map_or(0, |p| p.replicas)
    }

    /// The decision as a distribution map.
    pub fn distribution(&self) -> Distribution {
        self.target_clusters
            .iter()
            .map(|p| (p.key(), p.replicas))
            .collect()
    }
}
