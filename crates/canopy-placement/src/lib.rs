//! Canopy placement core: deciding where workload replicas may go and how
//! many land on each target.
//!
//! Everything here is synchronous and pure. Discovery of targets lives in
//! `canopy-discovery`; orchestration of the filter/score/bind pipeline lives
//! in `canopy-scheduler`.
//!
//! # Components
//!
//! - **`constraints`**: hard filters and soft preferences for one target
//! - **`expr`**: the policy rule language
//! - **`scoring`**: scorer plugins, registry, weighted framework, normalization
//! - **`strategy`**: distribution strategies and churn-minimizing rebalance
//! - **`preemption`**: eviction proposals for high-priority workloads
//! - **`resources`**: quantity arithmetic between workloads and targets

pub mod constraints;
pub mod error;
pub mod expr;
pub mod preemption;
pub mod resources;
pub mod scoring;
pub mod strategy;

pub use constraints::{
    EvalOptions, ResourceFit, SpreadCheck, check_resources, check_spread, domain_counts,
    evaluate_target, evaluate_target_with, evaluate_targets, is_tolerated, skew,
    spread_violations, validate_policy,
};
pub use error::{PlacementError, PlacementResult};
pub use expr::{ExprError, Value, evaluate, evaluate_bool};
pub use preemption::{PreemptionPlan, Victim, plan_preemption};
pub use scoring::{
    BalanceMode, Normalization, ScoreInput, ScorerConfig, ScorerPlugin, ScorerRegistry,
    ScoringFramework, TargetScore, default_scorers, normalize_scores,
};
pub use strategy::{
    DistributionStrategy, MultiMode, StrategyConfig, build_strategy, minimize_churn, placed,
    strategy_for,
};
