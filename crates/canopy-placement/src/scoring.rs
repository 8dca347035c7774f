//! Scorer plugins and the weighted scoring framework.
//!
//! A [`ScorerPlugin`] turns one feasible target into a score in `[0, 100]`.
//! [`ScoringFramework`] runs every configured plugin, combines their scores
//! as `Σ(wᵢ·sᵢ) / Σwᵢ` and normalizes the resulting vector. Plugins are
//! built by name through a [`ScorerRegistry`] from plain-data
//! [`ScorerConfig`] entries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use canopy_types::{ClusterTarget, EvaluationResult, Workload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlacementError, PlacementResult};
use crate::resources;

pub const RESOURCE_UTILIZATION: &str = "resource-utilization";
pub const LOCALITY: &str = "locality";
pub const LOAD_BALANCING: &str = "load-balancing";
pub const AFFINITY: &str = "affinity";

/// Score given when a plugin has nothing to judge by.
const NEUTRAL: f64 = 50.0;

/// Everything a plugin may look at when scoring one target.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub workload: &'a Workload,
    pub target: &'a ClusterTarget,
    pub evaluation: &'a EvaluationResult,
    /// All candidate targets, including `target`.
    pub peers: &'a [ClusterTarget],
}

fn default_weight() -> f64 {
    1.0
}

/// Plain-data configuration of one scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Plugin-specific parameters.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl ScorerConfig {
    pub fn new(name: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    fn params<T: DeserializeOwned + Default>(&self) -> PlacementResult<T> {
        if self.params.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.params.clone()).map_err(|e| PlacementError::ScorerConfig {
            scorer: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Scorers used when a configuration names none.
pub fn default_scorers() -> Vec<ScorerConfig> {
    vec![
        ScorerConfig::new(RESOURCE_UTILIZATION, 1.0),
        ScorerConfig::new(LOAD_BALANCING, 1.0),
        ScorerConfig::new(AFFINITY, 2.0),
    ]
}

/// A pluggable scoring function.
pub trait ScorerPlugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn weight(&self) -> f64;

    /// Apply configuration. Called once, before [`validate`](Self::validate).
    fn initialize(&mut self, config: &ScorerConfig) -> PlacementResult<()>;

    fn validate(&self) -> PlacementResult<()> {
        Ok(())
    }

    /// Score in `[0, 100]`; out-of-range values are clamped by the framework.
    fn score(&self, input: &ScoreInput<'_>) -> PlacementResult<f64>;
}

fn config_error(scorer: &str, reason: impl Into<String>) -> PlacementError {
    PlacementError::ScorerConfig {
        scorer: scorer.to_string(),
        reason: reason.into(),
    }
}

fn check_weight(name: &str, weight: f64) -> PlacementResult<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(config_error(name, format!("weight must be a non-negative number, got {weight}")));
    }
    Ok(())
}

fn check_score(name: &str, what: &str, score: f64) -> PlacementResult<()> {
    if !(0.0..=100.0).contains(&score) {
        return Err(config_error(name, format!("{what} score {score} outside [0, 100]")));
    }
    Ok(())
}

// ── Resource utilization ─────────────────────────────────────────────

/// One point of a utilization → score curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapePoint {
    pub utilization: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ResourceUtilizationParams {
    target_utilization: f64,
    shape: Vec<ShapePoint>,
    resources: Vec<String>,
}

impl Default for ResourceUtilizationParams {
    fn default() -> Self {
        Self {
            target_utilization: 0.7,
            shape: Vec::new(),
            resources: Vec::new(),
        }
    }
}

/// Rewards targets whose projected utilization lands near a target value.
///
/// With a `shape` table the score is interpolated linearly between points
/// instead.
#[derive(Debug, Clone)]
pub struct ResourceUtilizationScorer {
    weight: f64,
    params: ResourceUtilizationParams,
}

impl Default for ResourceUtilizationScorer {
    fn default() -> Self {
        Self {
            weight: 1.0,
            params: ResourceUtilizationParams::default(),
        }
    }
}

impl ResourceUtilizationScorer {
    fn shaped(&self, utilization: f64) -> f64 {
        let shape = &self.params.shape;
        let Some(first) = shape.first() else {
            let t = self.params.target_utilization;
            let span = t.max(1.0 - t);
            return 100.0 * (1.0 - (utilization - t).abs() / span);
        };
        if utilization <= first.utilization {
            return first.score;
        }
        for pair in shape.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if utilization <= hi.utilization {
                let frac = (utilization - lo.utilization) / (hi.utilization - lo.utilization);
                return lo.score + frac * (hi.score - lo.score);
            }
        }
        shape.last().map_or(NEUTRAL, |p| p.score)
    }
}

impl ScorerPlugin for ResourceUtilizationScorer {
    fn name(&self) -> &str {
        RESOURCE_UTILIZATION
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn initialize(&mut self, config: &ScorerConfig) -> PlacementResult<()> {
        self.weight = config.weight;
        self.params = config.params()?;
        Ok(())
    }

    fn validate(&self) -> PlacementResult<()> {
        check_weight(self.name(), self.weight)?;
        let t = self.params.target_utilization;
        if !(t > 0.0 && t <= 1.0) {
            return Err(config_error(self.name(), format!("target_utilization {t} outside (0, 1]")));
        }
        for point in &self.params.shape {
            if !(0.0..=1.0).contains(&point.utilization) {
                return Err(config_error(
                    self.name(),
                    format!("shape utilization {} outside [0, 1]", point.utilization),
                ));
            }
            check_score(self.name(), "shape", point.score)?;
        }
        if self
            .params
            .shape
            .windows(2)
            .any(|p| p[1].utilization <= p[0].utilization)
        {
            return Err(config_error(self.name(), "shape utilizations must be strictly ascending"));
        }
        Ok(())
    }

    fn score(&self, input: &ScoreInput<'_>) -> PlacementResult<f64> {
        let per_replica = resources::requirements(input.workload)?;
        let projected = resources::projected_utilization(input.target, &per_replica, 1)?;
        let dims: Vec<&f64> = if self.params.resources.is_empty() {
            projected.values().collect()
        } else {
            self.params
                .resources
                .iter()
                .filter_map(|r| projected.get(r))
                .collect()
        };
        if dims.is_empty() {
            return Ok(NEUTRAL);
        }
        Ok(dims.iter().map(|u| self.shaped(**u)).sum::<f64>() / dims.len() as f64)
    }
}

// ── Locality ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct LocalityParams {
    regions: BTreeMap<String, f64>,
    zones: BTreeMap<String, f64>,
    default_score: f64,
}

impl Default for LocalityParams {
    fn default() -> Self {
        Self {
            regions: BTreeMap::new(),
            zones: BTreeMap::new(),
            default_score: NEUTRAL,
        }
    }
}

/// Scores by a preference map over zones, then regions.
#[derive(Debug, Clone)]
pub struct LocalityScorer {
    weight: f64,
    params: LocalityParams,
}

impl Default for LocalityScorer {
    fn default() -> Self {
        Self {
            weight: 1.0,
            params: LocalityParams::default(),
        }
    }
}

impl ScorerPlugin for LocalityScorer {
    fn name(&self) -> &str {
        LOCALITY
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn initialize(&mut self, config: &ScorerConfig) -> PlacementResult<()> {
        self.weight = config.weight;
        self.params = config.params()?;
        Ok(())
    }

    fn validate(&self) -> PlacementResult<()> {
        check_weight(self.name(), self.weight)?;
        check_score(self.name(), "default", self.params.default_score)?;
        for (k, v) in self.params.regions.iter().chain(&self.params.zones) {
            check_score(self.name(), k, *v)?;
        }
        Ok(())
    }

    fn score(&self, input: &ScoreInput<'_>) -> PlacementResult<f64> {
        let location = input.target.location.as_ref();
        let zone = location
            .and_then(|l| l.zone.as_ref())
            .and_then(|z| self.params.zones.get(z));
        let region = location
            .and_then(|l| l.region.as_ref())
            .and_then(|r| self.params.regions.get(r));
        Ok(zone.or(region).copied().unwrap_or(self.params.default_score))
    }
}

// ── Load balancing ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceMode {
    /// Prefer the least utilized target.
    #[default]
    Even,
    /// Like `Even`, with per-resource weights.
    Weighted,
    /// Prefer targets with the most free capacity relative to their peers.
    CapacityBased,
    /// Penalize targets a replica would push past a utilization threshold.
    MinimizeHotspots,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct LoadBalancingParams {
    mode: BalanceMode,
    weights: BTreeMap<String, f64>,
    hotspot_threshold: f64,
}

impl Default for LoadBalancingParams {
    fn default() -> Self {
        Self {
            mode: BalanceMode::Even,
            weights: BTreeMap::new(),
            hotspot_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadBalancingScorer {
    weight: f64,
    params: LoadBalancingParams,
}

impl Default for LoadBalancingScorer {
    fn default() -> Self {
        Self {
            weight: 1.0,
            params: LoadBalancingParams::default(),
        }
    }
}

fn current_utilization(target: &ClusterTarget) -> PlacementResult<BTreeMap<String, f64>> {
    resources::projected_utilization(target, &Default::default(), 0)
}

impl LoadBalancingScorer {
    fn weighted_headroom(&self, target: &ClusterTarget) -> PlacementResult<Option<f64>> {
        let util = current_utilization(target)?;
        let (mut sum, mut total) = (0.0, 0.0);
        for (name, u) in &util {
            let w = match self.params.mode {
                BalanceMode::Weighted => self.params.weights.get(name).copied().unwrap_or(0.0),
                _ => 1.0,
            };
            sum += w * (1.0 - u);
            total += w;
        }
        Ok((total > 0.0).then(|| 100.0 * sum / total))
    }

    fn capacity_share(&self, input: &ScoreInput<'_>) -> PlacementResult<Option<f64>> {
        let mine = input.target.available()?;
        if mine.is_empty() {
            return Ok(None);
        }
        let mut shares = Vec::with_capacity(mine.len());
        for (name, free) in &mine {
            let mut best = *free;
            for peer in input.peers {
                if let Some(v) = peer.available()?.get(name) {
                    best = best.max(*v);
                }
            }
            shares.push(if best > 0.0 { free / best } else { 0.0 });
        }
        Ok(Some(100.0 * shares.iter().sum::<f64>() / shares.len() as f64))
    }

    fn hotspot(&self, input: &ScoreInput<'_>) -> PlacementResult<Option<f64>> {
        let per_replica = resources::requirements(input.workload)?;
        let projected = resources::projected_utilization(input.target, &per_replica, 1)?;
        let Some(peak) = projected.values().copied().reduce(f64::max) else {
            return Ok(None);
        };
        let t = self.params.hotspot_threshold;
        Ok(Some(if peak <= t {
            100.0 - NEUTRAL * peak / t
        } else {
            NEUTRAL * (1.0 - peak) / (1.0 - t)
        }))
    }
}

impl ScorerPlugin for LoadBalancingScorer {
    fn name(&self) -> &str {
        LOAD_BALANCING
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn initialize(&mut self, config: &ScorerConfig) -> PlacementResult<()> {
        self.weight = config.weight;
        self.params = config.params()?;
        Ok(())
    }

    fn validate(&self) -> PlacementResult<()> {
        check_weight(self.name(), self.weight)?;
        let t = self.params.hotspot_threshold;
        if !(t > 0.0 && t < 1.0) {
            return Err(config_error(self.name(), format!("hotspot_threshold {t} outside (0, 1)")));
        }
        if self.params.weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(config_error(self.name(), "resource weights must be non-negative"));
        }
        if self.params.mode == BalanceMode::Weighted && self.params.weights.is_empty() {
            return Err(config_error(self.name(), "weighted mode needs resource weights"));
        }
        Ok(())
    }

    fn score(&self, input: &ScoreInput<'_>) -> PlacementResult<f64> {
        let score = match self.params.mode {
            BalanceMode::Even | BalanceMode::Weighted => self.weighted_headroom(input.target)?,
            BalanceMode::CapacityBased => self.capacity_share(input)?,
            BalanceMode::MinimizeHotspots => self.hotspot(input)?,
        };
        Ok(score.unwrap_or(NEUTRAL))
    }
}

// ── Affinity ─────────────────────────────────────────────────────────

/// Passes through the soft score computed during constraint evaluation:
/// preferred affinity terms, preference rules and soft taints.
#[derive(Debug, Clone)]
pub struct AffinityScorer {
    weight: f64,
}

impl Default for AffinityScorer {
    fn default() -> Self {
        Self { weight: 1.0 }
    }
}

impl ScorerPlugin for AffinityScorer {
    fn name(&self) -> &str {
        AFFINITY
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn initialize(&mut self, config: &ScorerConfig) -> PlacementResult<()> {
        self.weight = config.weight;
        Ok(())
    }

    fn validate(&self) -> PlacementResult<()> {
        check_weight(self.name(), self.weight)
    }

    fn score(&self, input: &ScoreInput<'_>) -> PlacementResult<f64> {
        Ok(input.evaluation.score)
    }
}

// ── Custom ───────────────────────────────────────────────────────────

pub type ScoreFn = Arc<dyn Fn(&ScoreInput<'_>) -> f64 + Send + Sync>;

/// Wraps a user-supplied scoring function.
#[derive(Clone)]
pub struct CustomScorer {
    name: String,
    weight: f64,
    func: ScoreFn,
}

impl CustomScorer {
    pub fn new(name: &str, func: ScoreFn) -> Self {
        Self {
            name: name.to_string(),
            weight: 1.0,
            func,
        }
    }
}

impl fmt::Debug for CustomScorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomScorer")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

impl ScorerPlugin for CustomScorer {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn initialize(&mut self, config: &ScorerConfig) -> PlacementResult<()> {
        self.weight = config.weight;
        Ok(())
    }

    fn validate(&self) -> PlacementResult<()> {
        check_weight(&self.name, self.weight)
    }

    fn score(&self, input: &ScoreInput<'_>) -> PlacementResult<f64> {
        Ok((self.func)(input))
    }
}

// ── Registry ─────────────────────────────────────────────────────────

pub type ScorerFactory = Arc<dyn Fn() -> Box<dyn ScorerPlugin> + Send + Sync>;

fn factory<P: ScorerPlugin + Default + 'static>() -> ScorerFactory {
    Arc::new(|| Box::new(P::default()) as Box<dyn ScorerPlugin>)
}

/// Name → factory lookup for scorer plugins.
#[derive(Clone, Default)]
pub struct ScorerRegistry {
    factories: BTreeMap<String, ScorerFactory>,
}

impl fmt::Debug for ScorerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScorerRegistry")
            .field("scorers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ScorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(RESOURCE_UTILIZATION, factory::<ResourceUtilizationScorer>());
        registry.register(LOCALITY, factory::<LocalityScorer>());
        registry.register(LOAD_BALANCING, factory::<LoadBalancingScorer>());
        registry.register(AFFINITY, factory::<AffinityScorer>());
        registry
    }

    /// Register or replace a factory.
    pub fn register(&mut self, name: &str, factory: ScorerFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Register a custom scoring function under `name`.
    pub fn register_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&ScoreInput<'_>) -> f64 + Send + Sync + 'static,
    {
        let owned = name.to_string();
        let func: ScoreFn = Arc::new(func);
        self.register(
            name,
            Arc::new(move || Box::new(CustomScorer::new(&owned, func.clone())) as Box<dyn ScorerPlugin>),
        );
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate, initialize and validate one plugin.
    pub fn build(&self, config: &ScorerConfig) -> PlacementResult<Box<dyn ScorerPlugin>> {
        let factory = self
            .factories
            .get(&config.name)
            .ok_or_else(|| PlacementError::UnknownScorer(config.name.clone()))?;
        let mut plugin = factory();
        plugin.initialize(config)?;
        plugin.validate()?;
        Ok(plugin)
    }

    pub fn build_framework(
        &self,
        configs: &[ScorerConfig],
        normalization: Normalization,
    ) -> PlacementResult<ScoringFramework> {
        let mut framework = ScoringFramework::new(normalization);
        for config in configs {
            framework.add_plugin(self.build(config)?);
        }
        Ok(framework)
    }
}

// ── Normalization ────────────────────────────────────────────────────

/// How a vector of combined scores is mapped into `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    /// Min-max rescale; a constant vector is left as is.
    Linear,
    /// `ln(1 + s) / ln(101)`, compressing differences among high scores.
    Logarithmic,
    /// Share of other scores strictly below.
    Percentile,
    /// Clamp only.
    #[default]
    None,
}

/// Normalize scores into `[0, 100]`. Order is preserved: `a > b` implies
/// `f(a) >= f(b)`, and equal inputs map to equal outputs.
pub fn normalize_scores(scores: &[f64], normalization: Normalization) -> Vec<f64> {
    let clamped: Vec<f64> = scores.iter().map(|s| s.clamp(0.0, 100.0)).collect();
    match normalization {
        Normalization::None => clamped,
        Normalization::Linear => {
            let min = clamped.iter().copied().fold(f64::INFINITY, f64::min);
            let max = clamped.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max - min <= f64::EPSILON {
                return clamped;
            }
            clamped.iter().map(|s| 100.0 * (s - min) / (max - min)).collect()
        }
        Normalization::Logarithmic => clamped
            .iter()
            .map(|s| 100.0 * (1.0 + s).ln() / 101f64.ln())
            .collect(),
        Normalization::Percentile => {
            if clamped.len() < 2 {
                return vec![100.0; clamped.len()];
            }
            let denom = (clamped.len() - 1) as f64;
            clamped
                .iter()
                .map(|s| {
                    let below = clamped.iter().filter(|o| *o < s).count();
                    100.0 * below as f64 / denom
                })
                .collect()
        }
    }
}

// ── Framework ────────────────────────────────────────────────────────

/// Combined score of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetScore {
    pub target: String,
    /// Weighted average before normalization.
    pub raw: f64,
    /// Normalized score in `[0, 100]`.
    pub score: f64,
    /// Per-plugin scores after clamping.
    pub breakdown: BTreeMap<String, f64>,
}

/// Runs a set of plugins and combines their scores.
#[derive(Debug, Default)]
pub struct ScoringFramework {
    plugins: Vec<Box<dyn ScorerPlugin>>,
    normalization: Normalization,
}

impl ScoringFramework {
    pub fn new(normalization: Normalization) -> Self {
        Self {
            plugins: Vec::new(),
            normalization,
        }
    }

    pub fn add_plugin(&mut self, plugin: Box<dyn ScorerPlugin>) {
        self.plugins.push(plugin);
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Weighted average of every plugin's score. Without plugins (or with
    /// all weights zero) the evaluation's soft score is used.
    pub fn score_target(&self, input: &ScoreInput<'_>) -> PlacementResult<TargetScore> {
        let mut breakdown = BTreeMap::new();
        let (mut sum, mut weights) = (0.0, 0.0);
        for plugin in &self.plugins {
            let s = plugin.score(input)?;
            if !s.is_finite() {
                return Err(PlacementError::Scoring {
                    scorer: plugin.name().to_string(),
                    target: input.target.key(),
                    reason: format!("non-finite score {s}"),
                });
            }
            let s = s.clamp(0.0, 100.0);
            sum += plugin.weight() * s;
            weights += plugin.weight();
            breakdown.insert(plugin.name().to_string(), s);
        }
        let raw = if weights > 0.0 {
            sum / weights
        } else {
            input.evaluation.score.clamp(0.0, 100.0)
        };
        Ok(TargetScore {
            target: input.target.key(),
            raw,
            score: raw,
            breakdown,
        })
    }

    /// Score feasible targets and normalize the vector. `peers` is the full
    /// candidate list handed to every plugin.
    pub fn score_targets(
        &self,
        workload: &Workload,
        feasible: &[(&ClusterTarget, &EvaluationResult)],
        peers: &[ClusterTarget],
    ) -> PlacementResult<Vec<TargetScore>> {
        let mut scores = feasible
            .iter()
            .map(|(target, evaluation)| {
                self.score_target(&ScoreInput {
                    workload,
                    target,
                    evaluation,
                    peers,
                })
            })
            .collect::<PlacementResult<Vec<_>>>()?;

        let raw: Vec<f64> = scores.iter().map(|s| s.raw).collect();
        for (s, n) in scores.iter_mut().zip(normalize_scores(&raw, self.normalization)) {
            s.score = n;
        }
        debug!(
            workload = %workload.name,
            targets = scores.len(),
            normalization = ?self.normalization,
            "scored targets"
        );
        Ok(scores)
    }
}
