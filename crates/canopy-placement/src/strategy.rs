//! Distribution strategies: how many replicas land on each target.
//!
//! Strategies receive targets already ranked by score (see
//! [`ScoredTarget::ranking`]) and never place more replicas on a target
//! than its `max_replicas`. When capacity runs out they return a partial
//! distribution; callers decide whether a shortfall is fatal.

use std::collections::BTreeMap;
use std::fmt;

use canopy_types::{
    CLUSTER_KEY, ClusterTarget, Distribution, PlacementPolicy, PlacementStrategy, ScoredTarget, SpreadConstraint,
    ZONE_KEY, sort_by_rank,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constraints::{domain_counts, skew};
use crate::error::{PlacementError, PlacementResult};

pub const MULTI: &str = PlacementStrategy::Multi.as_str();

/// Replicas placed in total.
pub fn placed(distribution: &Distribution) -> u32 {
    distribution.values().sum()
}

fn ranked(targets: &[ScoredTarget]) -> Vec<ScoredTarget> {
    let mut out = targets.to_vec();
    sort_by_rank(&mut out);
    out
}

fn count(distribution: &Distribution, key: &str) -> u32 {
    distribution.get(key).copied().unwrap_or(0)
}

fn add(distribution: &mut Distribution, key: &str, n: u32) {
    if n > 0 {
        *distribution.entry(key.to_string()).or_insert(0) += n;
    }
}

fn room_left(target: &ScoredTarget, distribution: &Distribution) -> u32 {
    target.room().saturating_sub(count(distribution, &target.key()))
}

/// Decides how `total` replicas are split over ranked targets.
pub trait DistributionStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn compute_distribution(
        &self,
        total: u32,
        targets: &[ScoredTarget],
        constraints: &[SpreadConstraint],
    ) -> Distribution;

    /// Redistribute the replicas of `current` over `targets`, moving as few
    /// as possible.
    fn rebalance(
        &self,
        current: &Distribution,
        targets: &[ScoredTarget],
        constraints: &[SpreadConstraint],
    ) -> Distribution {
        self.rebalance_to(placed(current), current, targets, constraints)
    }

    /// Like [`rebalance`](Self::rebalance) with a new replica total.
    fn rebalance_to(
        &self,
        total: u32,
        current: &Distribution,
        targets: &[ScoredTarget],
        constraints: &[SpreadConstraint],
    ) -> Distribution {
        let desired = self.compute_distribution(total, targets, constraints);
        minimize_churn(total, current, &desired, targets, constraints)
    }
}

// ── Churn ────────────────────────────────────────────────────────────

/// Keep replicas where they are when the target survives, trim or top up
/// toward `desired`, and fall back to `desired` when the result would
/// break a hard spread constraint.
pub fn minimize_churn(
    total: u32,
    current: &Distribution,
    desired: &Distribution,
    targets: &[ScoredTarget],
    constraints: &[SpreadConstraint],
) -> Distribution {
    let ranked = ranked(targets);
    let mut kept = Distribution::new();
    for t in &ranked {
        let key = t.key();
        add(&mut kept, &key, count(current, &key).min(t.room()));
    }

    // Scale down: shed surplus over `desired` first, lowest rank first.
    let mut excess = placed(&kept).saturating_sub(total);
    for only_surplus in [true, false] {
        for t in ranked.iter().rev() {
            if excess == 0 {
                break;
            }
            let key = t.key();
            let have = count(&kept, &key);
            let floor = if only_surplus { count(desired, &key) } else { 0 };
            let drop = have.saturating_sub(floor).min(excess);
            if drop > 0 {
                excess -= drop;
                set(&mut kept, &key, have - drop);
            }
        }
    }

    // Scale up or replace lost replicas: deficits against `desired` first.
    let mut missing = total.saturating_sub(placed(&kept));
    for toward_desired in [true, false] {
        for t in &ranked {
            if missing == 0 {
                break;
            }
            let key = t.key();
            let have = count(&kept, &key);
            let cap = if toward_desired {
                count(desired, &key).saturating_sub(have)
            } else {
                room_left(t, &kept)
            };
            let n = cap.min(missing).min(room_left(t, &kept));
            add(&mut kept, &key, n);
            missing -= n;
        }
    }

    let all: Vec<_> = ranked.iter().map(|t| t.target.clone()).collect();
    if !crate::constraints::spread_violations(constraints, &kept, &all).is_empty() {
        debug!("churn-minimal distribution breaks spread, using fresh distribution");
        return desired.clone();
    }
    kept
}

fn set(distribution: &mut Distribution, key: &str, n: u32) {
    if n == 0 {
        distribution.remove(key);
    } else {
        distribution.insert(key.to_string(), n);
    }
}

// ── Spread ───────────────────────────────────────────────────────────

fn domain_of(target: &ScoredTarget, key: &str) -> Option<String> {
    target.target.topology_value(key).map(str::to_string)
}

/// Place `remaining` replicas one at a time on the target whose domains
/// (for each key in order) currently hold the fewest replicas. Targets
/// without a value for a key are used last.
fn spread_fill(distribution: &mut Distribution, remaining: u32, ranked: &[ScoredTarget], keys: &[&str]) {
    let mut domain_counts: Vec<BTreeMap<String, u32>> = keys
        .iter()
        .map(|key| {
            let mut counts = BTreeMap::new();
            for t in ranked {
                if let Some(d) = domain_of(t, key) {
                    *counts.entry(d).or_insert(0) += count(distribution, &t.key());
                }
            }
            counts
        })
        .collect();

    for _ in 0..remaining {
        let pick = ranked
            .iter()
            .enumerate()
            .filter(|(_, t)| room_left(t, distribution) > 0)
            .min_by_key(|(i, t)| {
                let load: Vec<u32> = keys
                    .iter()
                    .zip(&domain_counts)
                    .map(|(key, counts)| {
                        domain_of(t, key)
                            .and_then(|d| counts.get(&d).copied())
                            .unwrap_or(u32::MAX)
                    })
                    .collect();
                (load, count(distribution, &t.key()), *i)
            })
            .map(|(_, t)| t);
        let Some(t) = pick else {
            break;
        };
        add(distribution, &t.key(), 1);
        for (key, counts) in keys.iter().zip(domain_counts.iter_mut()) {
            if let Some(d) = domain_of(t, key) {
                *counts.entry(d).or_insert(0) += 1;
            }
        }
    }
}

/// Even spread across the topology domains of every spread constraint,
/// then across targets.
#[derive(Debug, Clone, Default)]
pub struct SpreadStrategy;

impl DistributionStrategy for SpreadStrategy {
    fn name(&self) -> &str {
        PlacementStrategy::Spread.as_str()
    }

    fn compute_distribution(
        &self,
        total: u32,
        targets: &[ScoredTarget],
        constraints: &[SpreadConstraint],
    ) -> Distribution {
        let ranked = ranked(targets);
        let keys: Vec<&str> = constraints.iter().map(|c| c.topology_key.as_str()).collect();
        let mut dist = Distribution::new();
        spread_fill(&mut dist, total, &ranked, &keys);
        dist
    }
}

// ── Binpack ──────────────────────────────────────────────────────────

/// Fill the best targets first.
///
/// The first pass fills each target to `packing_efficiency` of its room;
/// a second pass uses whatever room is left. A replica that would push a
/// hard spread constraint past its `max_skew` goes to the next target
/// instead; only when no such target remains is spread given up.
#[derive(Debug, Clone)]
pub struct BinpackStrategy {
    pub packing_efficiency: f64,
}

impl Default for BinpackStrategy {
    fn default() -> Self {
        Self {
            packing_efficiency: 0.8,
        }
    }
}

impl DistributionStrategy for BinpackStrategy {
    fn name(&self) -> &str {
        PlacementStrategy::Binpack.as_str()
    }

    fn compute_distribution(
        &self,
        total: u32,
        targets: &[ScoredTarget],
        constraints: &[SpreadConstraint],
    ) -> Distribution {
        let ranked = ranked(targets);
        let hard: Vec<&SpreadConstraint> = constraints.iter().filter(|c| c.is_hard()).collect();
        let all: Vec<ClusterTarget> = ranked.iter().map(|t| t.target.clone()).collect();
        let soft_cap = |t: &ScoredTarget| {
            let room = t.room();
            if room == u32::MAX {
                room
            } else {
                ((f64::from(room) * self.packing_efficiency).floor() as u32).max(room.min(1))
            }
        };

        let mut dist = Distribution::new();
        let mut remaining = total;
        for (bounded, keep_spread) in [(true, true), (false, true), (false, false)] {
            while remaining > 0 {
                let pick = ranked.iter().find(|t| {
                    let cap = if bounded { soft_cap(t) } else { t.room() };
                    count(&dist, &t.key()) < cap
                        && (!keep_spread || keeps_hard_spread(&hard, &dist, &t.key(), &all))
                });
                let Some(t) = pick else {
                    break;
                };
                add(&mut dist, &t.key(), 1);
                remaining -= 1;
            }
        }
        dist
    }
}

/// Whether one more replica on `key` keeps every hard constraint within
/// its `max_skew`.
fn keeps_hard_spread(
    hard: &[&SpreadConstraint],
    distribution: &Distribution,
    key: &str,
    targets: &[ClusterTarget],
) -> bool {
    if hard.is_empty() {
        return true;
    }
    let mut trial = distribution.clone();
    add(&mut trial, key, 1);
    hard.iter()
        .all(|c| skew(&domain_counts(&c.topology_key, &trial, targets)) <= c.max_skew)
}

// ── High availability ────────────────────────────────────────────────

/// Guarantee `min_per_domain` replicas in every failure domain before
/// spreading the rest.
#[derive(Debug, Clone)]
pub struct HighAvailabilityStrategy {
    pub domain_key: String,
    pub min_per_domain: u32,
}

impl Default for HighAvailabilityStrategy {
    fn default() -> Self {
        Self {
            domain_key: ZONE_KEY.to_string(),
            min_per_domain: 1,
        }
    }
}

impl HighAvailabilityStrategy {
    fn domain(&self, t: &ScoredTarget) -> String {
        domain_of(t, &self.domain_key).unwrap_or_else(|| format!("{CLUSTER_KEY}={}", t.key()))
    }
}

impl DistributionStrategy for HighAvailabilityStrategy {
    fn name(&self) -> &str {
        PlacementStrategy::HighAvailability.as_str()
    }

    fn compute_distribution(
        &self,
        total: u32,
        targets: &[ScoredTarget],
        constraints: &[SpreadConstraint],
    ) -> Distribution {
        let ranked = ranked(targets);
        let mut dist = Distribution::new();
        let mut remaining = total;

        // Domains in order of their best target.
        let mut domains: Vec<String> = Vec::new();
        for t in &ranked {
            let d = self.domain(t);
            if !domains.contains(&d) {
                domains.push(d);
            }
        }

        'domains: for domain in &domains {
            let mut need = self.min_per_domain;
            while need > 0 {
                if remaining == 0 {
                    break 'domains;
                }
                let Some(t) = ranked
                    .iter()
                    .filter(|t| &self.domain(t) == domain && room_left(t, &dist) > 0)
                    .min_by_key(|t| count(&dist, &t.key()))
                else {
                    break;
                };
                add(&mut dist, &t.key(), 1);
                need -= 1;
                remaining -= 1;
            }
        }

        let mut keys: Vec<&str> = vec![self.domain_key.as_str()];
        keys.extend(
            constraints
                .iter()
                .map(|c| c.topology_key.as_str())
                .filter(|k| *k != self.domain_key),
        );
        spread_fill(&mut dist, remaining, &ranked, &keys);
        dist
    }
}

// ── Singleton ────────────────────────────────────────────────────────

/// All replicas on one target: the preferred location if it is among the
/// candidates, else the target the fallback strategy loads most, else the
/// best target.
#[derive(Debug, Default)]
pub struct SingletonStrategy {
    /// Matched against target name, key, zone or region.
    pub preferred_location: Option<String>,
    pub fallback: Option<Box<dyn DistributionStrategy>>,
}

impl SingletonStrategy {
    fn matches(target: &ScoredTarget, location: &str) -> bool {
        let t = &target.target;
        t.name == location
            || t.key() == location
            || t.location.as_ref().is_some_and(|l| {
                l.zone.as_deref() == Some(location) || l.region.as_deref() == Some(location)
            })
    }
}

impl DistributionStrategy for SingletonStrategy {
    fn name(&self) -> &str {
        PlacementStrategy::Singleton.as_str()
    }

    fn compute_distribution(
        &self,
        total: u32,
        targets: &[ScoredTarget],
        constraints: &[SpreadConstraint],
    ) -> Distribution {
        let ranked = ranked(targets);
        let mut dist = Distribution::new();
        if total == 0 {
            return dist;
        }
        if let Some(location) = &self.preferred_location
            && let Some(t) = ranked
                .iter()
                .find(|t| Self::matches(t, location) && t.room() > 0)
        {
            add(&mut dist, &t.key(), total.min(t.room()));
            return dist;
        }
        let proposal = match &self.fallback {
            Some(fallback) => fallback.compute_distribution(total, &ranked, constraints),
            None => Distribution::new(),
        };
        let chosen = ranked
            .iter()
            .filter(|t| count(&proposal, &t.key()) > 0)
            .enumerate()
            .min_by_key(|(i, t)| (std::cmp::Reverse(count(&proposal, &t.key())), *i))
            .map(|(_, t)| t)
            .or_else(|| ranked.iter().find(|t| t.room() > 0));
        if let Some(t) = chosen {
            add(&mut dist, &t.key(), total.min(t.room()));
        }
        dist
    }
}

// ── Multi ────────────────────────────────────────────────────────────

/// How a [`MultiStrategy`] combines its members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiMode {
    /// Weighted mean of member distributions, rounded by largest remainder.
    #[default]
    WeightedAverage,
    /// First member that places every replica without breaking spread.
    FirstMatch,
    /// Member with the highest replica-weighted mean score.
    BestScore,
    /// Targets chosen by a majority of members, shared in proportion.
    Consensus,
}

#[derive(Debug)]
pub struct MultiStrategy {
    pub mode: MultiMode,
    pub members: Vec<(Box<dyn DistributionStrategy>, f64)>,
}

/// Split `total` by `shares`, respecting each target's room. Fractions go
/// to the largest remainders; any leftover fills targets in `ranked` order.
fn apportion(total: u32, shares: &BTreeMap<String, f64>, ranked: &[ScoredTarget]) -> Distribution {
    let mut dist = Distribution::new();
    let sum: f64 = shares.values().sum();
    if total == 0 || sum <= 0.0 {
        return dist;
    }
    let mut remainders = Vec::new();
    for t in ranked {
        let key = t.key();
        let Some(share) = shares.get(&key) else {
            continue;
        };
        let exact = f64::from(total) * share / sum;
        let whole = (exact.floor() as u32).min(t.room());
        add(&mut dist, &key, whole);
        remainders.push((exact - exact.floor(), t));
    }
    remainders.sort_by(|a, b| b.0.total_cmp(&a.0));
    let mut missing = total.saturating_sub(placed(&dist));
    for (_, t) in remainders {
        if missing == 0 {
            break;
        }
        if room_left(t, &dist) > 0 {
            add(&mut dist, &t.key(), 1);
            missing -= 1;
        }
    }
    for t in ranked {
        if missing == 0 {
            break;
        }
        let n = room_left(t, &dist).min(missing);
        add(&mut dist, &t.key(), n);
        missing -= n;
    }
    dist
}

fn mean_score(distribution: &Distribution, ranked: &[ScoredTarget]) -> f64 {
    let total = placed(distribution);
    if total == 0 {
        return 0.0;
    }
    let weighted: f64 = ranked
        .iter()
        .map(|t| f64::from(t.score) * f64::from(count(distribution, &t.key())))
        .sum();
    weighted / f64::from(total)
}

impl MultiStrategy {
    fn weighted_average(&self, total: u32, ranked: &[ScoredTarget], results: &[(Distribution, f64)]) -> Distribution {
        let mut shares: BTreeMap<String, f64> = BTreeMap::new();
        for (dist, weight) in results {
            for (key, n) in dist {
                *shares.entry(key.clone()).or_insert(0.0) += weight * f64::from(*n);
            }
        }
        apportion(total, &shares, ranked)
    }
}

impl DistributionStrategy for MultiStrategy {
    fn name(&self) -> &str {
        MULTI
    }

    fn compute_distribution(
        &self,
        total: u32,
        targets: &[ScoredTarget],
        constraints: &[SpreadConstraint],
    ) -> Distribution {
        let ranked = ranked(targets);
        let results: Vec<(Distribution, f64)> = self
            .members
            .iter()
            .map(|(s, w)| (s.compute_distribution(total, &ranked, constraints), *w))
            .collect();
        if results.is_empty() {
            return Distribution::new();
        }

        match self.mode {
            MultiMode::WeightedAverage => self.weighted_average(total, &ranked, &results),
            MultiMode::FirstMatch => {
                let all: Vec<_> = ranked.iter().map(|t| t.target.clone()).collect();
                results
                    .iter()
                    .find(|(d, _)| {
                        placed(d) == total
                            && crate::constraints::spread_violations(constraints, d, &all).is_empty()
                    })
                    .or_else(|| results.iter().max_by_key(|(d, _)| placed(d)))
                    .map(|(d, _)| d.clone())
                    .unwrap_or_default()
            }
            MultiMode::BestScore => {
                let mut best: Option<(&Distribution, (u32, f64))> = None;
                for (d, _) in &results {
                    let key = (placed(d), mean_score(d, &ranked));
                    if best.is_none_or(|(_, b)| key.0 > b.0 || (key.0 == b.0 && key.1 > b.1)) {
                        best = Some((d, key));
                    }
                }
                best.map(|(d, _)| d.clone()).unwrap_or_default()
            }
            MultiMode::Consensus => {
                let quorum = results.len() / 2 + 1;
                let mut shares: BTreeMap<String, f64> = BTreeMap::new();
                for t in &ranked {
                    let key = t.key();
                    let votes = results.iter().filter(|(d, _)| count(d, &key) > 0).count();
                    if votes >= quorum {
                        let mean = results.iter().map(|(d, _)| f64::from(count(d, &key))).sum::<f64>()
                            / results.len() as f64;
                        shares.insert(key, mean);
                    }
                }
                if shares.is_empty() {
                    return self.weighted_average(total, &ranked, &results);
                }
                let consensus: Vec<ScoredTarget> = ranked
                    .iter()
                    .filter(|t| shares.contains_key(&t.key()))
                    .cloned()
                    .collect();
                apportion(total, &shares, &consensus)
            }
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedStrategy {
    pub name: String,
    #[serde(default = "one")]
    pub weight: f64,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiConfig {
    pub mode: MultiMode,
    pub strategies: Vec<WeightedStrategy>,
}

/// Tunables for the built-in strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Strategy name overriding the policy's own choice.
    pub name: Option<String>,
    pub packing_efficiency: f64,
    pub domain_key: String,
    pub min_per_domain: u32,
    /// Strategy a singleton falls back to when its location is unavailable.
    pub singleton_fallback: Option<String>,
    pub multi: MultiConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: None,
            packing_efficiency: 0.8,
            domain_key: ZONE_KEY.to_string(),
            min_per_domain: 1,
            singleton_fallback: None,
            multi: MultiConfig::default(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> PlacementResult<()> {
        let bad = |strategy: &str, reason: String| PlacementError::StrategyConfig {
            strategy: strategy.to_string(),
            reason,
        };
        let e = self.packing_efficiency;
        if !(e > 0.0 && e <= 1.0) {
            return Err(bad("binpack", format!("packing_efficiency {e} outside (0, 1]")));
        }
        if self.domain_key.is_empty() {
            return Err(bad("high-availability", "domain_key is empty".into()));
        }
        if self.min_per_domain == 0 {
            return Err(bad("high-availability", "min_per_domain must be at least 1".into()));
        }
        if let Some(fallback) = &self.singleton_fallback
            && fallback == PlacementStrategy::Singleton.as_str()
        {
            return Err(bad("singleton", "singleton cannot fall back to itself".into()));
        }
        let singleton = PlacementStrategy::Singleton.as_str();
        if self.singleton_fallback.as_deref() == Some(MULTI)
            && self.multi.strategies.iter().any(|m| m.name == singleton)
        {
            return Err(bad(
                singleton,
                "singleton falls back to multi, which includes singleton".into(),
            ));
        }
        for member in &self.multi.strategies {
            if member.name == MULTI {
                return Err(bad(MULTI, "multi strategies cannot nest".into()));
            }
            if !member.weight.is_finite() || member.weight <= 0.0 {
                return Err(bad(MULTI, format!("weight of {} must be positive", member.name)));
            }
        }
        Ok(())
    }
}

/// Resolve the strategy for a policy: the configured override if any,
/// otherwise the policy's own.
pub fn strategy_for(policy: &PlacementPolicy, config: &StrategyConfig) -> PlacementResult<Box<dyn DistributionStrategy>> {
    let name = config
        .name
        .as_deref()
        .unwrap_or_else(|| policy.strategy.as_str());
    build_strategy(name, config, policy)
}

/// Build a strategy by name.
pub fn build_strategy(
    name: &str,
    config: &StrategyConfig,
    policy: &PlacementPolicy,
) -> PlacementResult<Box<dyn DistributionStrategy>> {
    config.validate()?;
    let strategy: Box<dyn DistributionStrategy> = match name {
        "spread" => Box::new(SpreadStrategy),
        "binpack" => Box::new(BinpackStrategy {
            packing_efficiency: config.packing_efficiency,
        }),
        "high-availability" => Box::new(HighAvailabilityStrategy {
            domain_key: config.domain_key.clone(),
            min_per_domain: config.min_per_domain,
        }),
        "singleton" => Box::new(SingletonStrategy {
            preferred_location: policy.preferred_location.clone(),
            fallback: config
                .singleton_fallback
                .as_deref()
                .map(|f| build_strategy(f, config, policy))
                .transpose()?,
        }),
        MULTI => {
            if config.multi.strategies.is_empty() {
                return Err(PlacementError::StrategyConfig {
                    strategy: MULTI.to_string(),
                    reason: "no member strategies".into(),
                });
            }
            let members = config
                .multi
                .strategies
                .iter()
                .map(|m| Ok((build_strategy(&m.name, config, policy)?, m.weight)))
                .collect::<PlacementResult<Vec<_>>>()?;
            Box::new(MultiStrategy {
                mode: config.multi.mode,
                members,
            })
        }
        other => return Err(PlacementError::UnknownStrategy(other.to_string())),
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_types::{ClusterTarget, Location, WhenUnsatisfiable};

    fn scored(name: &str, zone: &str, score: u32) -> ScoredTarget {
        ScoredTarget::new(
            ClusterTarget::new(name, "root").with_location(Location::new("r1", zone)),
            score,
        )
    }

    fn dist(pairs: &[(&str, u32)]) -> Distribution {
        pairs.iter().map(|(k, v)| (format!("root/{k}"), *v)).collect()
    }

    fn zone_spread() -> Vec<SpreadConstraint> {
        vec![SpreadConstraint::new("zone", 1)]
    }

    // ── Spread ───────────────────────────────────────────────────────

    #[test]
    fn spread_balances_zones() {
        let targets = [scored("a", "z1", 50), scored("b", "z1", 50), scored("c", "z2", 50)];
        let d = SpreadStrategy.compute_distribution(4, &targets, &zone_spread());
        assert_eq!(placed(&d), 4);
        assert_eq!(count(&d, "root/a") + count(&d, "root/b"), 2);
        assert_eq!(count(&d, "root/c"), 2);
    }

    #[test]
    fn spread_without_constraints_round_robins() {
        let targets = [scored("a", "z1", 90), scored("b", "z1", 50), scored("c", "z2", 10)];
        assert_eq!(
            SpreadStrategy.compute_distribution(4, &targets, &[]),
            dist(&[("a", 2), ("b", 1), ("c", 1)])
        );
    }

    #[test]
    fn spread_respects_room() {
        let targets = [
            scored("a", "z1", 50).with_max_replicas(1),
            scored("b", "z2", 50).with_max_replicas(1),
        ];
        let d = SpreadStrategy.compute_distribution(5, &targets, &zone_spread());
        assert_eq!(d, dist(&[("a", 1), ("b", 1)]));
    }

    // ── Binpack ──────────────────────────────────────────────────────

    #[test]
    fn binpack_fills_best_target_first() {
        let targets = [
            scored("a", "z1", 90).with_max_replicas(10),
            scored("b", "z1", 50).with_max_replicas(10),
        ];
        let s = BinpackStrategy::default();
        assert_eq!(s.compute_distribution(6, &targets, &[]), dist(&[("a", 6)]));
        assert_eq!(s.compute_distribution(12, &targets, &[]), dist(&[("a", 8), ("b", 4)]));
        assert_eq!(s.compute_distribution(20, &targets, &[]), dist(&[("a", 10), ("b", 10)]));
    }

    #[test]
    fn binpack_keeps_hard_spread() {
        let targets = [scored("a", "z1", 90), scored("b", "z2", 10)];
        let constraints = [SpreadConstraint::new("zone", 2)];
        let d = BinpackStrategy::default().compute_distribution(4, &targets, &constraints);
        assert_eq!(d, dist(&[("a", 3), ("b", 1)]));

        let all: Vec<_> = targets.iter().map(|t| t.target.clone()).collect();
        assert!(crate::constraints::spread_violations(&constraints, &d, &all).is_empty());
    }

    #[test]
    fn binpack_ignores_soft_spread() {
        let targets = [scored("a", "z1", 90), scored("b", "z2", 10)];
        let mut soft = SpreadConstraint::new("zone", 1);
        soft.when_unsatisfiable = WhenUnsatisfiable::ScheduleAnyway;
        assert_eq!(
            BinpackStrategy::default().compute_distribution(4, &targets, &[soft]),
            dist(&[("a", 4)])
        );
    }

    #[test]
    fn binpack_with_unbounded_room_uses_one_target() {
        let targets = [scored("a", "z1", 40), scored("b", "z1", 60)];
        assert_eq!(
            BinpackStrategy::default().compute_distribution(7, &targets, &[]),
            dist(&[("b", 7)])
        );
    }

    // ── High availability ────────────────────────────────────────────

    #[test]
    fn high_availability_covers_every_domain() {
        let targets = [
            scored("a", "z1", 90),
            scored("b", "z1", 80),
            scored("c", "z2", 20),
            scored("d", "z3", 10),
        ];
        let s = HighAvailabilityStrategy {
            domain_key: "zone".into(),
            min_per_domain: 1,
        };
        let d = s.compute_distribution(3, &targets, &[]);
        assert_eq!(d, dist(&[("a", 1), ("c", 1), ("d", 1)]));
    }

    // ── Singleton ────────────────────────────────────────────────────

    #[test]
    fn singleton_honours_preferred_location() {
        let targets = [scored("a", "z1", 90), scored("b", "z2", 10)];
        let s = SingletonStrategy {
            preferred_location: Some("z2".into()),
            fallback: None,
        };
        assert_eq!(s.compute_distribution(3, &targets, &[]), dist(&[("b", 3)]));

        let s = SingletonStrategy {
            preferred_location: Some("mars".into()),
            fallback: None,
        };
        assert_eq!(s.compute_distribution(3, &targets, &[]), dist(&[("a", 3)]));

        let s = SingletonStrategy {
            preferred_location: Some("mars".into()),
            fallback: Some(Box::new(SpreadStrategy)),
        };
        assert_eq!(s.compute_distribution(2, &targets, &[]), dist(&[("a", 2)]));
        assert_eq!(s.compute_distribution(3, &targets, &[]), dist(&[("a", 3)]));
    }

    #[test]
    fn singleton_fallback_only_picks_the_target() {
        let targets = [scored("a", "z1", 90).with_max_replicas(1), scored("b", "z2", 10)];
        let s = SingletonStrategy {
            preferred_location: None,
            fallback: Some(Box::new(BinpackStrategy::default())),
        };
        let d = s.compute_distribution(3, &targets, &[]);
        assert_eq!(d, dist(&[("b", 3)]));
        assert_eq!(d.len(), 1);
    }

    // ── Multi ────────────────────────────────────────────────────────

    fn members() -> Vec<(Box<dyn DistributionStrategy>, f64)> {
        vec![
            (Box::new(SpreadStrategy), 1.0),
            (Box::new(BinpackStrategy::default()), 1.0),
        ]
    }

    #[test]
    fn weighted_average_keeps_total() {
        let targets = [scored("a", "z1", 90), scored("b", "z2", 50)];
        let multi = MultiStrategy {
            mode: MultiMode::WeightedAverage,
            members: members(),
        };
        let d = multi.compute_distribution(4, &targets, &[]);
        assert_eq!(d, dist(&[("a", 3), ("b", 1)]));
    }

    #[test]
    fn first_match_skips_spread_violations() {
        let targets = [scored("a", "z1", 90), scored("b", "z2", 50)];
        let multi = MultiStrategy {
            mode: MultiMode::FirstMatch,
            members: vec![
                (Box::new(SingletonStrategy::default()), 1.0),
                (Box::new(SpreadStrategy), 1.0),
            ],
        };
        assert_eq!(
            multi.compute_distribution(4, &targets, &zone_spread()),
            dist(&[("a", 2), ("b", 2)])
        );
    }

    #[test]
    fn best_score_prefers_higher_scoring_targets() {
        let targets = [scored("a", "z1", 90), scored("b", "z2", 10)];
        let multi = MultiStrategy {
            mode: MultiMode::BestScore,
            members: members(),
        };
        assert_eq!(multi.compute_distribution(4, &targets, &[]), dist(&[("a", 4)]));
    }

    #[test]
    fn consensus_uses_majority_targets() {
        let targets = [scored("a", "z1", 90), scored("b", "z2", 10)];
        let multi = MultiStrategy {
            mode: MultiMode::Consensus,
            members: vec![
                (Box::new(BinpackStrategy::default()), 1.0),
                (Box::new(BinpackStrategy::default()), 1.0),
                (Box::new(SpreadStrategy), 1.0),
            ],
        };
        assert_eq!(multi.compute_distribution(4, &targets, &[]), dist(&[("a", 4)]));
    }

    // ── Rebalance ────────────────────────────────────────────────────

    #[test]
    fn rebalance_keeps_surviving_replicas() {
        let targets = [scored("a", "z1", 50), scored("b", "z2", 50), scored("d", "z2", 50)];
        let current = dist(&[("a", 2), ("b", 1), ("gone", 1)]);
        let d = SpreadStrategy.rebalance(&current, &targets, &[]);
        assert_eq!(placed(&d), 4);
        assert_eq!(count(&d, "root/a"), 2);
        assert_eq!(count(&d, "root/b"), 1);
        assert_eq!(count(&d, "root/d"), 1);
    }

    #[test]
    fn rebalance_falls_back_when_spread_breaks() {
        let targets = [scored("a", "z1", 50), scored("c", "z2", 50)];
        let current = dist(&[("a", 4)]);
        let d = SpreadStrategy.rebalance(&current, &targets, &zone_spread());
        assert_eq!(d, dist(&[("a", 2), ("c", 2)]));
    }

    #[test]
    fn rebalance_to_scales_down_lowest_rank_first() {
        let targets = [scored("a", "z1", 90), scored("b", "z2", 10)];
        let current = dist(&[("a", 2), ("b", 2)]);
        let d = BinpackStrategy::default().rebalance_to(2, &current, &targets, &[]);
        assert_eq!(d, dist(&[("a", 2)]));
    }

    #[test]
    fn soft_spread_does_not_force_fresh_distribution() {
        let targets = [scored("a", "z1", 50), scored("c", "z2", 50)];
        let mut soft = SpreadConstraint::new("zone", 1);
        soft.when_unsatisfiable = WhenUnsatisfiable::ScheduleAnyway;
        let current = dist(&[("a", 4)]);
        assert_eq!(SpreadStrategy.rebalance(&current, &targets, &[soft]), current);
    }

    // ── Configuration ────────────────────────────────────────────────

    #[test]
    fn unknown_strategy_is_an_error() {
        let policy = PlacementPolicy::new("p", PlacementStrategy::Spread);
        assert!(matches!(
            build_strategy("random", &StrategyConfig::default(), &policy),
            Err(PlacementError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn config_override_wins_over_policy() {
        let policy = PlacementPolicy::new("p", PlacementStrategy::Spread);
        let config = StrategyConfig {
            name: Some("binpack".into()),
            ..Default::default()
        };
        assert_eq!(strategy_for(&policy, &config).unwrap().name(), "binpack");
        assert_eq!(strategy_for(&policy, &StrategyConfig::default()).unwrap().name(), "spread");
    }

    #[test]
    fn multi_config_builds_members() {
        let policy = PlacementPolicy::new("p", PlacementStrategy::Spread);
        let config: StrategyConfig = toml::from_str(
            r#"
            name = "multi"
            [multi]
            mode = "Consensus"
            strategies = [{ name = "spread" }, { name = "binpack", weight = 2.0 }]
            "#,
        )
        .unwrap();
        let s = strategy_for(&policy, &config).unwrap();
        assert_eq!(s.name(), MULTI);

        let nested = StrategyConfig {
            multi: MultiConfig {
                mode: MultiMode::FirstMatch,
                strategies: vec![WeightedStrategy {
                    name: MULTI.into(),
                    weight: 1.0,
                }],
            },
            ..Default::default()
        };
        assert!(nested.validate().is_err());
    }

    #[test]
    fn singleton_and_multi_cannot_reference_each_other() {
        let policy = PlacementPolicy::new("p", PlacementStrategy::Singleton);
        let config = StrategyConfig {
            singleton_fallback: Some(MULTI.into()),
            multi: MultiConfig {
                mode: MultiMode::FirstMatch,
                strategies: vec![WeightedStrategy {
                    name: "singleton".into(),
                    weight: 1.0,
                }],
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PlacementError::StrategyConfig { .. })
        ));
        assert!(matches!(
            strategy_for(&policy, &config),
            Err(PlacementError::StrategyConfig { .. })
        ));

        let one_way = StrategyConfig {
            singleton_fallback: Some(MULTI.into()),
            multi: MultiConfig {
                mode: MultiMode::FirstMatch,
                strategies: vec![WeightedStrategy {
                    name: "spread".into(),
                    weight: 1.0,
                }],
            },
            ..Default::default()
        };
        assert_eq!(strategy_for(&policy, &one_way).unwrap().name(), "singleton");
    }
}
