//! Hard constraints and soft preferences for a single target.
//!
//! Everything here is a pure function of the workload, the target, the
//! policy and (for pod affinity) the other candidate targets.

use std::collections::BTreeMap;

use canopy_types::{
    CLUSTER_KEY, ClusterTarget, Distribution, EvaluationResult, Labels, NodeSelectorTerm,
    PlacementPolicy, PodAffinityTerm, RuleKind, RunningWorkload, SpreadConstraint, Taint,
    TaintEffect, Toleration, Workload,
};
use serde::{Deserialize, Serialize};

use crate::error::{PlacementError, PlacementResult};
use crate::expr;
use crate::resources;

/// Weight of one untolerated `PreferNoSchedule` taint in the soft score.
pub const PREFER_NO_SCHEDULE_WEIGHT: f64 = 50.0;

// ── Taints ───────────────────────────────────────────────────────────

/// True iff every taint is matched by some toleration.
pub fn is_tolerated(taints: &[Taint], tolerations: &[Toleration]) -> bool {
    taints
        .iter()
        .all(|t| tolerations.iter().any(|tol| tol.tolerates(t)))
}

/// Taints no toleration matches.
pub fn untolerated<'a>(taints: &'a [Taint], tolerations: &[Toleration]) -> Vec<&'a Taint> {
    taints
        .iter()
        .filter(|t| !tolerations.iter().any(|tol| tol.tolerates(t)))
        .collect()
}

// ── Resources ────────────────────────────────────────────────────────

/// How a workload's per-replica requests fit a target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceFit {
    /// `None` when the workload requests nothing.
    pub max_replicas: Option<u32>,
    /// One entry per dimension where a single replica does not fit.
    pub shortfalls: Vec<String>,
}

impl ResourceFit {
    pub fn fits(&self) -> bool {
        self.max_replicas.is_none_or(|m| m >= 1)
    }
}

pub fn check_resources(workload: &Workload, target: &ClusterTarget) -> PlacementResult<ResourceFit> {
    let per_replica = resources::requirements(workload)?;
    let available = target.available()?;
    Ok(ResourceFit {
        max_replicas: resources::replicas_that_fit(&available, &per_replica),
        shortfalls: resources::shortfalls(&available, &per_replica)
            .into_iter()
            .map(|(name, need, free)| format!("insufficient {name}: need {need}, free {free}"))
            .collect(),
    })
}

// ── Topology spread ──────────────────────────────────────────────────

/// Replica count per topology domain. Every domain present among
/// `targets` appears, including those with no replicas. Targets without a
/// value for the key are not part of any domain.
pub fn domain_counts(
    topology_key: &str,
    distribution: &Distribution,
    targets: &[ClusterTarget],
) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for target in targets {
        let Some(domain) = target.topology_value(topology_key) else {
            continue;
        };
        let placed = distribution.get(&target.key()).copied().unwrap_or(0);
        *counts.entry(domain.to_string()).or_insert(0) += placed;
    }
    counts
}

/// `max - min` over domain counts; 0 when there are no domains.
pub fn skew(counts: &BTreeMap<String, u32>) -> u32 {
    let max = counts.values().copied().max().unwrap_or(0);
    let min = counts.values().copied().min().unwrap_or(0);
    max - min
}

/// Outcome of checking one spread constraint against a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadCheck {
    pub topology_key: String,
    pub max_skew: u32,
    pub skew: u32,
    pub satisfied: bool,
    pub hard: bool,
}

pub fn check_spread(
    constraint: &SpreadConstraint,
    distribution: &Distribution,
    targets: &[ClusterTarget],
) -> SpreadCheck {
    let skew = skew(&domain_counts(&constraint.topology_key, distribution, targets));
    SpreadCheck {
        topology_key: constraint.topology_key.clone(),
        max_skew: constraint.max_skew,
        skew,
        satisfied: skew <= constraint.max_skew,
        hard: constraint.is_hard(),
    }
}

/// Hard spread constraints the distribution violates.
pub fn spread_violations(
    constraints: &[SpreadConstraint],
    distribution: &Distribution,
    targets: &[ClusterTarget],
) -> Vec<SpreadCheck> {
    constraints
        .iter()
        .map(|c| check_spread(c, distribution, targets))
        .filter(|c| c.hard && !c.satisfied)
        .collect()
}

// ── Node affinity ────────────────────────────────────────────────────

/// All expressions of a term hold. An empty term matches nothing.
pub fn term_matches(term: &NodeSelectorTerm, labels: &Labels) -> bool {
    !term.match_expressions.is_empty() && term.match_expressions.iter().all(|e| e.matches(labels))
}

/// Required terms are OR'd; no terms means no requirement.
pub fn required_terms_match(terms: &[NodeSelectorTerm], labels: &Labels) -> bool {
    terms.is_empty() || terms.iter().any(|t| term_matches(t, labels))
}

/// Fraction of a term's expressions that hold.
pub fn match_fraction(term: &NodeSelectorTerm, labels: &Labels) -> f64 {
    if term.match_expressions.is_empty() {
        return 0.0;
    }
    let matched = term
        .match_expressions
        .iter()
        .filter(|e| e.matches(labels))
        .count();
    matched as f64 / term.match_expressions.len() as f64
}

// ── Pod affinity ─────────────────────────────────────────────────────

/// Workloads other than `own` sharing `target`'s topology domain for
/// `topology_key`. Replicas of `own` itself are never neighbours.
///
/// An empty key, the cluster key, or a target without a value for the key
/// all narrow the domain to the target itself.
pub fn co_located<'a>(
    own: &str,
    target: &'a ClusterTarget,
    topology_key: &str,
    peers: &'a [ClusterTarget],
) -> Vec<&'a RunningWorkload> {
    let others = |t: &'a ClusterTarget| t.running.iter().filter(move |w| w.name != own);
    let mut out: Vec<&RunningWorkload> = others(target).collect();
    if topology_key.is_empty() || topology_key == CLUSTER_KEY {
        return out;
    }
    let Some(domain) = target.topology_value(topology_key) else {
        return out;
    };
    let own_key = target.key();
    for peer in peers {
        if peer.key() != own_key && peer.topology_value(topology_key) == Some(domain) {
            out.extend(others(peer));
        }
    }
    out
}

pub fn pod_term_matches(
    term: &PodAffinityTerm,
    workload: &Workload,
    target: &ClusterTarget,
    peers: &[ClusterTarget],
) -> bool {
    co_located(&workload.name, target, &term.topology_key, peers)
        .iter()
        .any(|w| term.label_selector.matches(&w.labels))
}

// ── Evaluation ───────────────────────────────────────────────────────

/// Switches for partial evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    /// Check that one replica fits the target's free resources.
    pub check_resources: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            check_resources: true,
        }
    }
}

#[derive(Default)]
struct SoftScore {
    earned: f64,
    total: f64,
}

impl SoftScore {
    fn add(&mut self, weight: f64, earned_fraction: f64) {
        if weight > 0.0 {
            self.total += weight;
            self.earned += weight * earned_fraction.clamp(0.0, 1.0);
        }
    }

    fn score(&self) -> f64 {
        if self.total == 0.0 {
            100.0
        } else {
            (self.earned / self.total * 100.0).clamp(0.0, 100.0)
        }
    }
}

/// Check the policy's structure and that every rule expression parses.
pub fn validate_policy(policy: &PlacementPolicy) -> PlacementResult<()> {
    policy.validate()?;
    for rule in &policy.rules {
        expr::parse(&rule.expression).map_err(|source| PlacementError::Rule {
            rule: rule.name.clone(),
            source,
        })?;
    }
    Ok(())
}

/// Evaluate one target. `peers` are the other candidates, consulted for
/// pod affinity in wider topology domains.
pub fn evaluate_target(
    workload: &Workload,
    target: &ClusterTarget,
    policy: &PlacementPolicy,
    peers: &[ClusterTarget],
) -> PlacementResult<EvaluationResult> {
    evaluate_target_with(workload, target, policy, peers, EvalOptions::default())
}

pub fn evaluate_target_with(
    workload: &Workload,
    target: &ClusterTarget,
    policy: &PlacementPolicy,
    peers: &[ClusterTarget],
    options: EvalOptions,
) -> PlacementResult<EvaluationResult> {
    let mut r = EvaluationResult::new(&target.key());
    let mut soft = SoftScore::default();
    let mut notes: Vec<String> = Vec::new();

    if target.ready {
        r.pass("ready");
    } else if policy.allow_not_ready {
        r.pass("not ready (allowed by policy)");
    } else {
        r.fail("target not ready");
    }

    if !policy.cluster_selector.is_empty() {
        if policy.cluster_selector.matches(&target.labels) {
            r.pass(format!("cluster selector {} matches", policy.cluster_selector));
        } else {
            r.fail(format!("cluster selector {} does not match", policy.cluster_selector));
        }
    }

    let open = untolerated(&target.taints, &policy.tolerations);
    for taint in &open {
        match taint.effect {
            TaintEffect::NoSchedule | TaintEffect::NoExecute => {
                r.fail(format!("taint {}:{:?} not tolerated", taint.key, taint.effect));
            }
            TaintEffect::PreferNoSchedule => {
                soft.add(PREFER_NO_SCHEDULE_WEIGHT, 0.0);
                notes.push(format!("prefers no scheduling ({})", taint.key));
            }
        }
    }
    if open.is_empty() {
        r.pass("taints tolerated");
    }

    if options.check_resources {
        let fit = check_resources(workload, target)?;
        if fit.fits() {
            match fit.max_replicas {
                Some(n) => r.pass(format!("resources fit {n} replicas")),
                None => r.pass("no resources requested"),
            }
        } else {
            for shortfall in fit.shortfalls {
                r.fail(shortfall);
            }
        }
    }

    for c in &policy.spread_constraints {
        match target.topology_value(&c.topology_key) {
            Some(domain) => r.pass(format!("topology {}={domain}", c.topology_key)),
            None if c.is_hard() => r.fail(format!("missing topology key {}", c.topology_key)),
            None => {}
        }
    }

    if let Some(node) = &policy.affinity.node_affinity {
        if !node.required.is_empty() {
            if required_terms_match(&node.required, &target.labels) {
                r.pass("required node affinity");
            } else {
                r.fail("required node affinity not satisfied");
            }
        }
        for pref in &node.preferred {
            soft.add(f64::from(pref.weight), match_fraction(&pref.preference, &target.labels));
        }
    }

    if let Some(pod) = &policy.affinity.pod_affinity {
        for term in &pod.required {
            if pod_term_matches(term, workload, target, peers) {
                r.pass(format!("pod affinity {}", term.label_selector));
            } else {
                r.fail(format!("pod affinity {} not satisfied", term.label_selector));
            }
        }
        for w in &pod.preferred {
            let hit = pod_term_matches(&w.term, workload, target, peers);
            soft.add(f64::from(w.weight), if hit { 1.0 } else { 0.0 });
        }
    }

    if let Some(anti) = &policy.affinity.pod_anti_affinity {
        for term in &anti.required {
            if pod_term_matches(term, workload, target, peers) {
                r.fail(format!(
                    "pod anti-affinity {} violated in {}",
                    term.label_selector,
                    if term.topology_key.is_empty() { CLUSTER_KEY } else { term.topology_key.as_str() }
                ));
            } else {
                r.pass(format!("pod anti-affinity {}", term.label_selector));
            }
        }
        for w in &anti.preferred {
            let hit = pod_term_matches(&w.term, workload, target, peers);
            soft.add(f64::from(w.weight), if hit { 0.0 } else { 1.0 });
            if hit {
                notes.push(format!("preferred anti-affinity {} matched", w.term.label_selector));
            }
        }
    }

    if !policy.rules.is_empty() {
        let vars = expr::target_variables(target)?;
        for rule in &policy.rules {
            let outcome = expr::evaluate_bool(&rule.expression, &vars);
            match (rule.kind, outcome) {
                (RuleKind::Constraint, Ok(true)) => r.pass(format!("rule {}", rule.name)),
                (RuleKind::Constraint, Ok(false)) => {
                    r.fail(format!("rule {} not satisfied", rule.name));
                }
                (RuleKind::Constraint, Err(e)) => r.fail(format!("rule {}: {e}", rule.name)),
                (RuleKind::Preference, Ok(hit)) => {
                    soft.add(f64::from(rule.weight), if hit { 1.0 } else { 0.0 });
                }
                (RuleKind::Preference, Err(e)) => {
                    soft.add(f64::from(rule.weight), 0.0);
                    notes.push(format!("rule {}: {e}", rule.name));
                }
            }
        }
    }

    r.score = soft.score();
    r.message = if r.suitable {
        if notes.is_empty() {
            "suitable".to_string()
        } else {
            format!("suitable; {}", notes.join("; "))
        }
    } else {
        r.violated.join("; ")
    };
    Ok(r)
}

/// Evaluate every target, each with the others as peers.
pub fn evaluate_targets(
    workload: &Workload,
    targets: &[ClusterTarget],
    policy: &PlacementPolicy,
) -> PlacementResult<Vec<EvaluationResult>> {
    targets
        .iter()
        .map(|t| evaluate_target(workload, t, policy, targets))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_types::{
        LabelSelector, Location, NodeAffinity, PodAffinity, PolicyRule, PreferredSchedulingTerm,
        SelectorOperator, SelectorRequirement, TolerationOperator, WeightedPodAffinityTerm,
        WhenUnsatisfiable,
    };

    fn policy() -> PlacementPolicy {
        PlacementPolicy::new("test", canopy_types::PlacementStrategy::Spread)
    }

    fn web() -> Workload {
        Workload::new("web", "root:org", 2).with_label("app", "web")
    }

    fn zoned(name: &str, zone: &str) -> ClusterTarget {
        ClusterTarget::new(name, "root").with_location(Location::new("r1", zone))
    }

    fn running(name: &str, app: &str) -> RunningWorkload {
        RunningWorkload {
            name: name.to_string(),
            labels: Labels::from([("app".to_string(), app.to_string())]),
            priority: 0,
            replicas: 1,
            requests: Default::default(),
        }
    }

    // ── Taints ───────────────────────────────────────────────────────

    #[test]
    fn untainted_target_is_always_tolerated() {
        assert!(is_tolerated(&[], &[]));
        assert!(is_tolerated(&[], &[Toleration::exists("x")]));
    }

    #[test]
    fn noschedule_taint_filters_target() {
        let tainted = ClusterTarget::new("gpu", "root")
            .with_taint(Taint::new("dedicated", TaintEffect::NoSchedule));
        let plain = ClusterTarget::new("cpu", "root");

        let p = policy();
        let results = evaluate_targets(&web(), &[tainted, plain], &p).unwrap();
        assert!(!results[0].suitable);
        assert!(results[0].violated[0].contains("dedicated"));
        assert!(results[1].suitable);
    }

    #[test]
    fn toleration_admits_tainted_target() {
        let tainted = ClusterTarget::new("gpu", "root")
            .with_taint(Taint::new("dedicated", TaintEffect::NoSchedule).with_value("ml"));
        let mut p = policy();
        p.tolerations.push(Toleration::equal("dedicated", "ml"));
        assert!(evaluate_target(&web(), &tainted, &p, &[]).unwrap().suitable);

        p.tolerations = vec![Toleration {
            key: "dedicated".into(),
            operator: TolerationOperator::Equal,
            value: Some("batch".into()),
            effect: None,
        }];
        assert!(!evaluate_target(&web(), &tainted, &p, &[]).unwrap().suitable);
    }

    #[test]
    fn prefer_no_schedule_only_lowers_score() {
        let soft = ClusterTarget::new("c", "root")
            .with_taint(Taint::new("spot", TaintEffect::PreferNoSchedule));
        let r = evaluate_target(&web(), &soft, &policy(), &[]).unwrap();
        assert!(r.suitable);
        assert!(r.score < 100.0);
        assert!(!is_tolerated(&soft.taints, &[]));

        let clean = evaluate_target(&web(), &ClusterTarget::new("d", "root"), &policy(), &[]).unwrap();
        assert_eq!(clean.score, 100.0);
    }

    // ── Readiness and selectors ──────────────────────────────────────

    #[test]
    fn not_ready_needs_opt_in() {
        let t = ClusterTarget::new("c", "root").not_ready();
        let mut p = policy();
        assert!(!evaluate_target(&web(), &t, &p, &[]).unwrap().suitable);
        p.allow_not_ready = true;
        assert!(evaluate_target(&web(), &t, &p, &[]).unwrap().suitable);
    }

    #[test]
    fn cluster_selector_is_hard() {
        let mut p = policy();
        p.cluster_selector = LabelSelector::default().with_label("tier", "gold");
        let gold = ClusterTarget::new("g", "root").with_label("tier", "gold");
        let plain = ClusterTarget::new("p", "root");
        assert!(evaluate_target(&web(), &gold, &p, &[]).unwrap().suitable);
        assert!(!evaluate_target(&web(), &plain, &p, &[]).unwrap().suitable);
    }

    // ── Resources ────────────────────────────────────────────────────

    #[test]
    fn resources_must_fit_one_replica() {
        let w = web().with_request("cpu", "2").with_request("memory", "1Gi");
        let roomy = ClusterTarget::new("a", "root")
            .with_capacity("cpu", "8")
            .with_capacity("memory", "8Gi")
            .with_allocated("cpu", "3");
        let full = ClusterTarget::new("b", "root")
            .with_capacity("cpu", "8")
            .with_capacity("memory", "8Gi")
            .with_allocated("cpu", "7");

        let fit = check_resources(&w, &roomy).unwrap();
        assert_eq!(fit.max_replicas, Some(2));
        assert!(fit.fits());

        let r = evaluate_target(&w, &full, &policy(), &[]).unwrap();
        assert!(!r.suitable);
        assert!(r.violated.iter().any(|v| v.starts_with("insufficient cpu")));

        let skip = EvalOptions {
            check_resources: false,
        };
        assert!(evaluate_target_with(&w, &full, &policy(), &[], skip).unwrap().suitable);
    }

    #[test]
    fn malformed_capacity_is_an_error() {
        let w = web().with_request("cpu", "1");
        let bad = ClusterTarget::new("a", "root").with_capacity("cpu", "lots");
        assert!(evaluate_target(&w, &bad, &policy(), &[]).is_err());
    }

    // ── Spread ───────────────────────────────────────────────────────

    #[test]
    fn zero_count_domains_count_toward_skew() {
        let targets = [zoned("a", "z1"), zoned("b", "z2"), zoned("c", "z3")];
        let dist = Distribution::from([("root/a".to_string(), 2), ("root/b".to_string(), 1)]);

        let counts = domain_counts("zone", &dist, &targets);
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["z3"], 0);
        assert_eq!(skew(&counts), 2);

        let check = check_spread(&SpreadConstraint::new("zone", 1), &dist, &targets);
        assert!(!check.satisfied);
        assert!(check_spread(&SpreadConstraint::new("zone", 2), &dist, &targets).satisfied);
    }

    #[test]
    fn tightening_skew_never_passes_a_failure() {
        let targets = [zoned("a", "z1"), zoned("b", "z1"), zoned("c", "z2")];
        let dists = [
            Distribution::from([("root/a".to_string(), 3)]),
            Distribution::from([("root/a".to_string(), 1), ("root/c".to_string(), 1)]),
            Distribution::from([("root/a".to_string(), 2), ("root/b".to_string(), 2), ("root/c".to_string(), 1)]),
        ];
        for dist in &dists {
            for loose in 1..5u32 {
                for tight in 1..=loose {
                    let l = check_spread(&SpreadConstraint::new("zone", loose), dist, &targets);
                    let t = check_spread(&SpreadConstraint::new("zone", tight), dist, &targets);
                    assert!(l.satisfied || !t.satisfied);
                }
            }
        }
    }

    #[test]
    fn missing_topology_key_fails_hard_constraint_only() {
        let mut p = policy();
        p.spread_constraints.push(SpreadConstraint::new("rack", 1));
        let t = ClusterTarget::new("a", "root");
        assert!(!evaluate_target(&web(), &t, &p, &[]).unwrap().suitable);

        p.spread_constraints[0].when_unsatisfiable = WhenUnsatisfiable::ScheduleAnyway;
        assert!(evaluate_target(&web(), &t, &p, &[]).unwrap().suitable);
    }

    #[test]
    fn soft_violations_are_not_reported_as_hard() {
        let targets = [zoned("a", "z1"), zoned("b", "z2")];
        let mut soft = SpreadConstraint::new("zone", 1);
        soft.when_unsatisfiable = WhenUnsatisfiable::ScheduleAnyway;
        let dist = Distribution::from([("root/a".to_string(), 4)]);
        assert!(spread_violations(&[soft], &dist, &targets).is_empty());
        assert_eq!(
            spread_violations(&[SpreadConstraint::new("zone", 1)], &dist, &targets).len(),
            1
        );
    }

    // ── Affinity ─────────────────────────────────────────────────────

    fn expr(key: &str, op: SelectorOperator, values: &[&str]) -> SelectorRequirement {
        SelectorRequirement::new(key, op, values)
    }

    #[test]
    fn required_terms_or_across_and_within() {
        let labels = Labels::from([
            ("gpu".to_string(), "a100".to_string()),
            ("region".to_string(), "eu".to_string()),
        ]);
        let needs_both = NodeSelectorTerm {
            match_expressions: vec![
                expr("gpu", SelectorOperator::Exists, &[]),
                expr("region", SelectorOperator::In, &["us"]),
            ],
        };
        let eu_only = NodeSelectorTerm {
            match_expressions: vec![expr("region", SelectorOperator::In, &["eu"])],
        };

        assert!(!required_terms_match(std::slice::from_ref(&needs_both), &labels));
        assert!(required_terms_match(&[needs_both.clone(), eu_only], &labels));
        assert!(required_terms_match(&[], &labels));
        assert_eq!(match_fraction(&needs_both, &labels), 0.5);
    }

    #[test]
    fn preferred_node_affinity_scales_score() {
        let mut p = policy();
        p.affinity.node_affinity = Some(NodeAffinity {
            required: vec![],
            preferred: vec![PreferredSchedulingTerm {
                weight: 80,
                preference: NodeSelectorTerm {
                    match_expressions: vec![
                        expr("ssd", SelectorOperator::Exists, &[]),
                        expr("tier", SelectorOperator::In, &["gold"]),
                    ],
                },
            }],
        });
        let half = ClusterTarget::new("a", "root").with_label("ssd", "true");
        let r = evaluate_target(&web(), &half, &p, &[]).unwrap();
        assert!((r.score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn required_anti_affinity_checks_whole_zone() {
        let a = zoned("a", "z1");
        let b = zoned("b", "z1").with_running(running("web-old", "web"));
        let c = zoned("c", "z2");
        let peers = vec![a.clone(), b.clone(), c.clone()];

        let mut p = policy();
        p.affinity.pod_anti_affinity = Some(PodAffinity {
            required: vec![PodAffinityTerm {
                label_selector: LabelSelector::default().with_label("app", "web"),
                topology_key: "zone".into(),
            }],
            preferred: vec![],
        });

        assert!(!evaluate_target(&web(), &a, &p, &peers).unwrap().suitable);
        assert!(!evaluate_target(&web(), &b, &p, &peers).unwrap().suitable);
        assert!(evaluate_target(&web(), &c, &p, &peers).unwrap().suitable);
    }

    #[test]
    fn own_replicas_do_not_trip_anti_affinity() {
        let a = ClusterTarget::new("a", "root").with_running(running("web", "web"));
        let b = ClusterTarget::new("b", "root").with_running(running("web", "web"));
        let peers = vec![a.clone(), b.clone()];

        let mut p = policy();
        p.affinity.pod_anti_affinity = Some(PodAffinity {
            required: vec![PodAffinityTerm {
                label_selector: LabelSelector::default().with_label("app", "web"),
                topology_key: CLUSTER_KEY.into(),
            }],
            preferred: vec![],
        });

        assert!(evaluate_target(&web(), &a, &p, &peers).unwrap().suitable);
        assert!(evaluate_target(&web(), &b, &p, &peers).unwrap().suitable);

        let crowded = b.with_running(running("web-canary", "web"));
        let r = evaluate_target(&web(), &crowded, &p, &peers).unwrap();
        assert!(!r.suitable);
        assert_eq!(co_located("web", &crowded, CLUSTER_KEY, &peers).len(), 1);
    }

    #[test]
    fn pod_affinity_required_and_preferred() {
        let cache_host = ClusterTarget::new("a", "root").with_running(running("redis", "cache"));
        let empty = ClusterTarget::new("b", "root");
        let selector = LabelSelector::default().with_label("app", "cache");

        let mut p = policy();
        p.affinity.pod_affinity = Some(PodAffinity {
            required: vec![],
            preferred: vec![WeightedPodAffinityTerm {
                weight: 10,
                term: PodAffinityTerm {
                    label_selector: selector.clone(),
                    topology_key: String::new(),
                },
            }],
        });
        assert_eq!(evaluate_target(&web(), &cache_host, &p, &[]).unwrap().score, 100.0);
        assert_eq!(evaluate_target(&web(), &empty, &p, &[]).unwrap().score, 0.0);

        p.affinity.pod_affinity = Some(PodAffinity {
            required: vec![PodAffinityTerm {
                label_selector: selector,
                topology_key: String::new(),
            }],
            preferred: vec![],
        });
        assert!(evaluate_target(&web(), &cache_host, &p, &[]).unwrap().suitable);
        assert!(!evaluate_target(&web(), &empty, &p, &[]).unwrap().suitable);
    }

    // ── Rules ────────────────────────────────────────────────────────

    #[test]
    fn constraint_rules_filter_and_preferences_score() {
        let mut p = policy();
        p.rules.push(PolicyRule::constraint("prod", r#"labels.env == "prod""#));
        p.rules.push(PolicyRule::preference("gold", r#"labels.tier == "gold""#, 3));
        p.rules.push(PolicyRule::preference("ssd", r#""ssd" in labels"#, 1));

        let prod_gold = ClusterTarget::new("a", "root")
            .with_label("env", "prod")
            .with_label("tier", "gold");
        let dev = ClusterTarget::new("b", "root").with_label("env", "dev");

        let r = evaluate_target(&web(), &prod_gold, &p, &[]).unwrap();
        assert!(r.suitable);
        assert!((r.score - 75.0).abs() < 1e-9);
        assert!(!evaluate_target(&web(), &dev, &p, &[]).unwrap().suitable);
    }

    #[test]
    fn unparsable_rule_is_a_validation_error() {
        let mut p = policy();
        p.rules.push(PolicyRule::constraint("broken", "labels.env == "));
        assert!(matches!(
            validate_policy(&p),
            Err(PlacementError::Rule { .. })
        ));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let mut p = policy();
        p.rules.push(PolicyRule::preference("gold", r#"labels.tier == "gold""#, 2));
        p.spread_constraints.push(SpreadConstraint::new("zone", 1));
        let targets = vec![zoned("a", "z1").with_label("tier", "gold"), zoned("b", "z2")];

        let first = evaluate_targets(&web(), &targets, &p).unwrap();
        let second = evaluate_targets(&web(), &targets, &p).unwrap();
        assert_eq!(first, second);
    }
}
