//! Preemption planning.
//!
//! When feasible targets lack the free resources for a workload, propose
//! evicting replicas of strictly lower-priority workloads already running
//! there. Plans are proposals only; nothing here evicts anything.

use std::collections::BTreeMap;

use canopy_types::{
    ClusterTarget, Distribution, PlacementPolicy, ResourceAmounts, Workload, parse_resources,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constraints::{EvalOptions, evaluate_target_with};
use crate::error::PlacementResult;
use crate::resources::{add_scaled, replicas_that_fit, requirements};

/// Replicas of one running workload proposed for eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Victim {
    /// Target key.
    pub target: String,
    pub workload: String,
    pub priority: i32,
    pub replicas: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreemptionPlan {
    pub victims: Vec<Victim>,
    /// Resources released per target key.
    pub freed: BTreeMap<String, ResourceAmounts>,
    /// Where the pending workload's replicas would go.
    pub placement: Distribution,
    /// Replicas that still do not fit.
    pub unplaced: u32,
}

impl PreemptionPlan {
    pub fn evicted_replicas(&self) -> u32 {
        self.victims.iter().map(|v| v.replicas).sum()
    }
}

fn subtract(from: &mut ResourceAmounts, amounts: &ResourceAmounts) {
    for (name, v) in amounts {
        if let Some(free) = from.get_mut(name) {
            *free -= v;
        }
    }
}

fn short_dimensions(available: &ResourceAmounts, need: &ResourceAmounts) -> Vec<String> {
    need.iter()
        .filter(|(name, v)| available.get(*name).copied().unwrap_or(0.0) + 1e-9 < **v)
        .map(|(name, _)| name.clone())
        .collect()
}

struct Candidate<'a> {
    name: &'a str,
    priority: i32,
    left: u32,
    requests: ResourceAmounts,
    evicted: u32,
}

/// Plan a placement for `workload` that may evict lower-priority replicas.
///
/// Targets must pass every hard constraint except resources. They are tried
/// in order of their soft score, then key. On each target replicas are
/// first placed into free room; then victims are evicted one replica at a
/// time, lowest priority first, and only when they free a dimension that
/// is short. Evictions that do not end in a placement are dropped.
pub fn plan_preemption(
    workload: &Workload,
    policy: &PlacementPolicy,
    targets: &[ClusterTarget],
) -> PlacementResult<PreemptionPlan> {
    let per_replica = requirements(workload)?;
    let skip_resources = EvalOptions {
        check_resources: false,
    };

    let mut eligible = Vec::new();
    for target in targets {
        let eval = evaluate_target_with(workload, target, policy, targets, skip_resources)?;
        if eval.suitable {
            eligible.push((eval.score, target));
        } else {
            debug!(cluster = %target.key(), reason = %eval.message, "not eligible for preemption");
        }
    }
    eligible.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.key().cmp(&b.1.key())));

    let mut plan = PreemptionPlan::default();
    let mut remaining = workload.replicas;

    for (_, target) in eligible {
        if remaining == 0 {
            break;
        }
        let key = target.key();
        let mut available = target.available()?;

        let Some(fit) = replicas_that_fit(&available, &per_replica) else {
            // Nothing requested: resources never block.
            plan.placement.insert(key, remaining);
            remaining = 0;
            break;
        };
        let free_now = fit.min(remaining);
        if free_now > 0 {
            *plan.placement.entry(key.clone()).or_insert(0) += free_now;
            remaining -= free_now;
            for _ in 0..free_now {
                subtract(&mut available, &per_replica);
            }
        }

        let mut candidates = Vec::new();
        for running in &target.running {
            if running.priority >= workload.priority || running.name == workload.name {
                continue;
            }
            candidates.push(Candidate {
                name: &running.name,
                priority: running.priority,
                left: running.replicas,
                requests: parse_resources(&running.requests)?,
                evicted: 0,
            });
        }
        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(b.name)));

        let mut committed: Vec<u32> = vec![0; candidates.len()];
        while remaining > 0 {
            let short = short_dimensions(&available, &per_replica);
            let Some(victim) = candidates.iter_mut().find(|c| {
                c.left > 0 && short.iter().any(|d| c.requests.get(d).is_some_and(|v| *v > 0.0))
            }) else {
                break;
            };
            victim.left -= 1;
            victim.evicted += 1;
            add_scaled(&mut available, &victim.requests, 1);

            if replicas_that_fit(&available, &per_replica).unwrap_or(0) >= 1 {
                subtract(&mut available, &per_replica);
                *plan.placement.entry(key.clone()).or_insert(0) += 1;
                remaining -= 1;
                for (slot, c) in committed.iter_mut().zip(&candidates) {
                    *slot = c.evicted;
                }
            }
        }

        let mut freed = ResourceAmounts::new();
        for (c, evicted) in candidates.iter().zip(&committed) {
            if *evicted == 0 {
                continue;
            }
            add_scaled(&mut freed, &c.requests, *evicted);
            info!(
                victim = c.name,
                cluster = %key,
                evicted,
                priority = c.priority,
                "proposed preemption"
            );
            plan.victims.push(Victim {
                target: key.clone(),
                workload: c.name.to_string(),
                priority: c.priority,
                replicas: *evicted,
            });
        }
        if !freed.is_empty() {
            plan.freed.insert(key, freed);
        }
    }

    plan.unplaced = remaining;
    if remaining > 0 {
        warn!(
            workload = %workload.name,
            remaining,
            "preemption cannot make room for every replica"
        );
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_types::{PlacementStrategy, RunningWorkload, Taint, TaintEffect};

    fn running(name: &str, priority: i32, replicas: u32, cpu: &str) -> RunningWorkload {
        RunningWorkload {
            name: name.to_string(),
            labels: Default::default(),
            priority,
            replicas,
            requests: [("cpu".to_string(), cpu.to_string())].into(),
        }
    }

    fn policy() -> PlacementPolicy {
        PlacementPolicy::new("p", PlacementStrategy::Spread)
    }

    fn full_target(name: &str) -> ClusterTarget {
        ClusterTarget::new(name, "root")
            .with_capacity("cpu", "4")
            .with_allocated("cpu", "4")
    }

    #[test]
    fn evicts_lower_priority() {
        let t = full_target("a").with_running(running("batch", 1, 4, "1"));
        let w = Workload::new("api", "root", 2)
            .with_request("cpu", "1")
            .with_priority(10);

        let plan = plan_preemption(&w, &policy(), &[t]).unwrap();
        assert_eq!(plan.placement["root/a"], 2);
        assert_eq!(plan.unplaced, 0);
        assert_eq!(
            plan.victims,
            vec![Victim {
                target: "root/a".into(),
                workload: "batch".into(),
                priority: 1,
                replicas: 2,
            }]
        );
        assert!((plan.freed["root/a"]["cpu"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn no_preemption_for_same_or_higher_priority() {
        let t = full_target("a")
            .with_running(running("peer", 10, 2, "1"))
            .with_running(running("critical", 100, 2, "1"));
        let w = Workload::new("api", "root", 1)
            .with_request("cpu", "1")
            .with_priority(10);

        let plan = plan_preemption(&w, &policy(), &[t]).unwrap();
        assert!(plan.victims.is_empty());
        assert_eq!(plan.unplaced, 1);
    }

    #[test]
    fn lowest_priority_goes_first() {
        let t = full_target("a")
            .with_running(running("medium", 5, 2, "1"))
            .with_running(running("low", 1, 2, "1"));
        let w = Workload::new("api", "root", 1)
            .with_request("cpu", "1")
            .with_priority(10);

        let plan = plan_preemption(&w, &policy(), &[t]).unwrap();
        assert_eq!(plan.victims.len(), 1);
        assert_eq!(plan.victims[0].workload, "low");
    }

    #[test]
    fn free_room_is_used_before_evicting() {
        let t = ClusterTarget::new("a", "root")
            .with_capacity("cpu", "4")
            .with_allocated("cpu", "3")
            .with_running(running("batch", 1, 3, "1"));
        let w = Workload::new("api", "root", 2)
            .with_request("cpu", "1")
            .with_priority(10);

        let plan = plan_preemption(&w, &policy(), &[t]).unwrap();
        assert_eq!(plan.placement["root/a"], 2);
        assert_eq!(plan.evicted_replicas(), 1);
    }

    #[test]
    fn useless_evictions_are_dropped() {
        // Evicting the cpu-only victim never frees memory.
        let t = ClusterTarget::new("a", "root")
            .with_capacity("cpu", "4")
            .with_capacity("memory", "1Gi")
            .with_allocated("cpu", "4")
            .with_allocated("memory", "1Gi")
            .with_running(running("batch", 1, 4, "1"));
        let w = Workload::new("api", "root", 1)
            .with_request("cpu", "1")
            .with_request("memory", "512Mi")
            .with_priority(10);

        let plan = plan_preemption(&w, &policy(), &[t]).unwrap();
        assert!(plan.victims.is_empty());
        assert_eq!(plan.unplaced, 1);
    }

    #[test]
    fn hard_constraints_still_apply() {
        let t = full_target("a")
            .with_taint(Taint::new("dedicated", TaintEffect::NoSchedule))
            .with_running(running("batch", 1, 4, "1"));
        let w = Workload::new("api", "root", 1)
            .with_request("cpu", "1")
            .with_priority(10);

        let plan = plan_preemption(&w, &policy(), &[t]).unwrap();
        assert!(plan.victims.is_empty());
        assert!(plan.placement.is_empty());
    }
}
