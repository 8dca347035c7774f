//! Resource arithmetic between workloads and targets.
//!
//! Bridges the string quantities carried by [`Workload`] and
//! [`ClusterTarget`] to the `f64` amounts used for fit checks and
//! utilization scoring.

use canopy_types::{ClusterTarget, ResourceAmounts, Workload, parse_resources};

use crate::error::PlacementResult;

/// Tolerance for comparing parsed quantities.
const EPSILON: f64 = 1e-9;

/// Per-replica requests of a workload, with zero entries dropped.
pub fn requirements(workload: &Workload) -> PlacementResult<ResourceAmounts> {
    let mut req = parse_resources(&workload.requests)?;
    req.retain(|_, v| *v > 0.0);
    Ok(req)
}

/// How many replicas of `per_replica` fit into `available`.
///
/// `None` when nothing is requested, i.e. resources do not bound the count.
/// A requested dimension the target does not declare has zero room.
pub fn replicas_that_fit(available: &ResourceAmounts, per_replica: &ResourceAmounts) -> Option<u32> {
    if per_replica.is_empty() {
        return None;
    }
    let fit = per_replica
        .iter()
        .map(|(name, need)| {
            let free = available.get(name).copied().unwrap_or(0.0);
            ((free + EPSILON) / need).floor().max(0.0)
        })
        .fold(f64::INFINITY, f64::min);
    Some(fit.min(f64::from(u32::MAX)) as u32)
}

/// Requested dimensions where one replica does not fit, as
/// `(resource, needed, free)`.
pub fn shortfalls(available: &ResourceAmounts, per_replica: &ResourceAmounts) -> Vec<(String, f64, f64)> {
    per_replica
        .iter()
        .filter_map(|(name, need)| {
            let free = available.get(name).copied().unwrap_or(0.0);
            (free + EPSILON < *need).then(|| (name.clone(), *need, free))
        })
        .collect()
}

/// Utilization per declared dimension if `replicas` more replicas land on
/// the target. Values are fractions, capped at 1.
pub fn projected_utilization(
    target: &ClusterTarget,
    per_replica: &ResourceAmounts,
    replicas: u32,
) -> PlacementResult<ResourceAmounts> {
    let capacity = parse_resources(&target.capacity)?;
    let allocated = parse_resources(&target.allocated)?;
    Ok(capacity
        .into_iter()
        .filter(|(_, cap)| *cap > 0.0)
        .map(|(name, cap)| {
            let used = allocated.get(&name).copied().unwrap_or(0.0)
                + per_replica.get(&name).copied().unwrap_or(0.0) * f64::from(replicas);
            let util = (used / cap).min(1.0);
            (name, util)
        })
        .collect())
}

/// Requested dimensions where `replicas` replicas no longer fit the
/// target's capacity, or where the target is allocated past its capacity.
pub fn overcommitted(target: &ClusterTarget, per_replica: &ResourceAmounts, replicas: u32) -> PlacementResult<Vec<String>> {
    let capacity = parse_resources(&target.capacity)?;
    let allocated = parse_resources(&target.allocated)?;
    Ok(per_replica
        .iter()
        .filter(|(name, need)| {
            let cap = capacity.get(*name).copied().unwrap_or(0.0);
            let used = allocated.get(*name).copied().unwrap_or(0.0);
            used > cap + EPSILON || *need * f64::from(replicas) > cap + EPSILON
        })
        .map(|(name, _)| name.clone())
        .collect())
}

/// `target` as it would look with `replicas` replicas of `per_replica`
/// taken off its allocation. Allocation never drops below zero.
pub fn release(target: &ClusterTarget, per_replica: &ResourceAmounts, replicas: u32) -> PlacementResult<ClusterTarget> {
    let mut allocated = parse_resources(&target.allocated)?;
    for (name, need) in per_replica {
        if let Some(used) = allocated.get_mut(name) {
            *used = (*used - need * f64::from(replicas)).max(0.0);
        }
    }
    let mut released = target.clone();
    released.allocated = allocated
        .into_iter()
        .map(|(name, used)| (name, used.to_string()))
        .collect();
    Ok(released)
}

/// Add `amounts` scaled by `times` into `into`.
pub fn add_scaled(into: &mut ResourceAmounts, amounts: &ResourceAmounts, times: u32) {
    for (name, v) in amounts {
        *into.entry(name.clone()).or_insert(0.0) += v * f64::from(times);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amounts(pairs: &[(&str, f64)]) -> ResourceAmounts {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn fit_is_bounded_by_tightest_dimension() {
        let free = amounts(&[("cpu", 4.0), ("memory", 3.0)]);
        let need = amounts(&[("cpu", 1.0), ("memory", 1.5)]);
        assert_eq!(replicas_that_fit(&free, &need), Some(2));
    }

    #[test]
    fn nothing_requested_is_unbounded() {
        assert_eq!(replicas_that_fit(&amounts(&[("cpu", 1.0)]), &amounts(&[])), None);
    }

    #[test]
    fn undeclared_dimension_has_no_room() {
        let free = amounts(&[("cpu", 8.0)]);
        let need = amounts(&[("cpu", 1.0), ("nvidia.com/gpu", 1.0)]);
        assert_eq!(replicas_that_fit(&free, &need), Some(0));
        assert_eq!(shortfalls(&free, &need).len(), 1);
    }

    #[test]
    fn exact_fit_survives_float_rounding() {
        let free = amounts(&[("cpu", 0.3)]);
        let need = amounts(&[("cpu", 0.1)]);
        assert_eq!(replicas_that_fit(&free, &need), Some(3));
    }

    #[test]
    fn zero_requests_are_ignored() {
        let w = Workload::new("w", "root", 1)
            .with_request("cpu", "0")
            .with_request("memory", "1Gi");
        let req = requirements(&w).unwrap();
        assert_eq!(req.len(), 1);
        assert!(req.contains_key("memory"));
    }

    #[test]
    fn overcommit_detects_shrunk_capacity() {
        let need = amounts(&[("cpu", 1.0)]);
        let fine = ClusterTarget::new("a", "root")
            .with_capacity("cpu", "4")
            .with_allocated("cpu", "4");
        let over = ClusterTarget::new("b", "root")
            .with_capacity("cpu", "2")
            .with_allocated("cpu", "3");
        assert!(overcommitted(&fine, &need, 3).unwrap().is_empty());
        assert_eq!(overcommitted(&over, &need, 1).unwrap(), ["cpu"]);
        assert_eq!(overcommitted(&fine, &need, 5).unwrap(), ["cpu"]);
    }

    #[test]
    fn projection_adds_requests() {
        let t = ClusterTarget::new("c1", "root")
            .with_capacity("cpu", "10")
            .with_allocated("cpu", "2");
        let util = projected_utilization(&t, &amounts(&[("cpu", 1.0)]), 3).unwrap();
        assert!((util["cpu"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn release_returns_replica_requests() {
        let target = ClusterTarget::new("a", "root")
            .with_capacity("cpu", "8")
            .with_capacity("memory", "4Gi")
            .with_allocated("cpu", "8")
            .with_allocated("memory", "1Gi");
        let per_replica = amounts(&[("cpu", 1.0), ("memory", 1024.0 * 1024.0 * 1024.0)]);

        let released = release(&target, &per_replica, 2).unwrap();
        let free = released.available().unwrap();
        assert_eq!(free["cpu"], 2.0);
        assert_eq!(free["memory"], 4.0 * 1024.0 * 1024.0 * 1024.0);
        assert_eq!(replicas_that_fit(&free, &per_replica), Some(2));
        assert_eq!(released.name, target.name);
    }
}
