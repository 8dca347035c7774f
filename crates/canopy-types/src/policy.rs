//! Placement policies.
//!
//! A policy is externally authored configuration, consumed here as plain
//! data. `validate()` performs the structural checks that must pass before
//! any evaluation is attempted.

use serde::{Deserialize, Serialize};

use crate::cluster::{Taint, TaintEffect};
use crate::error::{ModelError, ModelResult};
use crate::selector::{LabelSelector, SelectorRequirement};

/// How replicas are distributed across eligible targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlacementStrategy {
    /// Distribute evenly across topology domains.
    #[default]
    Spread,
    /// Consolidate onto as few targets as possible.
    Binpack,
    /// Guarantee a minimum per failure domain first.
    HighAvailability,
    /// Exactly one target.
    Singleton,
    /// Configured combination of the others.
    Multi,
}

impl PlacementStrategy {
    pub const ALL: [Self; 5] = [
        Self::Spread,
        Self::Binpack,
        Self::HighAvailability,
        Self::Singleton,
        Self::Multi,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spread => "spread",
            Self::Binpack => "binpack",
            Self::HighAvailability => "high-availability",
            Self::Singleton => "singleton",
            Self::Multi => "multi",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

/// Permission for a workload to land on a tainted target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toleration {
    /// Empty key with `Exists` tolerates every taint.
    pub key: String,
    pub operator: TolerationOperator,
    pub value: Option<String>,
    /// `None` matches every effect.
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn exists(key: &str) -> Self {
        Self {
            key: key.to_string(),
            operator: TolerationOperator::Exists,
            ..Default::default()
        }
    }

    pub fn equal(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            operator: TolerationOperator::Equal,
            value: Some(value.to_string()),
            effect: None,
        }
    }

    pub fn with_effect(mut self, effect: TaintEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Key + effect match; `Equal` also compares values.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if self.effect.is_some_and(|e| e != taint.effect) {
            return false;
        }
        if self.key.is_empty() {
            return self.operator == TolerationOperator::Exists;
        }
        if self.key != taint.key {
            return false;
        }
        match self.operator {
            TolerationOperator::Exists => true,
            TolerationOperator::Equal => {
                self.value.as_deref().unwrap_or("") == taint.value.as_deref().unwrap_or("")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhenUnsatisfiable {
    /// Hard constraint: fail the placement.
    #[default]
    DoNotSchedule,
    /// Soft constraint: place anyway, record the skew.
    ScheduleAnyway,
}

/// Bound on the imbalance of replica counts across a topology domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadConstraint {
    pub topology_key: String,
    pub max_skew: u32,
    #[serde(default)]
    pub when_unsatisfiable: WhenUnsatisfiable,
}

impl SpreadConstraint {
    pub fn new(topology_key: &str, max_skew: u32) -> Self {
        Self {
            topology_key: topology_key.to_string(),
            max_skew,
            when_unsatisfiable: WhenUnsatisfiable::DoNotSchedule,
        }
    }

    pub fn is_hard(&self) -> bool {
        self.when_unsatisfiable == WhenUnsatisfiable::DoNotSchedule
    }
}

/// AND of match expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSelectorTerm {
    pub match_expressions: Vec<SelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredSchedulingTerm {
    /// 1..=100
    pub weight: i32,
    pub preference: NodeSelectorTerm,
}

/// Target-label affinity. Required terms are OR'd.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAffinity {
    pub required: Vec<NodeSelectorTerm>,
    pub preferred: Vec<PreferredSchedulingTerm>,
}

/// Selects co-located workloads within a topology domain. An empty
/// topology key means "the same target".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodAffinityTerm {
    pub label_selector: LabelSelector,
    pub topology_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedPodAffinityTerm {
    pub weight: i32,
    pub term: PodAffinityTerm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodAffinity {
    pub required: Vec<PodAffinityTerm>,
    pub preferred: Vec<WeightedPodAffinityTerm>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityRules {
    pub node_affinity: Option<NodeAffinity>,
    pub pod_affinity: Option<PodAffinity>,
    pub pod_anti_affinity: Option<PodAffinity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    /// Must evaluate to true.
    Constraint,
    /// Adds `weight` to the soft score when true.
    Preference,
}

/// Named expression evaluated against each target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    pub expression: String,
    pub kind: RuleKind,
    #[serde(default = "default_rule_weight")]
    pub weight: i32,
}

fn default_rule_weight() -> i32 {
    1
}

impl PolicyRule {
    pub fn constraint(name: &str, expression: &str) -> Self {
        Self {
            name: name.to_string(),
            expression: expression.to_string(),
            kind: RuleKind::Constraint,
            weight: default_rule_weight(),
        }
    }

    pub fn preference(name: &str, expression: &str, weight: i32) -> Self {
        Self {
            name: name.to_string(),
            expression: expression.to_string(),
            kind: RuleKind::Preference,
            weight,
        }
    }
}

/// Where and how a workload may be placed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementPolicy {
    pub name: String,
    pub strategy: PlacementStrategy,
    pub tolerations: Vec<Toleration>,
    pub spread_constraints: Vec<SpreadConstraint>,
    pub affinity: AffinityRules,
    pub rules: Vec<PolicyRule>,
    /// Which workspaces contribute targets.
    pub workspace_selector: LabelSelector,
    /// Hard filter on target labels.
    pub cluster_selector: LabelSelector,
    /// Target name, zone or region a singleton placement should land on.
    pub preferred_location: Option<String>,
    /// Permit targets that are not ready.
    pub allow_not_ready: bool,
    /// Upper bound on distinct targets in a decision.
    pub max_clusters: Option<usize>,
}

impl PlacementPolicy {
    pub fn new(name: &str, strategy: PlacementStrategy) -> Self {
        Self {
            name: name.to_string(),
            strategy,
            ..Default::default()
        }
    }

    /// Structural validation. Runs before any evaluation.
    pub fn validate(&self) -> ModelResult<()> {
        for c in &self.spread_constraints {
            if c.topology_key.trim().is_empty() {
                return Err(ModelError::InvalidPolicy(
                    "spread constraint has no topology key".to_string(),
                ));
            }
            if c.max_skew == 0 {
                return Err(ModelError::InvalidPolicy(format!(
                    "spread constraint on {:?} must allow a skew of at least 1",
                    c.topology_key
                )));
            }
        }

        if let Some(node) = &self.affinity.node_affinity {
            for term in &node.required {
                term.match_expressions.iter().try_for_each(|e| e.validate())?;
            }
            for pref in &node.preferred {
                check_weight(pref.weight, "preferred node affinity")?;
                pref.preference
                    .match_expressions
                    .iter()
                    .try_for_each(|e| e.validate())?;
            }
        }

        for (label, pod) in [
            ("pod affinity", &self.affinity.pod_affinity),
            ("pod anti-affinity", &self.affinity.pod_anti_affinity),
        ] {
            let Some(pod) = pod else { continue };
            for term in &pod.required {
                term.label_selector.validate()?;
            }
            for weighted in &pod.preferred {
                check_weight(weighted.weight, label)?;
                weighted.term.label_selector.validate()?;
            }
        }

        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(ModelError::InvalidPolicy("rule without a name".to_string()));
            }
            if rule.expression.trim().is_empty() {
                return Err(ModelError::InvalidPolicy(format!(
                    "rule {:?} has an empty expression",
                    rule.name
                )));
            }
        }

        if self.max_clusters == Some(0) {
            return Err(ModelError::InvalidPolicy(
                "max_clusters must be at least 1".to_string(),
            ));
        }

        self.workspace_selector.validate()?;
        self.cluster_selector.validate()
    }
}

fn check_weight(weight: i32, what: &str) -> ModelResult<()> {
    if (1..=100).contains(&weight) {
        Ok(())
    } else {
        Err(ModelError::InvalidPolicy(format!(
            "{what} weight {weight} outside 1..=100"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorOperator;

    #[test]
    fn equal_toleration_requires_value() {
        let taint = Taint::new("dedicated", TaintEffect::NoSchedule).with_value("gpu");

        assert!(Toleration::equal("dedicated", "gpu").tolerates(&taint));
        assert!(!Toleration::equal("dedicated", "db").tolerates(&taint));
        assert!(Toleration::exists("dedicated").tolerates(&taint));
        assert!(!Toleration::exists("other").tolerates(&taint));
    }

    #[test]
    fn toleration_effect_must_match_when_set() {
        let taint = Taint::new("dedicated", TaintEffect::NoSchedule);

        assert!(
            Toleration::exists("dedicated")
                .with_effect(TaintEffect::NoSchedule)
                .tolerates(&taint)
        );
        assert!(
            !Toleration::exists("dedicated")
                .with_effect(TaintEffect::NoExecute)
                .tolerates(&taint)
        );
    }

    #[test]
    fn wildcard_toleration() {
        let wildcard = Toleration {
            operator: TolerationOperator::Exists,
            ..Default::default()
        };
        assert!(wildcard.tolerates(&Taint::new("anything", TaintEffect::NoExecute)));

        let empty_equal = Toleration::default();
        assert!(!empty_equal.tolerates(&Taint::new("anything", TaintEffect::NoExecute)));
    }

    #[test]
    fn validate_rejects_missing_topology_key() {
        let mut policy = PlacementPolicy::new("p", PlacementStrategy::Spread);
        policy.spread_constraints.push(SpreadConstraint::new("", 1));
        assert!(matches!(policy.validate(), Err(ModelError::InvalidPolicy(_))));
    }

    #[test]
    fn validate_rejects_zero_skew() {
        let mut policy = PlacementPolicy::new("p", PlacementStrategy::Spread);
        policy.spread_constraints.push(SpreadConstraint::new("zone", 0));
        assert!(policy.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_weights() {
        let mut policy = PlacementPolicy::new("p", PlacementStrategy::Spread);
        policy.affinity.node_affinity = Some(NodeAffinity {
            required: vec![],
            preferred: vec![PreferredSchedulingTerm {
                weight: 0,
                preference: NodeSelectorTerm {
                    match_expressions: vec![SelectorRequirement::new(
                        "gpu",
                        SelectorOperator::Exists,
                        &[],
                    )],
                },
            }],
        });
        assert!(policy.validate().is_err());
    }

    #[test]
    fn validate_accepts_reasonable_policy() {
        let mut policy = PlacementPolicy::new("web", PlacementStrategy::Spread);
        policy.spread_constraints.push(SpreadConstraint::new("zone", 1));
        policy.tolerations.push(Toleration::exists("dedicated"));
        policy
            .rules
            .push(PolicyRule::constraint("has-gpu", "labels.gpu == \"true\""));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn parses_from_toml() {
        let text = r#"
name = "web"
strategy = "HighAvailability"
allow_not_ready = false

[[spread_constraints]]
topology_key = "zone"
max_skew = 1

[[tolerations]]
key = "dedicated"
operator = "Exists"

[[rules]]
name = "prod-only"
expression = 'labels.env == "prod"'
kind = "Constraint"

[cluster_selector.match_labels]
tier = "gold"
"#;
        let policy: PlacementPolicy = toml::from_str(text).unwrap();
        assert_eq!(policy.strategy, PlacementStrategy::HighAvailability);
        assert_eq!(policy.spread_constraints[0].when_unsatisfiable, WhenUnsatisfiable::DoNotSchedule);
        assert_eq!(policy.rules[0].weight, 1);
        assert_eq!(policy.cluster_selector.match_labels["tier"], "gold");
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn strategies_resolve_by_name() {
        assert_eq!(
            PlacementStrategy::from_name("high-availability"),
            Some(PlacementStrategy::HighAvailability)
        );
        assert_eq!(PlacementStrategy::from_name("multi"), Some(PlacementStrategy::Multi));
        assert_eq!(PlacementStrategy::from_name("HighAvailability"), None);
    }
}
