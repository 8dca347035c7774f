//! Kubernetes-style label selectors.
//!
//! Used for workspace selection during discovery, cluster selection in
//! policies, node-affinity terms and pod-affinity terms.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Labels;
use crate::error::{ModelError, ModelResult};

static LABEL_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]{0,61}[A-Za-z0-9])?$",
    )
    .expect("label key pattern compiles")
});

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]{0,61}[A-Za-z0-9])?)?$")
        .expect("label value pattern compiles")
});

/// Set-based selector operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

/// A single `key <op> values` requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl SelectorRequirement {
    pub fn new(key: &str, operator: SelectorOperator, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Test this requirement against a label set.
    pub fn matches(&self, labels: &Labels) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
            SelectorOperator::Gt | SelectorOperator::Lt => {
                let actual = value.and_then(|v| v.parse::<i64>().ok());
                let bound = self.values.first().and_then(|b| b.parse::<i64>().ok());
                match (actual, bound) {
                    (Some(a), Some(b)) if self.operator == SelectorOperator::Gt => a > b,
                    (Some(a), Some(b)) => a < b,
                    _ => false,
                }
            }
        }
    }

    pub fn validate(&self) -> ModelResult<()> {
        validate_key(&self.key)?;
        match self.operator {
            SelectorOperator::In | SelectorOperator::NotIn => {
                if self.values.is_empty() {
                    return Err(ModelError::InvalidSelector(format!(
                        "{:?} on {:?} requires at least one value",
                        self.operator, self.key
                    )));
                }
                self.values.iter().try_for_each(|v| validate_value(v))
            }
            SelectorOperator::Exists | SelectorOperator::DoesNotExist => {
                if self.values.is_empty() {
                    Ok(())
                } else {
                    Err(ModelError::InvalidSelector(format!(
                        "{:?} on {:?} takes no values",
                        self.operator, self.key
                    )))
                }
            }
            SelectorOperator::Gt | SelectorOperator::Lt => match self.values.as_slice() {
                [v] if v.parse::<i64>().is_ok() => Ok(()),
                _ => Err(ModelError::InvalidSelector(format!(
                    "{:?} on {:?} requires exactly one integer value",
                    self.operator, self.key
                ))),
            },
        }
    }
}

impl fmt::Display for SelectorRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut values = self.values.clone();
        values.sort();
        match self.operator {
            SelectorOperator::In => write!(f, "{} in ({})", self.key, values.join(",")),
            SelectorOperator::NotIn => write!(f, "{} notin ({})", self.key, values.join(",")),
            SelectorOperator::Exists => write!(f, "{}", self.key),
            SelectorOperator::DoesNotExist => write!(f, "!{}", self.key),
            SelectorOperator::Gt => write!(f, "{}>{}", self.key, values.join(",")),
            SelectorOperator::Lt => write!(f, "{}<{}", self.key, values.join(",")),
        }
    }
}

/// Label selector: every `match_labels` pair and every expression must hold.
///
/// An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSelector {
    pub match_labels: Labels,
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    /// Selector that matches everything.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector requiring a single `key=value` label.
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.match_labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_expression(mut self, requirement: SelectorRequirement) -> Self {
        self.match_expressions.push(requirement);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
            && self.match_expressions.iter().all(|e| e.matches(labels))
    }

    pub fn validate(&self) -> ModelResult<()> {
        for (k, v) in &self.match_labels {
            validate_key(k)?;
            validate_value(v)?;
        }
        self.match_expressions.iter().try_for_each(|e| e.validate())
    }

    /// Canonical string form, stable across field ordering. Used as a cache key.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let mut exprs: Vec<String> = self.match_expressions.iter().map(|e| e.to_string()).collect();
        exprs.sort();
        parts.extend(exprs);
        f.write_str(&parts.join(","))
    }
}

fn validate_key(key: &str) -> ModelResult<()> {
    if key.len() <= 317 && LABEL_KEY.is_match(key) {
        Ok(())
    } else {
        Err(ModelError::InvalidSelector(format!("invalid label key {key:?}")))
    }
}

fn validate_value(value: &str) -> ModelResult<()> {
    if LABEL_VALUE.is_match(value) {
        Ok(())
    } else {
        Err(ModelError::InvalidSelector(format!(
            "invalid label value {value:?}"
        )))
    }
}
