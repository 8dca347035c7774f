//! Error types for placement computations.

use canopy_types::ModelError;
use thiserror::Error;

use crate::expr::ExprError;

/// Result type alias for placement operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("rule {rule:?}: {source}")]
    Rule {
        rule: String,
        #[source]
        source: ExprError,
    },

    #[error("unknown scorer plugin {0:?}")]
    UnknownScorer(String),

    #[error("unknown distribution strategy {0:?}")]
    UnknownStrategy(String),

    #[error("scorer {scorer:?} misconfigured: {reason}")]
    ScorerConfig { scorer: String, reason: String },

    #[error("strategy {strategy:?} misconfigured: {reason}")]
    StrategyConfig { strategy: String, reason: String },

    #[error("scorer {scorer:?} failed on {target}: {reason}")]
    Scoring {
        scorer: String,
        target: String,
        reason: String,
    },
}
