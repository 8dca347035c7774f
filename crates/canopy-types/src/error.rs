//! Error types for the Canopy data model.

use thiserror::Error;

/// Result type alias for data-model validation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Validation failures for plain-data inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("invalid quantity {value:?}: {reason}")]
    InvalidQuantity { value: String, reason: String },

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("invalid workspace path: {0}")]
    InvalidPath(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}
