//! Scheduler error types.

use canopy_placement::PlacementError;
use canopy_types::{EvaluationResult, Interrupted};
use thiserror::Error;

/// Errors that can occur while scheduling a workload.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid workload {workload}: {reason}")]
    InvalidWorkload { workload: String, reason: String },

    #[error("scheduling {workload} failed during {phase}: {reason}")]
    PhaseFailed {
        workload: String,
        phase: String,
        reason: String,
    },

    #[error("invalid phase transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("scheduling interrupted during {phase}: {cause}")]
    Interrupted {
        phase: String,
        cause: Interrupted,
        /// Evaluations finished before the interruption.
        partial: Vec<EvaluationResult>,
    },

    #[error(transparent)]
    Placement(#[from] PlacementError),
}

impl SchedulerError {
    /// Reason carried by a phase failure.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::PhaseFailed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
