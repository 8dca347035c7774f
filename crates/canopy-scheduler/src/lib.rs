//! canopy-scheduler: the filter → score → bind pipeline for one workload.
//!
//! The scheduler takes candidate targets that discovery already found and
//! produces ranked, scored targets and a replica distribution:
//!
//! - Filtering drops targets that fail any hard constraint and keeps the
//!   reasons
//! - Scoring runs the configured scorer plugins over the survivors
//! - Binding splits replicas with the policy's distribution strategy and
//!   verifies hard spread constraints
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── ScoringFramework (built from SchedulerConfig.scorers)
//!   ├── StrategyConfig → DistributionStrategy per policy
//!   └── PhaseTracker per run (Queued → … → Complete | Failed)
//! ```

pub mod error;
pub mod phase;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use phase::{PhaseTracker, PhaseTransition, SchedulingPhase};
pub use scheduler::{
    PreemptionResult, Rejection, ScheduleOutcome, Scheduler, SchedulerConfig, validate_workload,
};
