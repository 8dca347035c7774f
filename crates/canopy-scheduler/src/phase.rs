//! Scheduling phases for one workload.
//!
//! `Queued → Filtering → Scoring → Binding → Complete`, with `Failed`
//! reachable from any non-terminal phase. Nothing leaves `Complete` or
//! `Failed`.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Current phase of a scheduling run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingPhase {
    Queued,
    /// Dropping targets that fail a hard constraint.
    Filtering,
    /// Running scorer plugins over the survivors.
    Scoring,
    /// Computing the replica distribution.
    Binding,
    Complete,
    Failed { reason: String },
}

impl SchedulingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Filtering => "filtering",
            Self::Scoring => "scoring",
            Self::Binding => "binding",
            Self::Complete => "complete",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }

    pub fn can_transition_to(&self, next: &SchedulingPhase) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Self::Failed { .. }) => true,
            (Self::Queued, Self::Filtering)
            | (Self::Filtering, Self::Scoring)
            | (Self::Scoring, Self::Binding)
            | (Self::Binding, Self::Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SchedulingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A recorded phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: SchedulingPhase,
    pub to: SchedulingPhase,
    /// Time since the run was queued.
    pub elapsed: Duration,
}

/// Tracks the phase of one scheduling run and its history.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    workload: String,
    phase: SchedulingPhase,
    started: Instant,
    history: Vec<PhaseTransition>,
}

impl PhaseTracker {
    pub fn new(workload: &str) -> Self {
        Self {
            workload: workload.to_string(),
            phase: SchedulingPhase::Queued,
            started: Instant::now(),
            history: Vec::new(),
        }
    }

    pub fn phase(&self) -> &SchedulingPhase {
        &self.phase
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn advance(&mut self, next: SchedulingPhase) -> SchedulerResult<()> {
        if !self.phase.can_transition_to(&next) {
            return Err(SchedulerError::InvalidTransition {
                from: self.phase.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        debug!(workload = %self.workload, from = %self.phase, to = %next, "phase transition");
        self.history.push(PhaseTransition {
            from: self.phase.clone(),
            to: next.clone(),
            elapsed: self.elapsed(),
        });
        self.phase = next;
        Ok(())
    }

    /// Move to `Failed` when the caller reports its own error.
    pub fn abort(&mut self, reason: impl Into<String>) -> SchedulerResult<()> {
        let reason = reason.into();
        warn!(workload = %self.workload, phase = %self.phase, reason = %reason, "scheduling failed");
        self.advance(SchedulingPhase::Failed { reason })
    }

    /// Move to `Failed` and return the matching error for the caller to
    /// propagate.
    pub fn fail(&mut self, reason: impl Into<String>) -> SchedulerError {
        let reason = reason.into();
        let phase = self.phase.as_str().to_string();
        if let Err(e) = self.abort(reason.clone()) {
            return e;
        }
        SchedulerError::PhaseFailed {
            workload: self.workload.clone(),
            phase,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_records_history() {
        let mut t = PhaseTracker::new("web");
        for next in [
            SchedulingPhase::Filtering,
            SchedulingPhase::Scoring,
            SchedulingPhase::Binding,
            SchedulingPhase::Complete,
        ] {
            t.advance(next).unwrap();
        }
        assert_eq!(t.phase(), &SchedulingPhase::Complete);
        assert_eq!(t.history().len(), 4);
        assert_eq!(t.history()[0].from, SchedulingPhase::Queued);
    }

    #[test]
    fn phases_cannot_be_skipped() {
        let mut t = PhaseTracker::new("web");
        assert!(matches!(
            t.advance(SchedulingPhase::Binding),
            Err(SchedulerError::InvalidTransition { .. })
        ));
        assert_eq!(t.phase(), &SchedulingPhase::Queued);
    }

    #[test]
    fn failure_carries_reason_and_phase() {
        let mut t = PhaseTracker::new("web");
        t.advance(SchedulingPhase::Filtering).unwrap();
        let err = t.fail("no feasible targets");
        assert_eq!(err.failure_reason(), Some("no feasible targets"));
        assert!(matches!(&err, SchedulerError::PhaseFailed { phase, .. } if phase == "filtering"));
        assert!(t.phase().is_terminal());
    }

    #[test]
    fn abort_records_the_failure() {
        let mut t = PhaseTracker::new("web");
        t.advance(SchedulingPhase::Filtering).unwrap();
        t.abort("operation cancelled").unwrap();
        assert_eq!(
            t.phase(),
            &SchedulingPhase::Failed {
                reason: "operation cancelled".into()
            }
        );
        assert_eq!(t.history().len(), 2);
        assert!(matches!(
            t.abort("again"),
            Err(SchedulerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn terminal_phases_are_final() {
        let mut t = PhaseTracker::new("web");
        t.fail("boom");
        assert!(t.advance(SchedulingPhase::Filtering).is_err());
        assert!(matches!(t.fail("again"), SchedulerError::InvalidTransition { .. }));

        let complete = SchedulingPhase::Complete;
        assert!(!complete.can_transition_to(&SchedulingPhase::Failed { reason: "x".into() }));
    }
}
