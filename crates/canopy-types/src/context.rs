//! Cancellation and deadlines for long-running operations.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Why an operation stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Carried through discovery, scheduling and placement. Loops call
/// [`OpContext::check`] between units of work.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// No deadline, never cancelled unless asked.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Child context: cancelled with its parent, and bounded by the earlier
    /// of the two deadlines.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_live() {
        let ctx = OpContext::new();
        assert_eq!(ctx.check(), Ok(()));
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn cancel_is_observed() {
        let ctx = OpContext::new();
        ctx.cancel();
        assert_eq!(ctx.check(), Err(Interrupted::Cancelled));
    }

    #[test]
    fn zero_timeout_expires() {
        let ctx = OpContext::with_timeout(Duration::ZERO);
        assert_eq!(ctx.check(), Err(Interrupted::DeadlineExceeded));
    }

    #[test]
    fn child_follows_parent() {
        let parent = OpContext::with_timeout(Duration::from_secs(60));
        let child = parent.child(Some(Duration::from_secs(3600)));
        assert_eq!(child.deadline(), parent.deadline());

        parent.cancel();
        assert_eq!(child.check(), Err(Interrupted::Cancelled));
    }

    #[test]
    fn cancelling_child_leaves_parent() {
        let parent = OpContext::new();
        let child = parent.child(None);
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }
}
