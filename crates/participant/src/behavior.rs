//! Fault injection for the in-memory participant

use std::time::Duration;
use twophase_common::Vote;

/// How a `MemoryParticipant` deviates from normal operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Behavior {
    /// Vote returned regardless of lock state (`None`: decide from locks)
    pub forced_vote: Option<Vote>,

    /// Delay before answering prepare
    pub prepare_delay: Duration,

    /// Delay before answering commit
    pub commit_delay: Duration,

    /// Delay before answering rollback
    pub rollback_delay: Duration,

    /// Answer prepare with a transport error
    pub fail_prepare: bool,

    /// Answer commit with a transport error, leaving state untouched
    pub fail_commit: bool,

    /// Answer rollback with a transport error, leaving state untouched
    pub fail_rollback: bool,
}

impl Behavior {
    /// Always vote no
    pub fn refusing() -> Self {
        Self {
            forced_vote: Some(Vote::No),
            ..Self::default()
        }
    }

    /// Answer prepare only after `delay`
    pub fn slow_prepare(delay: Duration) -> Self {
        Self {
            prepare_delay: delay,
            ..Self::default()
        }
    }

    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = delay;
        self
    }

    pub fn with_rollback_delay(mut self, delay: Duration) -> Self {
        self.rollback_delay = delay;
        self
    }

    pub fn with_failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn with_failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn with_failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }
}
