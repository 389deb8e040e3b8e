//! Transaction record and its state machine
//!
//! A `TransactionRecord` is the coordinator's in-memory view of one
//! in-flight transaction. It only moves forward:
//!
//! ```text
//! Pending -> Preparing -> Prepared -> Committing -> Committed
//!                      \-> Aborting -> Aborted
//! ```
//!
//! Votes are written while `Preparing`, acks while `Committing` or
//! `Aborting`. Once terminal the record rejects every write.

use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use twophase_common::TransactionId;

/// Transaction phase in the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionPhase {
    /// Created, no participant contacted yet
    Pending,
    /// Prepare phase has started
    Preparing,
    /// All participants have voted yes
    Prepared,
    /// Commit phase has started
    Committing,
    /// Transaction has been committed
    Committed,
    /// Rollback phase has started
    Aborting,
    /// Transaction has been aborted
    Aborted,
}

impl TransactionPhase {
    /// Whether the transaction has reached a final decision
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    fn can_transition_to(self, next: Self) -> bool {
        use TransactionPhase::*;
        matches!(
            (self, next),
            (Pending, Preparing)
                | (Preparing, Prepared)
                | (Preparing, Aborting)
                | (Prepared, Committing)
                | (Committing, Committed)
                | (Aborting, Aborted)
        )
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Aborting => "aborting",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Recorded prepare outcome for one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteStatus {
    Yes,
    No,
    /// No answer before the prepare deadline
    Timeout,
    NotYetVoted,
}

impl VoteStatus {
    pub fn is_yes(&self) -> bool {
        matches!(self, Self::Yes)
    }

    /// A vote that forces the transaction to abort
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::No | Self::Timeout)
    }
}

/// Recorded commit/rollback outcome for one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckStatus {
    Acked,
    /// Error or no answer before the phase deadline
    Failed,
    /// Not contacted (yet) in the completion phase
    NotYetAcked,
}

/// In-memory state for one in-flight transaction
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    id: TransactionId,
    phase: TransactionPhase,
    votes: Vec<VoteStatus>,
    acks: Vec<AckStatus>,
    started_at: Instant,
}

impl TransactionRecord {
    /// Create a pending record for `participant_count` participants
    pub fn new(id: TransactionId, participant_count: usize) -> Self {
        Self {
            id,
            phase: TransactionPhase::Pending,
            votes: vec![VoteStatus::NotYetVoted; participant_count],
            acks: vec![AckStatus::NotYetAcked; participant_count],
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn participant_count(&self) -> usize {
        self.votes.len()
    }

    pub fn votes(&self) -> &[VoteStatus] {
        &self.votes
    }

    pub fn acks(&self) -> &[AckStatus] {
        &self.acks
    }

    /// Time since the record was created
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn all_voted_yes(&self) -> bool {
        self.votes.iter().all(VoteStatus::is_yes)
    }

    /// Indices of participants that voted yes, in participant order
    pub fn yes_voters(&self) -> Vec<usize> {
        self.votes
            .iter()
            .enumerate()
            .filter(|(_, vote)| vote.is_yes())
            .map(|(index, _)| index)
            .collect()
    }

    /// Move to `next`, enforcing the state machine and the vote invariants
    pub fn transition(&mut self, next: TransactionPhase) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(CoordinatorError::TerminalTransaction(self.id));
        }

        let invalid = CoordinatorError::InvalidTransition {
            from: self.phase,
            to: next,
        };

        if !self.phase.can_transition_to(next) {
            return Err(invalid);
        }

        match next {
            TransactionPhase::Prepared | TransactionPhase::Committing if !self.all_voted_yes() => {
                return Err(invalid);
            }
            TransactionPhase::Aborting if !self.votes.iter().any(VoteStatus::is_negative) => {
                return Err(invalid);
            }
            _ => {}
        }

        self.phase = next;
        Ok(())
    }

    /// Close the prepare phase: `Prepared` on unanimity, `Aborting` otherwise
    ///
    /// Participants still marked `NotYetVoted` are treated as timed out.
    pub fn decide(&mut self) -> Result<TransactionPhase> {
        if self.phase != TransactionPhase::Preparing {
            return Err(CoordinatorError::InvalidState(format!(
                "Cannot decide transaction {} in phase {}",
                self.id, self.phase
            )));
        }

        for vote in &mut self.votes {
            if *vote == VoteStatus::NotYetVoted {
                *vote = VoteStatus::Timeout;
            }
        }

        let next = if self.all_voted_yes() {
            TransactionPhase::Prepared
        } else {
            TransactionPhase::Aborting
        };
        self.transition(next)?;
        Ok(next)
    }

    /// Move from the completion phase to its terminal phase
    pub fn finish(&mut self) -> Result<TransactionPhase> {
        let next = match self.phase {
            TransactionPhase::Committing => TransactionPhase::Committed,
            TransactionPhase::Aborting => TransactionPhase::Aborted,
            phase if phase.is_terminal() => {
                return Err(CoordinatorError::TerminalTransaction(self.id));
            }
            phase => {
                return Err(CoordinatorError::InvalidState(format!(
                    "Cannot finish transaction {} in phase {}",
                    self.id, phase
                )));
            }
        };
        self.transition(next)?;
        Ok(next)
    }

    /// Record the prepare outcome of one participant
    pub fn record_vote(&mut self, index: usize, vote: VoteStatus) -> Result<()> {
        self.check_writable(TransactionPhase::Preparing)?;
        let len = self.votes.len();
        let slot = self
            .votes
            .get_mut(index)
            .ok_or(CoordinatorError::SlotOutOfRange { index, len })?;
        *slot = vote;
        Ok(())
    }

    /// Record the commit/rollback outcome of one participant
    pub fn record_ack(&mut self, index: usize, ack: AckStatus) -> Result<()> {
        let expected = match self.phase {
            TransactionPhase::Aborting => TransactionPhase::Aborting,
            _ => TransactionPhase::Committing,
        };
        self.check_writable(expected)?;
        let len = self.acks.len();
        let slot = self
            .acks
            .get_mut(index)
            .ok_or(CoordinatorError::SlotOutOfRange { index, len })?;
        *slot = ack;
        Ok(())
    }

    fn check_writable(&self, expected: TransactionPhase) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(CoordinatorError::TerminalTransaction(self.id));
        }
        if self.phase != expected {
            return Err(CoordinatorError::InvalidState(format!(
                "Transaction {} is {}, expected {}",
                self.id, self.phase, expected
            )));
        }
        Ok(())
    }
}
