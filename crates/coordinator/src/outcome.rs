//! Final result of a transaction

use crate::error::{CoordinatorError, Result};
use crate::transaction::{AckStatus, TransactionPhase, TransactionRecord, VoteStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use twophase_common::TransactionId;

/// The coordinator's binary decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Committed,
    Aborted,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Committed => write!(f, "committed"),
            Decision::Aborted => write!(f, "aborted"),
        }
    }
}

/// Decision plus per-participant diagnostics
///
/// Immutable once built. Vectors are indexed like the participant list
/// passed to `execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    id: TransactionId,
    decision: Decision,
    votes: Vec<VoteStatus>,
    acks: Vec<AckStatus>,
    prepare_elapsed: Duration,
    total_elapsed: Duration,
}

impl Outcome {
    /// Snapshot a terminal record
    pub fn from_record(record: &TransactionRecord, prepare_elapsed: Duration) -> Result<Self> {
        let decision = match record.phase() {
            TransactionPhase::Committed => Decision::Committed,
            TransactionPhase::Aborted => Decision::Aborted,
            phase => {
                return Err(CoordinatorError::InvalidState(format!(
                    "Transaction {} has no decision yet (phase {})",
                    record.id(),
                    phase
                )));
            }
        };

        Ok(Self {
            id: record.id(),
            decision,
            votes: record.votes().to_vec(),
            acks: record.acks().to_vec(),
            prepare_elapsed,
            total_elapsed: record.elapsed(),
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn is_committed(&self) -> bool {
        self.decision == Decision::Committed
    }

    pub fn votes(&self) -> &[VoteStatus] {
        &self.votes
    }

    pub fn acks(&self) -> &[AckStatus] {
        &self.acks
    }

    /// Participants that voted no or timed out
    pub fn negative_votes(&self) -> Vec<usize> {
        indices(&self.votes, VoteStatus::is_negative)
    }

    /// Participants that were sent commit/rollback but did not acknowledge
    pub fn failed_acks(&self) -> Vec<usize> {
        indices(&self.acks, |ack| *ack == AckStatus::Failed)
    }

    /// How long the prepare phase took
    pub fn prepare_elapsed(&self) -> Duration {
        self.prepare_elapsed
    }

    /// How long the whole protocol run took
    pub fn total_elapsed(&self) -> Duration {
        self.total_elapsed
    }
}

fn indices<T>(items: &[T], pred: impl Fn(&T) -> bool) -> Vec<usize> {
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| pred(*item))
        .map(|(index, _)| index)
        .collect()
}
