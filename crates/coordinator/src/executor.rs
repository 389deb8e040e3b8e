//! Phase executor
//!
//! Runs one protocol phase (prepare, commit or rollback) against a set of
//! participants concurrently and gathers one outcome per participant.
//!
//! Every targeted participant gets its own spawned task that reports
//! `(index, outcome)` back over a channel, so each slot of the outcome vector
//! has exactly one writer. The executor stops listening when every task has
//! reported or when the phase deadline passes. Tasks still running at that
//! point are abandoned, not aborted: their participant call keeps going and
//! its late report is dropped.

use crate::config::CoordinatorConfig;
use crate::transaction::{AckStatus, VoteStatus};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use twophase_common::{Participant, ParticipantError, TransactionId, Vote};

/// The participant operation a phase invokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseOperation {
    Prepare,
    Commit,
    Rollback,
}

impl PhaseOperation {
    /// Outcome recorded for a targeted participant that never reported
    fn missing_outcome(self) -> PhaseOutcome {
        match self {
            Self::Prepare => PhaseOutcome::Timeout,
            Self::Commit | Self::Rollback => PhaseOutcome::Failed,
        }
    }

    fn success_outcome(self) -> PhaseOutcome {
        match self {
            Self::Prepare => PhaseOutcome::Yes,
            Self::Commit | Self::Rollback => PhaseOutcome::Acked,
        }
    }
}

impl fmt::Display for PhaseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// Outcome of one participant within one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseOutcome {
    /// Voted yes to prepare
    Yes,
    /// Voted no, or prepare returned an error
    No,
    /// Prepare did not answer before the deadline
    Timeout,
    /// Commit/rollback succeeded
    Acked,
    /// Commit/rollback errored or did not answer before the deadline
    Failed,
    /// Not targeted by this phase
    Skipped,
}

impl PhaseOutcome {
    /// The vote this outcome stands for
    pub fn vote(self) -> VoteStatus {
        match self {
            Self::Yes => VoteStatus::Yes,
            Self::No => VoteStatus::No,
            Self::Timeout => VoteStatus::Timeout,
            Self::Acked | Self::Failed | Self::Skipped => VoteStatus::NotYetVoted,
        }
    }

    /// The ack this outcome stands for
    pub fn ack(self) -> AckStatus {
        match self {
            Self::Acked => AckStatus::Acked,
            Self::Failed | Self::Timeout => AckStatus::Failed,
            Self::Yes | Self::No | Self::Skipped => AckStatus::NotYetAcked,
        }
    }
}

/// Aggregate result of one phase
#[derive(Debug, Clone)]
pub struct PhaseResult {
    operation: PhaseOperation,
    outcomes: Vec<PhaseOutcome>,
    all_succeeded: bool,
    elapsed: Duration,
}

impl PhaseResult {
    pub fn operation(&self) -> PhaseOperation {
        self.operation
    }

    /// Per-participant outcomes, indexed like the participant list
    pub fn outcomes(&self) -> &[PhaseOutcome] {
        &self.outcomes
    }

    /// Every targeted participant voted yes (prepare) or acked (commit/rollback)
    pub fn all_succeeded(&self) -> bool {
        self.all_succeeded
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Indices whose outcome is anything but success or `Skipped`
    pub fn unsuccessful(&self) -> Vec<usize> {
        let success = self.operation.success_outcome();
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| **outcome != success && **outcome != PhaseOutcome::Skipped)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Retry policy for commit/rollback calls
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    retries: u32,
    backoff: Duration,
}

/// Runs protocol phases against participants
#[derive(Debug, Clone)]
pub struct PhaseExecutor {
    retry: RetryPolicy,
}

impl PhaseExecutor {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            retry: RetryPolicy {
                retries: config.ack_retries,
                backoff: config.retry_backoff,
            },
        }
    }

    /// Run `operation` against the participants listed in `targets`
    ///
    /// Returns once every target has reported or `timeout` has elapsed.
    /// Out-of-range and duplicate target indices are ignored.
    pub async fn run(
        &self,
        participants: &[Arc<dyn Participant>],
        targets: &[usize],
        txn_id: TransactionId,
        operation: PhaseOperation,
        timeout: Duration,
    ) -> PhaseResult {
        let started = Instant::now();
        let deadline = phase_deadline(started, timeout);

        let targets: BTreeSet<usize> = targets
            .iter()
            .copied()
            .filter(|index| *index < participants.len())
            .collect();

        let mut outcomes = vec![PhaseOutcome::Skipped; participants.len()];
        let mut reported = vec![false; participants.len()];

        let (tx, mut rx) = mpsc::unbounded_channel();
        for &index in &targets {
            let participant = participants[index].clone();
            let tx = tx.clone();
            let retry = self.retry;

            tokio::spawn(async move {
                let outcome = invoke(&*participant, txn_id, operation, deadline, retry).await;
                if tx.send((index, outcome)).is_err() {
                    tracing::debug!(
                        "Discarding late {} outcome {:?} from {} for txn {}",
                        operation,
                        outcome,
                        participant.name(),
                        txn_id
                    );
                }
            });
        }
        // Only the spawned tasks hold senders now, so `recv` yields `None`
        // once all of them are gone.
        drop(tx);

        let mut pending = targets.len();
        while pending > 0 {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((index, outcome))) => {
                    if !reported[index] {
                        reported[index] = true;
                        outcomes[index] = outcome;
                        pending -= 1;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "{} phase for txn {} timed out after {:?} with {} participant(s) outstanding",
                        operation,
                        txn_id,
                        timeout,
                        pending
                    );
                    break;
                }
            }
        }

        // Barrier passed: no slot is written after this point.
        for &index in &targets {
            if !reported[index] {
                outcomes[index] = operation.missing_outcome();
            }
        }

        let success = operation.success_outcome();
        let all_succeeded = targets.iter().all(|&index| outcomes[index] == success);

        PhaseResult {
            operation,
            outcomes,
            all_succeeded,
            elapsed: started.elapsed(),
        }
    }
}

/// Roughly 30 years; stands in for deadlines past the end of `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `started + timeout`, clamped so huge timeouts cannot overflow
fn phase_deadline(started: Instant, timeout: Duration) -> Instant {
    started
        .checked_add(timeout)
        .or_else(|| started.checked_add(FAR_FUTURE))
        .unwrap_or(started)
}

/// Invoke one participant and translate its answer into an outcome
async fn invoke(
    participant: &dyn Participant,
    txn_id: TransactionId,
    operation: PhaseOperation,
    deadline: Instant,
    retry: RetryPolicy,
) -> PhaseOutcome {
    match operation {
        PhaseOperation::Prepare => match participant.prepare(txn_id).await {
            Ok(Vote::Yes) => PhaseOutcome::Yes,
            Ok(Vote::No) => {
                tracing::warn!("{} voted no on txn {}", participant.name(), txn_id);
                PhaseOutcome::No
            }
            Err(e) => {
                tracing::warn!(
                    "{} failed to prepare txn {}: {}",
                    participant.name(),
                    txn_id,
                    e
                );
                PhaseOutcome::No
            }
        },
        PhaseOperation::Commit | PhaseOperation::Rollback => {
            let mut attempt = 0;
            loop {
                match complete(participant, txn_id, operation).await {
                    Ok(()) => return PhaseOutcome::Acked,
                    Err(e) => {
                        let room = deadline.saturating_duration_since(Instant::now());
                        if attempt >= retry.retries || room <= retry.backoff {
                            tracing::warn!(
                                "{} failed to {} txn {}: {}",
                                participant.name(),
                                operation,
                                txn_id,
                                e
                            );
                            return PhaseOutcome::Failed;
                        }
                        attempt += 1;
                        tracing::debug!(
                            "Retrying {} of txn {} on {} (attempt {}): {}",
                            operation,
                            txn_id,
                            participant.name(),
                            attempt,
                            e
                        );
                        tokio::time::sleep(retry.backoff).await;
                    }
                }
            }
        }
    }
}

async fn complete(
    participant: &dyn Participant,
    txn_id: TransactionId,
    operation: PhaseOperation,
) -> Result<(), ParticipantError> {
    match operation {
        PhaseOperation::Commit => participant.commit(txn_id).await,
        PhaseOperation::Rollback => participant.rollback(txn_id).await,
        PhaseOperation::Prepare => Err(ParticipantError::Other(
            "prepare is not a completion operation".to_string(),
        )),
    }
}
