//! Core coordinator implementation

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::executor::{PhaseExecutor, PhaseOperation};
use crate::outcome::Outcome;
use crate::store::{StoreEntry, TransactionStore};
use crate::transaction::{TransactionPhase, TransactionRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use twophase_common::{Participant, TransactionId};

/// Two-phase commit coordinator
///
/// Drives each transaction through prepare and then commit or rollback.
/// A single coordinator can run many transactions at once; they share
/// nothing but the in-flight registry.
pub struct Coordinator {
    /// Configuration
    config: CoordinatorConfig,

    /// Runs each protocol phase
    executor: PhaseExecutor,

    /// Transactions currently inside `execute`
    store: TransactionStore,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let executor = PhaseExecutor::new(&config);
        let store = TransactionStore::new(config.max_in_flight);

        Self {
            config,
            executor,
            store,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run a transaction under a freshly generated id
    pub async fn execute(
        &self,
        participants: &[Arc<dyn Participant>],
        prepare_timeout: Duration,
        commit_timeout: Duration,
    ) -> Result<Outcome> {
        self.execute_with_id(
            TransactionId::new(),
            participants,
            prepare_timeout,
            commit_timeout,
        )
        .await
    }

    /// Run a transaction with the configured default timeouts
    pub async fn execute_with_defaults(
        &self,
        participants: &[Arc<dyn Participant>],
    ) -> Result<Outcome> {
        self.execute(
            participants,
            self.config.default_prepare_timeout,
            self.config.default_commit_timeout,
        )
        .await
    }

    /// Run a transaction under a caller-supplied id
    ///
    /// Returns `Err` only for malformed requests (no participants, zero
    /// timeout, id already in flight, in-flight limit reached); no
    /// participant is contacted in that case. Every participant failure is
    /// reported through the returned `Outcome` instead.
    pub async fn execute_with_id(
        &self,
        id: TransactionId,
        participants: &[Arc<dyn Participant>],
        prepare_timeout: Duration,
        commit_timeout: Duration,
    ) -> Result<Outcome> {
        if participants.is_empty() {
            return Err(CoordinatorError::NoParticipants);
        }
        if prepare_timeout.is_zero() {
            return Err(CoordinatorError::InvalidTimeout { phase: "prepare" });
        }
        if commit_timeout.is_zero() {
            return Err(CoordinatorError::InvalidTimeout { phase: "commit" });
        }

        let entry = self.store.register(id)?;

        self.run_protocol(&entry, participants, prepare_timeout, commit_timeout)
            .instrument(tracing::info_span!("transaction", txn_id = %id))
            .await
    }

    /// Current phase of a transaction still inside `execute`
    pub fn phase_of(&self, id: &TransactionId) -> Option<TransactionPhase> {
        self.store.phase(id)
    }

    /// All transactions currently inside `execute`
    pub fn in_flight(&self) -> Vec<(TransactionId, TransactionPhase)> {
        self.store.in_flight()
    }

    async fn run_protocol(
        &self,
        entry: &StoreEntry<'_>,
        participants: &[Arc<dyn Participant>],
        prepare_timeout: Duration,
        commit_timeout: Duration,
    ) -> Result<Outcome> {
        let id = entry.id();
        let mut record = TransactionRecord::new(id, participants.len());
        let everyone: Vec<usize> = (0..participants.len()).collect();

        // Phase 1: Prepare
        record.transition(TransactionPhase::Preparing)?;
        entry.update(record.phase());
        tracing::debug!(
            "Starting prepare phase for txn {} with {} participant(s)",
            id,
            participants.len()
        );

        let prepare = self
            .executor
            .run(
                participants,
                &everyone,
                id,
                PhaseOperation::Prepare,
                prepare_timeout,
            )
            .await;

        for (index, outcome) in prepare.outcomes().iter().enumerate() {
            record.record_vote(index, outcome.vote())?;
        }

        // Decision point: nothing below can turn a commit into an abort
        let decided = record.decide()?;
        entry.update(decided);

        // Phase 2: Commit or rollback
        let (operation, targets) = if decided == TransactionPhase::Prepared {
            record.transition(TransactionPhase::Committing)?;
            (PhaseOperation::Commit, everyone)
        } else {
            tracing::debug!(
                "Prepare phase for txn {} failed at {:?}, rolling back yes voters",
                id,
                prepare.unsuccessful()
            );
            (PhaseOperation::Rollback, record.yes_voters())
        };
        entry.update(record.phase());

        let completion = self
            .executor
            .run(participants, &targets, id, operation, commit_timeout)
            .await;

        for &index in &targets {
            record.record_ack(index, completion.outcomes()[index].ack())?;
        }

        if !completion.all_succeeded() {
            tracing::warn!(
                "Participants {:?} did not acknowledge {} of txn {}",
                completion.unsuccessful(),
                operation,
                id
            );
        }

        let terminal = record.finish()?;
        entry.update(terminal);

        let outcome = Outcome::from_record(&record, prepare.elapsed())?;
        tracing::info!(
            "Transaction {} {} after {:?}",
            id,
            outcome.decision(),
            outcome.total_elapsed()
        );

        Ok(outcome)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}
