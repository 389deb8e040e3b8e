//! Key/value participant with staged writes and exclusive key locks

use crate::behavior::Behavior;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use twophase_common::{Participant, ParticipantError, TransactionId, Vote};

/// Which protocol call was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Prepare,
    Commit,
    Rollback,
}

/// One logged protocol call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub kind: CallKind,
    pub txn_id: TransactionId,
    /// When the call arrived
    pub started: Instant,
    /// When the call returned, `None` while it is still running
    pub finished: Option<Instant>,
}

/// How a transaction ended on this participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Committed,
    RolledBack,
}

#[derive(Debug, Default)]
struct State {
    /// Committed data
    data: BTreeMap<String, String>,

    /// Writes waiting for a decision
    staged: HashMap<TransactionId, BTreeMap<String, String>>,

    /// Exclusive key locks taken at prepare
    locks: HashMap<String, TransactionId>,

    /// Voted yes, awaiting a decision
    prepared: HashSet<TransactionId>,

    /// Final state of finished transactions
    resolved: HashMap<TransactionId, Resolution>,
}

impl State {
    fn finish(&mut self, txn_id: TransactionId, resolution: Resolution) {
        self.locks.retain(|_, holder| *holder != txn_id);
        self.prepared.remove(&txn_id);
        self.resolved.insert(txn_id, resolution);
    }
}

/// In-memory key/value participant
pub struct MemoryParticipant {
    name: String,
    state: Mutex<State>,
    behavior: Mutex<Behavior>,
    calls: Mutex<Vec<Call>>,
}

impl MemoryParticipant {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_behavior(name, Behavior::default())
    }

    pub fn with_behavior(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            behavior: Mutex::new(behavior),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replace the fault-injection behavior for subsequent calls
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    /// Stage a write for `txn_id`
    ///
    /// Fails once the transaction has been prepared or resolved.
    pub fn stage(
        &self,
        txn_id: TransactionId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ParticipantError> {
        let mut state = self.state.lock();
        if state.prepared.contains(&txn_id) {
            return Err(ParticipantError::Refused(format!(
                "txn {} is already prepared",
                txn_id
            )));
        }
        if let Some(resolution) = state.resolved.get(&txn_id) {
            return Err(ParticipantError::Refused(format!(
                "txn {} is already {:?}",
                txn_id, resolution
            )));
        }
        state
            .staged
            .entry(txn_id)
            .or_default()
            .insert(key.into(), value.into());
        Ok(())
    }

    /// Committed value of `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().data.get(key).cloned()
    }

    /// Copy of all committed data
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.state.lock().data.clone()
    }

    /// Transaction holding the lock on `key`, if any
    pub fn lock_holder(&self, key: &str) -> Option<TransactionId> {
        self.state.lock().locks.get(key).copied()
    }

    pub fn resolution(&self, txn_id: TransactionId) -> Option<Resolution> {
        self.state.lock().resolved.get(&txn_id).copied()
    }

    /// Whether `txn_id` voted yes and still awaits a decision
    pub fn is_prepared(&self, txn_id: TransactionId) -> bool {
        self.state.lock().prepared.contains(&txn_id)
    }

    /// All calls received so far, in arrival order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Kinds of the calls received for `txn_id`, in arrival order
    pub fn calls_for(&self, txn_id: TransactionId) -> Vec<CallKind> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.txn_id == txn_id)
            .map(|call| call.kind)
            .collect()
    }

    pub fn call_count(&self, kind: CallKind) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.kind == kind)
            .count()
    }

    fn begin_call(&self, kind: CallKind, txn_id: TransactionId) -> usize {
        let mut calls = self.calls.lock();
        calls.push(Call {
            kind,
            txn_id,
            started: Instant::now(),
            finished: None,
        });
        calls.len() - 1
    }

    fn end_call(&self, slot: usize) {
        if let Some(call) = self.calls.lock().get_mut(slot) {
            call.finished = Some(Instant::now());
        }
    }

    async fn pause(delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn vote(&self, txn_id: TransactionId) -> Result<Vote, ParticipantError> {
        let behavior = self.behavior.lock().clone();
        if behavior.fail_prepare {
            return Err(ParticipantError::Unavailable(format!(
                "{} dropped prepare",
                self.name
            )));
        }
        if let Some(vote) = behavior.forced_vote {
            return Ok(vote);
        }

        let mut state = self.state.lock();
        if state.prepared.contains(&txn_id) {
            return Ok(Vote::Yes);
        }
        if state.resolved.contains_key(&txn_id) {
            return Ok(Vote::No);
        }

        let keys: Vec<String> = state
            .staged
            .get(&txn_id)
            .map(|writes| writes.keys().cloned().collect())
            .unwrap_or_default();

        let conflict = keys.iter().find(|key| {
            state
                .locks
                .get(*key)
                .is_some_and(|holder| *holder != txn_id)
        });
        if let Some(key) = conflict {
            tracing::debug!(
                "{}: txn {} conflicts on locked key {}",
                self.name,
                txn_id,
                key
            );
            return Ok(Vote::No);
        }

        for key in keys {
            state.locks.insert(key, txn_id);
        }
        state.prepared.insert(txn_id);
        Ok(Vote::Yes)
    }

    fn apply_commit(&self, txn_id: TransactionId) -> Result<(), ParticipantError> {
        if self.behavior.lock().fail_commit {
            return Err(ParticipantError::Unavailable(format!(
                "{} dropped commit",
                self.name
            )));
        }

        let mut state = self.state.lock();
        match state.resolved.get(&txn_id) {
            Some(Resolution::Committed) => return Ok(()),
            Some(Resolution::RolledBack) => {
                return Err(ParticipantError::Refused(format!(
                    "txn {} was rolled back",
                    txn_id
                )));
            }
            None => {}
        }
        if !state.prepared.contains(&txn_id) {
            return Err(ParticipantError::Refused(format!(
                "txn {} was never prepared",
                txn_id
            )));
        }

        let writes = state.staged.remove(&txn_id).unwrap_or_default();
        tracing::debug!(
            "{}: committing {} write(s) for txn {}",
            self.name,
            writes.len(),
            txn_id
        );
        state.data.extend(writes);
        state.finish(txn_id, Resolution::Committed);
        Ok(())
    }

    fn apply_rollback(&self, txn_id: TransactionId) -> Result<(), ParticipantError> {
        if self.behavior.lock().fail_rollback {
            return Err(ParticipantError::Unavailable(format!(
                "{} dropped rollback",
                self.name
            )));
        }

        let mut state = self.state.lock();
        match state.resolved.get(&txn_id) {
            Some(Resolution::RolledBack) => return Ok(()),
            Some(Resolution::Committed) => {
                return Err(ParticipantError::Refused(format!(
                    "txn {} was committed",
                    txn_id
                )));
            }
            None => {}
        }

        state.staged.remove(&txn_id);
        state.finish(txn_id, Resolution::RolledBack);
        Ok(())
    }
}

#[async_trait]
impl Participant for MemoryParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, txn_id: TransactionId) -> Result<Vote, ParticipantError> {
        let slot = self.begin_call(CallKind::Prepare, txn_id);
        let delay = self.behavior.lock().prepare_delay;
        Self::pause(delay).await;

        let vote = self.vote(txn_id);
        self.end_call(slot);
        vote
    }

    async fn commit(&self, txn_id: TransactionId) -> Result<(), ParticipantError> {
        let slot = self.begin_call(CallKind::Commit, txn_id);
        let delay = self.behavior.lock().commit_delay;
        Self::pause(delay).await;

        let result = self.apply_commit(txn_id);
        self.end_call(slot);
        result
    }

    async fn rollback(&self, txn_id: TransactionId) -> Result<(), ParticipantError> {
        let slot = self.begin_call(CallKind::Rollback, txn_id);
        let delay = self.behavior.lock().rollback_delay;
        Self::pause(delay).await;

        let result = self.apply_rollback(txn_id);
        self.end_call(slot);
        result
    }
}
