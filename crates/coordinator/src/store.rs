//! Registry of in-flight transactions
//!
//! Owned by a `Coordinator`. An entry lives exactly as long as the
//! `StoreEntry` guard handed out by `register`, which `execute` holds for
//! the duration of the protocol run.

use crate::error::{CoordinatorError, Result};
use crate::transaction::TransactionPhase;
use parking_lot::Mutex;
use std::collections::HashMap;
use twophase_common::TransactionId;

/// In-flight transactions and their current phase
#[derive(Debug, Default)]
pub struct TransactionStore {
    entries: Mutex<HashMap<TransactionId, TransactionPhase>>,
    max_in_flight: Option<usize>,
}

impl TransactionStore {
    pub fn new(max_in_flight: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_in_flight,
        }
    }

    /// Register `id` as pending; the entry is removed when the guard drops
    pub fn register(&self, id: TransactionId) -> Result<StoreEntry<'_>> {
        let mut entries = self.entries.lock();

        if entries.contains_key(&id) {
            return Err(CoordinatorError::DuplicateTransaction(id));
        }
        if let Some(limit) = self.max_in_flight
            && entries.len() >= limit
        {
            return Err(CoordinatorError::TooManyTransactions { limit });
        }

        entries.insert(id, TransactionPhase::Pending);
        Ok(StoreEntry { store: self, id })
    }

    /// Current phase of an in-flight transaction
    pub fn phase(&self, id: &TransactionId) -> Option<TransactionPhase> {
        self.entries.lock().get(id).copied()
    }

    /// Snapshot of all in-flight transactions, ordered by id
    pub fn in_flight(&self) -> Vec<(TransactionId, TransactionPhase)> {
        let mut snapshot: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(id, phase)| (*id, *phase))
            .collect();
        snapshot.sort_by_key(|(id, _)| *id);
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Registration guard for one in-flight transaction
#[derive(Debug)]
pub struct StoreEntry<'a> {
    store: &'a TransactionStore,
    id: TransactionId,
}

impl StoreEntry<'_> {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Publish a new phase for observers
    pub fn update(&self, phase: TransactionPhase) {
        if let Some(current) = self.store.entries.lock().get_mut(&self.id) {
            *current = phase;
        }
    }
}

impl Drop for StoreEntry<'_> {
    fn drop(&mut self) {
        self.store.entries.lock().remove(&self.id);
    }
}
