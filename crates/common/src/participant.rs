//! Participant contract

use crate::{ParticipantError, TransactionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A participant's answer to prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vote {
    /// The participant guarantees it can commit later
    Yes,
    /// The participant cannot guarantee a later commit
    No,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Yes => write!(f, "yes"),
            Vote::No => write!(f, "no"),
        }
    }
}

/// A resource that takes part in two-phase commit
///
/// Implementations are used as `Arc<dyn Participant>`. `commit` and
/// `rollback` must be idempotent: the coordinator may call them more than
/// once for the same transaction, and a call abandoned after a phase
/// timeout may still complete later.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Name used in logs and diagnostics
    fn name(&self) -> &str;

    /// Vote on whether this participant can commit `txn_id`
    async fn prepare(&self, txn_id: TransactionId) -> Result<Vote, ParticipantError>;

    /// Durably apply the effects of `txn_id`
    async fn commit(&self, txn_id: TransactionId) -> Result<(), ParticipantError>;

    /// Discard the effects of `txn_id`
    async fn rollback(&self, txn_id: TransactionId) -> Result<(), ParticipantError>;
}
