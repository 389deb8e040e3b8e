//! Error types for the coordinator
//!
//! Only malformed requests and internal state-machine violations are errors.
//! Participant refusals, transport failures and timeouts are recorded in the
//! transaction outcome instead.

use crate::transaction::TransactionPhase;
use thiserror::Error;
use twophase_common::TransactionId;

/// Coordinator error types
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Transaction has no participants")]
    NoParticipants,

    #[error("Invalid {phase} timeout: must be greater than zero")]
    InvalidTimeout { phase: &'static str },

    #[error("Transaction already in flight: {0}")]
    DuplicateTransaction(TransactionId),

    #[error("Too many transactions in flight (limit {limit})")]
    TooManyTransactions { limit: usize },

    #[error("Invalid transaction state transition: {from} -> {to}")]
    InvalidTransition {
        from: TransactionPhase,
        to: TransactionPhase,
    },

    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    #[error("Transaction {0} has already reached a decision")]
    TerminalTransaction(TransactionId),

    #[error("Participant index {index} out of range for {len} participants")]
    SlotOutOfRange { index: usize, len: usize },
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
