//! Common types for two-phase commit
//!
//! This crate defines:
//! - Transaction IDs (UUIDv7-based)
//! - The participant contract every resource manager implements
//! - Participant-side votes and errors

mod error;
mod participant;
mod transaction_id;

pub use error::ParticipantError;
pub use participant::{Participant, Vote};
pub use transaction_id::TransactionId;
