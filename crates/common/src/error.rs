//! Errors a participant may return from any protocol call

use thiserror::Error;

/// Participant-side failure
///
/// The coordinator never propagates these to its caller: a failed prepare
/// counts as a negative vote and a failed commit/rollback as a missing ack.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParticipantError {
    /// The participant declined for a business reason
    #[error("Refused: {0}")]
    Refused(String),

    /// The participant could not be reached
    #[error("Participant unavailable: {0}")]
    Unavailable(String),

    /// The participant's own call budget ran out
    #[error("Participant timed out")]
    Timeout,

    #[error("Participant error: {0}")]
    Other(String),
}
