//! Two-phase commit coordinator
//!
//! Drives a fixed set of participants through a prepare phase and then a
//! commit or rollback phase. Each phase fans out to all participants
//! concurrently under a single phase-wide deadline.
//!
//! Participant refusals, transport errors and timeouts never surface as
//! errors: they are folded into a binary [`Decision`] and recorded in the
//! per-participant vote and ack vectors of the returned [`Outcome`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use twophase_coordinator::{Coordinator, CoordinatorConfig, Participant};
//! # async fn run(participants: Vec<Arc<dyn Participant>>) -> twophase_coordinator::Result<()> {
//! let coordinator = Coordinator::new(CoordinatorConfig::default());
//! let outcome = coordinator
//!     .execute(&participants, Duration::from_millis(500), Duration::from_secs(1))
//!     .await?;
//! println!("{} -> {}", outcome.id(), outcome.decision());
//! # Ok(())
//! # }
//! ```

mod config;
mod coordinator;
mod error;
mod executor;
mod outcome;
mod store;
mod transaction;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, Result};
pub use executor::{PhaseExecutor, PhaseOperation, PhaseOutcome, PhaseResult};
pub use outcome::{Decision, Outcome};
pub use store::{StoreEntry, TransactionStore};
pub use transaction::{AckStatus, TransactionPhase, TransactionRecord, VoteStatus};

pub use twophase_common::{Participant, ParticipantError, TransactionId, Vote};
