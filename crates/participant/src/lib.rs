//! In-memory participant for two-phase commit
//!
//! `MemoryParticipant` is a small key/value resource manager that follows the
//! participant contract: writes are staged per transaction, `prepare` locks
//! the staged keys, `commit` applies them and `rollback` discards them. Both
//! completion calls are idempotent.
//!
//! Its `Behavior` can inject refusals, failures and delays, and every call is
//! logged, which makes it the participant of choice for tests and demos.

mod behavior;
mod memory;

pub use behavior::Behavior;
pub use memory::{Call, CallKind, MemoryParticipant, Resolution};
