//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Prepare phase deadline used by `execute_with_defaults` (default: 5 seconds)
    pub default_prepare_timeout: Duration,

    /// Commit/rollback phase deadline used by `execute_with_defaults` (default: 5 seconds)
    pub default_commit_timeout: Duration,

    /// Extra commit/rollback attempts for a participant that returned an
    /// error, as long as the phase deadline leaves room (default: 0)
    pub ack_retries: u32,

    /// Pause between commit/rollback attempts (default: 50 ms)
    pub retry_backoff: Duration,

    /// Upper bound on concurrently executing transactions (default: unbounded)
    pub max_in_flight: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_prepare_timeout: Duration::from_secs(5),
            default_commit_timeout: Duration::from_secs(5),
            ack_retries: 0,
            retry_backoff: Duration::from_millis(50),
            max_in_flight: None,
        }
    }
}

impl CoordinatorConfig {
    /// Create config optimized for testing
    pub fn for_testing() -> Self {
        Self {
            default_prepare_timeout: Duration::from_millis(500),
            default_commit_timeout: Duration::from_millis(500),
            ack_retries: 0,
            retry_backoff: Duration::from_millis(10),
            max_in_flight: None,
        }
    }

    pub fn with_prepare_timeout(mut self, timeout: Duration) -> Self {
        self.default_prepare_timeout = timeout;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.default_commit_timeout = timeout;
        self
    }

    pub fn with_ack_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.ack_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }
}
