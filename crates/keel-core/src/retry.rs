//! Retry decision for failed task executions.
//!
//! The decision is a pure function of the attempt count. Stores apply the same
//! rule atomically inside their failure update (see
//! [`JobStore::record_failure`](crate::JobStore::record_failure)); this type is
//! the single place the rule is spelled out in Rust.

use crate::error::{Error, Result};
use crate::models::JobStatus;

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the job to `Dispatchable`; the reconciler re-announces it.
    Retry,
    /// Attempts exhausted, the job becomes `Failed`.
    Terminal,
}

impl RetryDecision {
    /// Status the job lands in under this decision.
    pub fn status(self) -> JobStatus {
        match self {
            RetryDecision::Retry => JobStatus::Dispatchable,
            RetryDecision::Terminal => JobStatus::Failed,
        }
    }
}

/// Bounded-attempts retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: i32,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` executions (at least one).
    pub fn new(max_attempts: i32) -> Result<Self> {
        if max_attempts < 1 {
            return Err(Error::Config(format!(
                "max attempts must be >= 1, got {max_attempts}"
            )));
        }
        Ok(Self { max_attempts })
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Decide the fate of a job that just failed with `current_attempts`
    /// previous failures recorded.
    pub fn decide(&self, current_attempts: i32) -> RetryDecision {
        if current_attempts.saturating_add(1) >= self.max_attempts {
            RetryDecision::Terminal
        } else {
            RetryDecision::Retry
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::defaults::MAX_ATTEMPTS,
        }
    }
}
