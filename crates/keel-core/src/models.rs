//! Job data model and lifecycle state machine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Stable integer identity of a job, assigned by the store.
pub type JobId = i64;

// =============================================================================
// STATUS
// =============================================================================

/// Lifecycle status of a job.
///
/// ```text
/// Created --promote--> Dispatchable --claim--> InProgress --success--> Succeeded
/// InProgress --stuck past timeout--> Dispatchable
/// InProgress --failure, attempts left--> Dispatchable
/// InProgress --failure, attempts exhausted--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Dispatchable,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Created,
        JobStatus::Dispatchable,
        JobStatus::InProgress,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    /// Database label of the status (`job_status` enum value).
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Dispatchable => "dispatchable",
            JobStatus::InProgress => "in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transition can leave this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Internal(format!("unknown job status '{s}'")))
    }
}

// =============================================================================
// DISPATCH MODE
// =============================================================================

/// Which statuses a worker may claim from.
///
/// `Staged` keeps the separate promotion step: only jobs the reconciler has
/// announced are claimable. `Direct` lets workers claim freshly created jobs
/// as well, collapsing the two stages for notify-driven deployments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Staged,
    Direct,
}

impl DispatchMode {
    /// Statuses a claim may select from, in this mode.
    pub fn claimable(self) -> &'static [JobStatus] {
        match self {
            DispatchMode::Staged => &[JobStatus::Dispatchable],
            DispatchMode::Direct => &[JobStatus::Created, JobStatus::Dispatchable],
        }
    }
}

impl FromStr for DispatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staged" => Ok(DispatchMode::Staged),
            "direct" => Ok(DispatchMode::Direct),
            other => Err(Error::Config(format!(
                "unknown dispatch mode '{other}' (expected 'staged' or 'direct')"
            ))),
        }
    }
}

// =============================================================================
// JOB
// =============================================================================

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Queue lane the job belongs to.
    pub queue: String,
    /// Opaque payload handed to the task executor.
    pub description: String,
    pub status: JobStatus,
    /// Failed execution attempts so far.
    pub attempts: i32,
    pub last_error: Option<String>,
    /// Set while the job is in progress, NULL otherwise.
    pub started_at: Option<DateTime<Utc>>,
    /// Last time a dispatch hint was emitted for the job.
    pub enqueued_at: Option<DateTime<Utc>>,
    /// Set once a terminal status is reached.
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Result of recording a task failure against an in-progress job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureOutcome {
    /// Attempt count after the increment.
    pub attempts: i32,
    /// `Dispatchable` when the job will be retried, `Failed` when exhausted.
    pub status: JobStatus,
}

impl FailureOutcome {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// =============================================================================
// SWEEP
// =============================================================================

/// Batch limits and deadlines for one reconciler sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepLimits {
    /// Max stale dispatchable jobs re-announced per sweep.
    pub refresh: i64,
    /// Max created jobs promoted per sweep.
    pub promote: i64,
    /// Max stuck jobs recovered per sweep.
    pub recover: i64,
    /// Age after which a dispatch hint is presumed lost.
    pub stale_after: Duration,
    /// Age after which an in-progress job is presumed abandoned.
    pub running_timeout: Duration,
}

impl Default for SweepLimits {
    fn default() -> Self {
        Self {
            refresh: defaults::SWEEP_BATCH,
            promote: defaults::SWEEP_BATCH,
            recover: defaults::SWEEP_BATCH,
            stale_after: Duration::from_secs(defaults::STALE_DISPATCH_SECS),
            running_timeout: Duration::from_secs(defaults::RUNNING_TIMEOUT_SECS),
        }
    }
}

/// Ids moved by one committed sweep, per step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refreshed: Vec<JobId>,
    pub promoted: Vec<JobId>,
    pub recovered: Vec<JobId>,
}

impl SweepReport {
    /// Every id that needs a dispatch hint, in step order.
    pub fn hinted_ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.refreshed
            .iter()
            .chain(&self.promoted)
            .chain(&self.recovered)
            .copied()
    }

    pub fn total(&self) -> usize {
        self.refreshed.len() + self.promoted.len() + self.recovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Row counts per status for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub created: i64,
    pub dispatchable: i64,
    pub in_progress: i64,
    pub succeeded: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn get(&self, status: JobStatus) -> i64 {
        match status {
            JobStatus::Created => self.created,
            JobStatus::Dispatchable => self.dispatchable,
            JobStatus::InProgress => self.in_progress,
            JobStatus::Succeeded => self.succeeded,
            JobStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> i64 {
        JobStatus::ALL.into_iter().map(|s| self.get(s)).sum()
    }
}
