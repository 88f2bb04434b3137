//! Core traits for the keel job engine.
//!
//! These traits define the seams between the engine and its collaborators,
//! allowing the worker loop and reconciler to run against Postgres in
//! production and against in-memory doubles in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    FailureOutcome, Job, JobId, Result, RetryPolicy, StatusCounts, SweepLimits, SweepReport,
};

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable job table; the sole source of truth for job status.
///
/// Every mutating operation is a status-guarded conditional update. Claim and
/// sweep steps select rows with `SKIP LOCKED` semantics, so concurrent callers
/// never block on, or double-select, the same row.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `Created`. Rejects an empty description.
    async fn insert(&self, description: &str) -> Result<JobId>;

    /// Get a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Claim the lowest-id claimable job, moving it to `InProgress`.
    ///
    /// `Ok(None)` means nothing is claimable right now. That is normal
    /// control flow, not an error.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Move an in-progress job to `Succeeded`.
    ///
    /// Returns `false` when the job was no longer in progress (a lost race
    /// with recovery); nothing is changed in that case.
    async fn finalize_success(&self, id: JobId) -> Result<bool>;

    /// Record a failed attempt of an in-progress job.
    ///
    /// Atomically increments `attempts`, stores `error`, and moves the job to
    /// the status [`RetryPolicy::decide`] picks: `Failed` once attempts are
    /// exhausted, else back to `Dispatchable` with its hint marked as owed.
    /// Returns `None` when the job was no longer in progress.
    async fn record_failure(
        &self,
        id: JobId,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<Option<FailureOutcome>>;

    /// Promote up to `limit` created jobs to `Dispatchable` (own transaction).
    async fn promote_created(&self, limit: i64) -> Result<Vec<JobId>>;

    /// Re-stamp up to `limit` dispatchable jobs whose hint is missing or
    /// older than `stale_after` (own transaction).
    async fn refresh_stale_dispatched(
        &self,
        limit: i64,
        stale_after: Duration,
    ) -> Result<Vec<JobId>>;

    /// Return up to `limit` jobs stuck in progress longer than
    /// `running_timeout` to `Dispatchable` (own transaction).
    async fn recover_stuck(&self, limit: i64, running_timeout: Duration) -> Result<Vec<JobId>>;

    /// Refresh, promote and recover, in that order, in one transaction.
    async fn sweep(&self, limits: &SweepLimits) -> Result<SweepReport>;

    /// Row counts per status.
    async fn status_counts(&self) -> Result<StatusCounts>;
}

// =============================================================================
// DISPATCH HINTS
// =============================================================================

/// Why a hint wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A hint arrived. The id is informational only; it may be missing
    /// (coalesced or lagged hints) and may already be claimed.
    Hinted(Option<JobId>),
    /// Nothing arrived within the wait timeout.
    TimedOut,
}

/// Best-effort "work may be available" signal.
///
/// Hints may be duplicated, reordered or lost. They are never authoritative;
/// a worker always confirms by claiming against the [`JobStore`].
#[async_trait]
pub trait HintChannel: Send + Sync {
    /// Announce that `job_id` may be claimable.
    async fn hint(&self, job_id: JobId) -> Result<()>;

    /// Open a consumer handle. Each worker loop owns one.
    async fn subscribe(&self) -> Result<Box<dyn HintReceiver>>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Consumer side of a [`HintChannel`].
#[async_trait]
pub trait HintReceiver: Send {
    /// Wait up to `timeout` for a hint.
    async fn recv(&mut self, timeout: Duration) -> Result<Wake>;
}

// =============================================================================
// METRICS
// =============================================================================

/// Outcome counters injected into the worker loop.
pub trait MetricsSink: Send + Sync {
    /// A job reached `Succeeded`.
    fn job_succeeded(&self);

    /// A job reached `Failed` (terminal).
    fn job_failed(&self);
}
