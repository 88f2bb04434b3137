//! In-memory doubles for worker, reconciler and supervisor tests.
//!
//! [`MemoryJobStore`] applies the same status-guarded transitions as the SQL
//! store, with a single mutex standing in for row locks.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keel_core::{
    DispatchMode, Error, FailureOutcome, HintChannel, HintReceiver, Job, JobId, JobStatus,
    JobStore, Result, RetryDecision, RetryPolicy, StatusCounts, SweepLimits, SweepReport, Wake,
};

use crate::handler::{TaskContext, TaskExecutor, TaskOutcome};
use crate::hints::LocalHints;

/// A job row with the given id and description, in `Created`.
pub fn job_fixture(id: JobId, description: &str) -> Job {
    Job {
        id,
        queue: "test".to_string(),
        description: description.to_string(),
        status: JobStatus::Created,
        attempts: 0,
        last_error: None,
        started_at: None,
        enqueued_at: None,
        finished_at: None,
        created_at: Utc::now(),
    }
}

fn older_than(ts: Option<DateTime<Utc>>, age: Duration, now: DateTime<Utc>) -> bool {
    match (ts, chrono::Duration::from_std(age)) {
        (Some(ts), Ok(age)) => ts < now - age,
        _ => false,
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// =============================================================================
// JOB STORE
// =============================================================================

pub struct MemoryJobStore {
    rows: Mutex<BTreeMap<JobId, Job>>,
    next_id: AtomicUsize,
    mode: DispatchMode,
    failing_claims: AtomicUsize,
    failing_sweeps: AtomicUsize,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_mode(DispatchMode::Staged)
    }

    pub fn with_mode(mode: DispatchMode) -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(1),
            mode,
            failing_claims: AtomicUsize::new(0),
            failing_sweeps: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` claims fail with a transient error.
    pub fn fail_next_claims(&self, n: usize) {
        self.failing_claims.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` sweeps fail before changing anything.
    pub fn fail_next_sweeps(&self, n: usize) {
        self.failing_sweeps.store(n, Ordering::SeqCst);
    }

    /// Move an in-progress job back to `Dispatchable` as recovery would.
    pub fn force_recover(&self, id: JobId) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(job) = rows.get_mut(&id) {
            if job.status == JobStatus::InProgress {
                job.status = JobStatus::Dispatchable;
                job.started_at = None;
                job.enqueued_at = Some(Utc::now());
            }
        }
    }

    pub fn backdate_started(&self, id: JobId, by: Duration) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(job) = rows.get_mut(&id) {
            job.started_at = job
                .started_at
                .map(|ts| ts - chrono::Duration::from_std(by).unwrap());
        }
    }

    pub fn backdate_enqueued(&self, id: JobId, by: Duration) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(job) = rows.get_mut(&id) {
            job.enqueued_at = job
                .enqueued_at
                .map(|ts| ts - chrono::Duration::from_std(by).unwrap());
        }
    }

    fn refresh_locked(
        rows: &mut BTreeMap<JobId, Job>,
        limit: i64,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Vec<JobId> {
        let mut ids = Vec::new();
        for job in rows.values_mut() {
            if ids.len() as i64 >= limit {
                break;
            }
            if job.status == JobStatus::Dispatchable
                && (job.enqueued_at.is_none() || older_than(job.enqueued_at, stale_after, now))
            {
                job.enqueued_at = Some(now);
                ids.push(job.id);
            }
        }
        ids
    }

    fn promote_locked(
        rows: &mut BTreeMap<JobId, Job>,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Vec<JobId> {
        let mut ids = Vec::new();
        for job in rows.values_mut() {
            if ids.len() as i64 >= limit {
                break;
            }
            if job.status == JobStatus::Created {
                job.status = JobStatus::Dispatchable;
                job.enqueued_at = Some(now);
                ids.push(job.id);
            }
        }
        ids
    }

    fn recover_locked(
        rows: &mut BTreeMap<JobId, Job>,
        limit: i64,
        running_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Vec<JobId> {
        let mut ids = Vec::new();
        for job in rows.values_mut() {
            if ids.len() as i64 >= limit {
                break;
            }
            if job.status == JobStatus::InProgress
                && older_than(job.started_at, running_timeout, now)
            {
                job.status = JobStatus::Dispatchable;
                job.started_at = None;
                job.enqueued_at = Some(now);
                ids.push(job.id);
            }
        }
        ids
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, description: &str) -> Result<JobId> {
        if description.trim().is_empty() {
            return Err(Error::InvalidInput("description is required".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as JobId;
        let mut job = job_fixture(id, description);
        job.queue = "memory".to_string();
        self.rows.lock().unwrap().insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        if take_one(&self.failing_claims) {
            return Err(Error::Unavailable("injected claim failure".into()));
        }
        let claimable = self.mode.claimable();
        let mut rows = self.rows.lock().unwrap();
        let job = rows
            .values_mut()
            .find(|job| claimable.contains(&job.status));
        Ok(job.map(|job| {
            job.status = JobStatus::InProgress;
            job.started_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn finalize_success(&self, id: JobId) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(job) if job.status == JobStatus::InProgress => {
                job.status = JobStatus::Succeeded;
                job.started_at = None;
                job.finished_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        id: JobId,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<Option<FailureOutcome>> {
        let mut rows = self.rows.lock().unwrap();
        let job = match rows.get_mut(&id) {
            Some(job) if job.status == JobStatus::InProgress => job,
            _ => return Ok(None),
        };

        let decision = policy.decide(job.attempts);
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.started_at = None;
        job.status = decision.status();
        match decision {
            RetryDecision::Terminal => job.finished_at = Some(Utc::now()),
            RetryDecision::Retry => job.enqueued_at = None,
        }

        Ok(Some(FailureOutcome {
            attempts: job.attempts,
            status: job.status,
        }))
    }

    async fn promote_created(&self, limit: i64) -> Result<Vec<JobId>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(Self::promote_locked(&mut rows, limit, Utc::now()))
    }

    async fn refresh_stale_dispatched(
        &self,
        limit: i64,
        stale_after: Duration,
    ) -> Result<Vec<JobId>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(Self::refresh_locked(&mut rows, limit, stale_after, Utc::now()))
    }

    async fn recover_stuck(&self, limit: i64, running_timeout: Duration) -> Result<Vec<JobId>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(Self::recover_locked(&mut rows, limit, running_timeout, Utc::now()))
    }

    async fn sweep(&self, limits: &SweepLimits) -> Result<SweepReport> {
        if take_one(&self.failing_sweeps) {
            return Err(Error::Unavailable("injected sweep failure".into()));
        }
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let refreshed = Self::refresh_locked(&mut rows, limits.refresh, limits.stale_after, now);
        let promoted = Self::promote_locked(&mut rows, limits.promote, now);
        let recovered =
            Self::recover_locked(&mut rows, limits.recover, limits.running_timeout, now);
        Ok(SweepReport {
            refreshed,
            promoted,
            recovered,
        })
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let rows = self.rows.lock().unwrap();
        let mut counts = StatusCounts::default();
        for job in rows.values() {
            match job.status {
                JobStatus::Created => counts.created += 1,
                JobStatus::Dispatchable => counts.dispatchable += 1,
                JobStatus::InProgress => counts.in_progress += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

// =============================================================================
// HINTS
// =============================================================================

/// Records every published hint; subscribers get a working local channel.
pub struct RecordingHints {
    inner: LocalHints,
    published: Mutex<Vec<JobId>>,
    failing_publishes: AtomicUsize,
}

impl Default for RecordingHints {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHints {
    pub fn new() -> Self {
        Self {
            inner: LocalHints::default(),
            published: Mutex::new(Vec::new()),
            failing_publishes: AtomicUsize::new(0),
        }
    }

    pub fn published(&self) -> Vec<JobId> {
        self.published.lock().unwrap().clone()
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl HintChannel for RecordingHints {
    async fn hint(&self, job_id: JobId) -> Result<()> {
        if take_one(&self.failing_publishes) {
            return Err(Error::Hint("injected publish failure".into()));
        }
        self.published.lock().unwrap().push(job_id);
        self.inner.hint(job_id).await
    }

    async fn subscribe(&self) -> Result<Box<dyn HintReceiver>> {
        self.inner.subscribe().await
    }

    fn backend(&self) -> &'static str {
        "recording"
    }
}

/// Receiver whose every wait fails.
pub struct BrokenReceiver;

#[async_trait]
impl HintReceiver for BrokenReceiver {
    async fn recv(&mut self, _timeout: Duration) -> Result<Wake> {
        Err(Error::Hint("connection reset".into()))
    }
}

// =============================================================================
// EXECUTORS
// =============================================================================

/// Returns queued outcomes in order, then succeeds. Records job ids it ran.
pub struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<TaskOutcome>>,
    seen: Mutex<Vec<JobId>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<TaskOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn always_succeed() -> Self {
        Self::new(Vec::new())
    }

    pub fn seen_ids(&self) -> Vec<JobId> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        self.seen.lock().unwrap().push(ctx.job_id());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TaskOutcome::Success)
    }
}

/// Always fails with the same message.
pub struct FailingExecutor {
    message: String,
}

impl FailingExecutor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl TaskExecutor for FailingExecutor {
    async fn execute(&self, _ctx: TaskContext) -> TaskOutcome {
        TaskOutcome::Failed(self.message.clone())
    }
}

/// Sleeps, then succeeds.
pub struct SlowExecutor {
    duration: Duration,
}

impl SlowExecutor {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl TaskExecutor for SlowExecutor {
    async fn execute(&self, _ctx: TaskContext) -> TaskOutcome {
        tokio::time::sleep(self.duration).await;
        TaskOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_matches_retry_rule() {
        let store = MemoryJobStore::new();
        let id = store.insert("x").await.unwrap();
        store.promote_created(10).await.unwrap();

        for expected in [JobStatus::Dispatchable, JobStatus::Failed] {
            store.claim_next().await.unwrap().unwrap();
            let outcome = store
                .record_failure(id, "e", &RetryPolicy::new(2).unwrap())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(outcome.status, expected);
        }
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_direct_mode() {
        let store = MemoryJobStore::with_mode(DispatchMode::Direct);
        let id = store.insert("x").await.unwrap();
        assert_eq!(store.claim_next().await.unwrap().unwrap().id, id);
    }
}
