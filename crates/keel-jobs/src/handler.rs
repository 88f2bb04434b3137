//! Task executors: the body a worker runs for each claimed job.

use std::time::Duration;

use async_trait::async_trait;

use keel_core::{Job, JobId};

/// Context provided to task executors.
pub struct TaskContext {
    /// The job being processed, as claimed.
    pub job: Job,
}

impl TaskContext {
    /// Create a new task context.
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job_id(&self) -> JobId {
        self.job.id
    }

    /// The opaque payload the producer stored.
    pub fn description(&self) -> &str {
        &self.job.description
    }

    /// Failed attempts before this one.
    pub fn attempts(&self) -> i32 {
        self.job.attempts
    }
}

/// Result of task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task completed.
    Success,
    /// The task failed with an error message; the retry policy decides what
    /// happens next.
    Failed(String),
}

/// Trait for task bodies.
///
/// Execution may be repeated for the same job (at-least-once), so
/// implementations must tolerate re-running a job that already had effects.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute the task.
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome;
}

/// Executor that succeeds immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpExecutor;

#[async_trait]
impl TaskExecutor for NoOpExecutor {
    async fn execute(&self, _ctx: TaskContext) -> TaskOutcome {
        TaskOutcome::Success
    }
}

/// Executor that sleeps for a fixed duration, standing in for real work.
///
/// With a fail marker set, any job whose description contains the marker
/// fails after the sleep.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    duration: Duration,
    fail_marker: Option<String>,
}

impl SimulatedWork {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            fail_marker: None,
        }
    }

    /// Fail jobs whose description contains `marker`.
    pub fn with_fail_marker(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }
}

#[async_trait]
impl TaskExecutor for SimulatedWork {
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        tokio::time::sleep(self.duration).await;

        match &self.fail_marker {
            Some(marker) if ctx.description().contains(marker.as_str()) => {
                TaskOutcome::Failed(format!("simulated failure for job {}", ctx.job_id()))
            }
            _ => TaskOutcome::Success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::job_fixture;

    #[tokio::test]
    async fn test_noop_executor() {
        let outcome = NoOpExecutor.execute(TaskContext::new(job_fixture(1, "a"))).await;
        assert_eq!(outcome, TaskOutcome::Success);
    }

    #[test]
    fn test_task_context_accessors() {
        let mut job = job_fixture(7, "render page");
        job.attempts = 2;
        let ctx = TaskContext::new(job);
        assert_eq!(ctx.job_id(), 7);
        assert_eq!(ctx.description(), "render page");
        assert_eq!(ctx.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_work_sleeps() {
        let work = SimulatedWork::new(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        let outcome = work.execute(TaskContext::new(job_fixture(1, "a"))).await;
        assert_eq!(outcome, TaskOutcome::Success);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_work_fail_marker() {
        let work = SimulatedWork::new(Duration::from_millis(10)).with_fail_marker("[fail]");

        let ok = work.execute(TaskContext::new(job_fixture(1, "fine"))).await;
        assert_eq!(ok, TaskOutcome::Success);

        let failed = work
            .execute(TaskContext::new(job_fixture(2, "please [fail] now")))
            .await;
        assert_eq!(
            failed,
            TaskOutcome::Failed("simulated failure for job 2".to_string())
        );
    }
}
