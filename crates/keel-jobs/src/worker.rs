//! Worker loop: wait for a hint, drain claimable jobs, execute, finalize.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace, warn};

use keel_core::{
    defaults, HintReceiver, Job, JobId, JobStore, MetricsSink, RetryPolicy, Wake,
};

use crate::handler::{TaskContext, TaskExecutor, TaskOutcome};
use crate::supervisor::{cancelled, is_cancelled, ShutdownSignal};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to wait for a hint before polling anyway.
    pub hint_wait: Duration,
    /// Retry budget applied to task failures.
    pub retry: RetryPolicy,
    /// Upper bound on a single task execution; `None` means unbounded.
    pub task_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            hint_wait: Duration::from_millis(defaults::HINT_WAIT_MS),
            retry: RetryPolicy::default(),
            task_timeout: None,
        }
    }
}

impl WorkerConfig {
    /// Set the hint wait.
    pub fn with_hint_wait(mut self, wait: Duration) -> Self {
        self.hint_wait = wait;
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound every task execution.
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }
}

/// Event emitted by a worker loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Worker loop started.
    WorkerStarted { worker: usize },
    /// A job was claimed and its task is running.
    JobStarted { worker: usize, job_id: JobId },
    /// A job reached `Succeeded`.
    JobSucceeded { worker: usize, job_id: JobId },
    /// A job failed and went back to `Dispatchable`.
    JobRetrying {
        worker: usize,
        job_id: JobId,
        attempts: i32,
        error: String,
    },
    /// A job failed for the last time and is now `Failed`.
    JobFailed {
        worker: usize,
        job_id: JobId,
        attempts: i32,
        error: String,
    },
    /// Worker loop stopped.
    WorkerStopped { worker: usize },
}

/// A single worker loop.
///
/// Each loop processes one job at a time; run several loops for
/// concurrency. Loops share nothing in memory beyond the store handle and
/// coordinate only through the store's row locks.
pub struct WorkerLoop {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn TaskExecutor>,
    metrics: Arc<dyn MetricsSink>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    worker_id: usize,
}

impl WorkerLoop {
    /// Create a worker loop with its own event channel.
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn TaskExecutor>,
        metrics: Arc<dyn MetricsSink>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_CAPACITY);
        Self {
            store,
            executor,
            metrics,
            config,
            event_tx,
            worker_id: 0,
        }
    }

    /// Identify this loop in logs and events.
    pub fn with_worker_id(mut self, worker_id: usize) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// Publish events on a shared channel instead of a private one.
    pub fn with_event_sender(mut self, event_tx: broadcast::Sender<WorkerEvent>) -> Self {
        self.event_tx = event_tx;
        self
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run until cancelled.
    ///
    /// Cancellation is observed between jobs, never during one: a task that
    /// has started runs to completion and is finalized before the loop exits.
    #[instrument(skip_all, fields(worker = self.worker_id))]
    pub async fn run(&self, mut hints: Box<dyn HintReceiver>, mut shutdown: ShutdownSignal) {
        info!(
            subsystem = "jobs",
            component = "worker",
            hint_wait_ms = self.config.hint_wait.as_millis() as u64,
            max_attempts = self.config.retry.max_attempts(),
            "Worker loop started"
        );
        self.emit(WorkerEvent::WorkerStarted {
            worker: self.worker_id,
        });

        loop {
            if is_cancelled(&shutdown) {
                break;
            }

            let wake = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                wake = hints.recv(self.config.hint_wait) => wake,
            };

            match wake {
                Ok(Wake::Hinted(job_id)) => debug!(?job_id, "Woken by hint"),
                Ok(Wake::TimedOut) => trace!("Hint wait timed out, polling"),
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        error = %e,
                        backoff_ms = self.config.hint_wait.as_millis() as u64,
                        "Hint receiver failed, falling back to polling"
                    );
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut shutdown) => break,
                        _ = tokio::time::sleep(self.config.hint_wait) => {}
                    }
                }
            }

            self.drain(&shutdown).await;
        }

        self.emit(WorkerEvent::WorkerStopped {
            worker: self.worker_id,
        });
        info!(subsystem = "jobs", component = "worker", "Worker loop stopped");
    }

    /// Claim and process jobs until none is claimable, a claim fails, or
    /// cancellation is requested. Returns the number of jobs processed.
    pub async fn drain(&self, shutdown: &ShutdownSignal) -> usize {
        let mut processed = 0;

        loop {
            if is_cancelled(shutdown) {
                debug!(processed, "Drain interrupted by shutdown");
                break;
            }

            match self.store.claim_next().await {
                Ok(Some(job)) => {
                    self.process(job).await;
                    processed += 1;
                }
                Ok(None) => {
                    trace!(processed, "Nothing left to claim");
                    break;
                }
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        error = %e,
                        "Claim failed, ending drain"
                    );
                    break;
                }
            }
        }

        processed
    }

    /// Execute one claimed job and record its outcome.
    async fn process(&self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;

        info!(job_id, attempts = job.attempts, "Processing job");
        self.emit(WorkerEvent::JobStarted {
            worker: self.worker_id,
            job_id,
        });

        let outcome = self.execute(TaskContext::new(job)).await;

        match outcome {
            TaskOutcome::Success => match self.store.finalize_success(job_id).await {
                Ok(true) => {
                    self.metrics.job_succeeded();
                    info!(
                        job_id,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job completed successfully"
                    );
                    self.emit(WorkerEvent::JobSucceeded {
                        worker: self.worker_id,
                        job_id,
                    });
                }
                Ok(false) => {
                    debug!(job_id, "Job no longer in progress, success not recorded");
                }
                Err(e) => {
                    warn!(job_id, error = %e, "Failed to mark job as succeeded");
                }
            },
            TaskOutcome::Failed(error) => self.handle_failure(job_id, error, start).await,
        }
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let job_id = ctx.job_id();
        match self.config.task_timeout {
            None => self.executor.execute(ctx).await,
            Some(limit) => match tokio::time::timeout(limit, self.executor.execute(ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        job_id,
                        timeout_ms = limit.as_millis() as u64,
                        "Task exceeded timeout"
                    );
                    TaskOutcome::Failed(format!(
                        "task exceeded timeout of {}ms",
                        limit.as_millis()
                    ))
                }
            },
        }
    }

    async fn handle_failure(&self, job_id: JobId, error: String, start: Instant) {
        let max_attempts = self.config.retry.max_attempts();

        match self.store.record_failure(job_id, &error, &self.config.retry).await {
            Ok(Some(outcome)) if outcome.is_terminal() => {
                self.metrics.job_failed();
                warn!(
                    job_id,
                    attempts = outcome.attempts,
                    max_attempts,
                    %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed permanently"
                );
                self.emit(WorkerEvent::JobFailed {
                    worker: self.worker_id,
                    job_id,
                    attempts: outcome.attempts,
                    error,
                });
            }
            Ok(Some(outcome)) => {
                warn!(
                    job_id,
                    attempts = outcome.attempts,
                    max_attempts,
                    %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed, will retry"
                );
                self.emit(WorkerEvent::JobRetrying {
                    worker: self.worker_id,
                    job_id,
                    attempts: outcome.attempts,
                    error,
                });
            }
            Ok(None) => {
                debug!(job_id, "Job no longer in progress, failure not recorded");
            }
            Err(e) => {
                warn!(job_id, error = %e, "Failed to record job failure");
            }
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // No subscribers is the common case in production.
        let _ = self.event_tx.send(event);
    }
}
