//! Structured task ownership and graceful shutdown.
//!
//! The [`Supervisor`] owns the cancellation sender and every spawned loop.
//! Loops observe a `watch::Receiver<bool>`; `true`, or a dropped sender,
//! means stop.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use keel_core::HintReceiver;

use crate::reconciler::Reconciler;
use crate::worker::WorkerLoop;

/// Cancellation signal observed by worker loops and reconcilers.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Whether cancellation has been requested.
pub fn is_cancelled(signal: &ShutdownSignal) -> bool {
    *signal.borrow() || signal.has_changed().is_err()
}

/// Resolve once cancellation has been requested.
pub async fn cancelled(signal: &mut ShutdownSignal) {
    // An Err means the sender is gone, which also means stop.
    let _ = signal.wait_for(|stop| *stop).await;
}

/// How a shutdown finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every task exited within the grace period.
    Clean,
    /// The grace period expired; `remaining` tasks were aborted.
    Forced { remaining: usize },
}

impl ShutdownOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ShutdownOutcome::Clean)
    }
}

/// Owns the reconciler and worker loop tasks of one process.
pub struct Supervisor {
    tasks: JoinSet<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            shutdown_tx,
        }
    }

    /// A fresh cancellation receiver, for loops spawned outside the supervisor.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_tx.subscribe()
    }

    pub fn spawn_reconciler(&mut self, reconciler: Reconciler) {
        let signal = self.shutdown_signal();
        self.tasks.spawn(async move {
            reconciler.run(signal).await;
        });
    }

    pub fn spawn_worker(&mut self, worker: WorkerLoop, hints: Box<dyn HintReceiver>) {
        let signal = self.shutdown_signal();
        self.tasks.spawn(async move {
            worker.run(hints, signal).await;
        });
    }

    /// Number of tasks still running.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal cancellation and wait up to `grace` for every task to exit.
    ///
    /// Tasks still running after the grace period are aborted. In-flight task
    /// bodies of aborted workers are abandoned mid-run; their jobs stay
    /// `InProgress` until a reconciler recovers them.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownOutcome {
        let start = Instant::now();
        let _ = self.shutdown_tx.send(true);

        info!(
            subsystem = "jobs",
            component = "supervisor",
            tasks = self.tasks.len(),
            grace_ms = grace.as_millis() as u64,
            "Shutdown requested, waiting for tasks"
        );

        let outcome = match tokio::time::timeout(grace, join_all(&mut self.tasks)).await {
            Ok(()) => ShutdownOutcome::Clean,
            Err(_) => {
                let remaining = self.tasks.len();
                self.tasks.abort_all();
                while self.tasks.join_next().await.is_some() {}
                ShutdownOutcome::Forced { remaining }
            }
        };

        match outcome {
            ShutdownOutcome::Clean => info!(
                subsystem = "jobs",
                component = "supervisor",
                duration_ms = start.elapsed().as_millis() as u64,
                "Shutdown complete"
            ),
            ShutdownOutcome::Forced { remaining } => warn!(
                subsystem = "jobs",
                component = "supervisor",
                remaining,
                duration_ms = start.elapsed().as_millis() as u64,
                "Grace period expired, aborted remaining tasks"
            ),
        }

        outcome
    }
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            if e.is_panic() {
                error!(
                    subsystem = "jobs",
                    component = "supervisor",
                    error = %e,
                    "Supervised task panicked"
                );
            }
        }
    }
}
