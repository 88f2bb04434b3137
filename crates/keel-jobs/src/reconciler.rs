//! Reconciler (poller): periodic promotion, re-announcement and recovery.
//!
//! Each tick is one [`JobStore::sweep`] transaction followed by one hint per
//! moved job. Hints go out only after the sweep commits, so a worker woken by
//! one always finds the row in its new state (or already claimed).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

use keel_core::{defaults, HintChannel, JobStore, Result, SweepLimits, SweepReport};

use crate::supervisor::{cancelled, ShutdownSignal};

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Per-step batch sizes and staleness thresholds.
    pub limits: SweepLimits,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            limits: SweepLimits::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Set the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replace all sweep limits.
    pub fn with_limits(mut self, limits: SweepLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set how long an in-progress job may run before it is recovered.
    pub fn with_running_timeout(mut self, timeout: Duration) -> Self {
        self.limits.running_timeout = timeout;
        self
    }

    /// Set how old a dispatch hint may get before it is re-sent.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.limits.stale_after = stale_after;
        self
    }
}

/// Periodically sweeps one queue and announces the jobs it moved.
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    hints: Arc<dyn HintChannel>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn JobStore>,
        hints: Arc<dyn HintChannel>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            hints,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one sweep and emit its hints.
    ///
    /// A failed sweep rolls back entirely and emits nothing. A failed hint is
    /// logged and skipped; the job's next refresh re-announces it.
    pub async fn tick(&self) -> Result<SweepReport> {
        let start = Instant::now();
        let report = self.store.sweep(&self.config.limits).await?;

        for &job_id in &report.recovered {
            warn!(job_id, "Recovered job stuck in progress");
        }

        let mut hinted = 0usize;
        for job_id in report.hinted_ids() {
            match self.hints.hint(job_id).await {
                Ok(()) => hinted += 1,
                Err(e) => warn!(
                    job_id,
                    backend = self.hints.backend(),
                    error = %e,
                    "Failed to publish dispatch hint"
                ),
            }
        }

        if report.is_empty() {
            trace!("Sweep found nothing to do");
        } else {
            info!(
                subsystem = "jobs",
                component = "reconciler",
                refreshed = report.refreshed.len(),
                promoted = report.promoted.len(),
                recovered = report.recovered.len(),
                hinted,
                duration_ms = start.elapsed().as_millis() as u64,
                "Sweep committed"
            );
        }

        Ok(report)
    }

    /// Sweep on every interval tick until cancelled.
    ///
    /// Cancellation is checked between ticks; a sweep in flight finishes.
    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(
            subsystem = "jobs",
            component = "reconciler",
            interval_ms = self.config.interval.as_millis() as u64,
            promote_batch = self.config.limits.promote,
            refresh_batch = self.config.limits.refresh,
            recover_batch = self.config.limits.recover,
            running_timeout_secs = self.config.limits.running_timeout.as_secs(),
            stale_after_secs = self.config.limits.stale_after.as_secs(),
            backend = self.hints.backend(),
            "Reconciler started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                warn!(
                    subsystem = "jobs",
                    component = "reconciler",
                    error = %e,
                    "Sweep failed, retrying next tick"
                );
            }
        }

        debug!("Reconciler loop exited");
        info!(subsystem = "jobs", component = "reconciler", "Reconciler stopped");
    }
}
