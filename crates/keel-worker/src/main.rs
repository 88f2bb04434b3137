//! keel-worker: runs the reconciler and/or worker loops for one queue.
//!
//! Configuration is read from the environment (see `KeelConfig`), after
//! loading a `.env` file if one is present.

mod logging;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use keel_db::{log_pool_metrics, Database};
use keel_jobs::{
    HintBackend, HintChannel, JobCounters, JobStore, KeelConfig, LocalHints, RedisHints,
    Reconciler, SimulatedWork, Supervisor, WorkerLoop,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_settings = logging::LogSettings::from_env();
    let _log_guard = logging::init(&log_settings);
    info!(
        log_format = ?log_settings.format,
        log_file = log_settings
            .file
            .as_deref()
            .and_then(|p| p.to_str())
            .unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = KeelConfig::from_env().context("invalid configuration")?;
    info!(
        queue = %config.queue,
        role = config.role.as_str(),
        workers = config.workers,
        hint_backend = config.hint_backend.as_str(),
        dispatch_mode = ?config.dispatch_mode,
        max_attempts = config.retry.max_attempts(),
        "Starting keel-worker"
    );

    let db = Database::connect_with_retry(
        &config.database_url,
        config.pool_config(),
        &config.connect_retry,
    )
    .await
    .context("database unavailable")?
    .with_queue(config.queue.clone())
    .with_dispatch_mode(config.dispatch_mode);

    db.migrate().await.context("failed to run migrations")?;
    log_pool_metrics(db.pool());

    let hints: Arc<dyn HintChannel> = match config.hint_backend {
        HintBackend::Local => Arc::new(LocalHints::default()),
        HintBackend::Postgres => Arc::new(db.notify_hints()),
        HintBackend::Redis => Arc::new(
            RedisHints::connect_for_queue(&config.redis_url, &config.queue)
                .await
                .context("failed to connect to redis")?,
        ),
    };

    let store = Arc::new(db.jobs.clone());
    let counters = Arc::new(JobCounters::new());
    let executor = Arc::new(SimulatedWork::new(config.simulated_work));

    let mut supervisor = Supervisor::new();

    if config.role.runs_reconciler() {
        supervisor.spawn_reconciler(Reconciler::new(
            store.clone(),
            hints.clone(),
            config.reconciler_config(),
        ));
    }

    if config.role.runs_workers() {
        for id in 0..config.workers {
            let receiver = hints
                .subscribe()
                .await
                .with_context(|| format!("failed to subscribe worker {id} to dispatch hints"))?;
            let worker = WorkerLoop::new(
                store.clone(),
                executor.clone(),
                counters.clone(),
                config.worker_config(),
            )
            .with_worker_id(id);
            supervisor.spawn_worker(worker, receiver);
        }
    }

    info!(tasks = supervisor.task_count(), "keel-worker running");

    shutdown_signal().await;

    let outcome = supervisor.shutdown(config.shutdown_grace).await;

    let snapshot = counters.snapshot();
    info!(
        succeeded = snapshot.succeeded,
        failed = snapshot.failed,
        "Job counters at shutdown"
    );

    match store.status_counts().await {
        Ok(counts) => info!(
            queue = %config.queue,
            created = counts.created,
            dispatchable = counts.dispatchable,
            in_progress = counts.in_progress,
            succeeded = counts.succeeded,
            failed = counts.failed,
            "Queue status at shutdown"
        ),
        Err(e) => warn!(error = %e, "Failed to read queue status at shutdown"),
    }
    log_pool_metrics(db.pool());

    info!(clean = outcome.is_clean(), "keel-worker stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
///
/// If a handler cannot be installed that source is ignored and the other one
/// still ends the wait.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
