//! # keel-jobs
//!
//! Job processing loops for keel.
//!
//! This crate provides:
//! - [`WorkerLoop`]: wait for a dispatch hint, drain claimable jobs, execute
//!   and finalize them, routing failures through the retry policy
//! - [`Reconciler`]: periodic promotion, re-announcement and stuck-job
//!   recovery, one transaction per tick
//! - [`Supervisor`]: owns the loops and enforces a shutdown grace period
//! - Hint channels ([`LocalHints`], [`RedisHints`]), default task executors
//!   and outcome counters
//! - [`KeelConfig`]: environment configuration for the whole process
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use keel_db::{ConnectRetry, Database, PoolConfig};
//! use keel_jobs::{
//!     JobCounters, LocalHints, NoOpExecutor, Reconciler, ReconcilerConfig, Supervisor,
//!     WorkerConfig, WorkerLoop,
//! };
//!
//! let db = Database::connect_with_retry("postgres://...", PoolConfig::default(), &ConnectRetry::default()).await?;
//! let store = Arc::new(db.jobs.clone());
//! let hints = Arc::new(LocalHints::default());
//!
//! let mut supervisor = Supervisor::new();
//! supervisor.spawn_reconciler(Reconciler::new(store.clone(), hints.clone(), ReconcilerConfig::default()));
//! let worker = WorkerLoop::new(store, Arc::new(NoOpExecutor), Arc::new(JobCounters::new()), WorkerConfig::default());
//! supervisor.spawn_worker(worker, hints.subscribe().await?);
//!
//! // Graceful shutdown
//! let outcome = supervisor.shutdown(std::time::Duration::from_secs(10)).await;
//! ```

pub mod config;
pub mod handler;
pub mod hints;
pub mod metrics;
pub mod reconciler;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod test_support;

// Re-export core types
pub use keel_core::*;

pub use config::{HintBackend, KeelConfig, Role};
pub use handler::{NoOpExecutor, SimulatedWork, TaskContext, TaskExecutor, TaskOutcome};
pub use hints::{LocalHints, RedisHints};
pub use metrics::{CountersSnapshot, JobCounters};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use supervisor::{ShutdownOutcome, ShutdownSignal, Supervisor};
pub use worker::{WorkerConfig, WorkerEvent, WorkerLoop};
