//! Default values shared by configuration loaders and builders.
//!
//! Every value here can be overridden through the environment; see
//! `keel_jobs::config` for the variable names.

use std::time::Duration;

// =============================================================================
// QUEUE
// =============================================================================

/// Queue lane used when none is configured.
pub const QUEUE_NAME: &str = "default";

// =============================================================================
// RECONCILER
// =============================================================================

/// Interval between reconciler sweeps in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 5_000;

/// Seconds a job may stay in progress before it is presumed abandoned.
pub const RUNNING_TIMEOUT_SECS: u64 = 3_600;

/// Seconds after which a dispatch hint is presumed lost and re-emitted.
pub const STALE_DISPATCH_SECS: u64 = 60;

/// Rows handled per reconciler step per sweep.
pub const SWEEP_BATCH: i64 = 10;

// =============================================================================
// WORKER
// =============================================================================

/// Maximum execution attempts before a job fails permanently.
pub const MAX_ATTEMPTS: i32 = 3;

/// How long a worker waits for a dispatch hint before polling the store.
pub const HINT_WAIT_MS: u64 = 5_000;

/// Worker loops started per process.
pub const WORKER_COUNT: usize = 4;

/// Sleep used by the simulated task body.
pub const SIMULATED_WORK_MS: u64 = 2_000;

/// Broadcast capacity for worker events and in-process hints.
pub const EVENT_CAPACITY: usize = 256;

// =============================================================================
// PROCESS
// =============================================================================

/// Hard deadline for in-flight work after shutdown is requested.
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// Startup connection attempts before the store is declared unavailable.
pub const DB_CONNECT_ATTEMPTS: u32 = 10;

/// Initial back-off between startup connection attempts.
pub const DB_CONNECT_BACKOFF_MS: u64 = 2_000;

/// Upper bound for the startup back-off.
pub const DB_CONNECT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Postgres NOTIFY channel used for dispatch hints.
pub const NOTIFY_CHANNEL: &str = "keel_jobs_available";
