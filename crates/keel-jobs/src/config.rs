//! Process configuration from environment variables.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DATABASE_URL` | `postgres://localhost/keel` | Job store |
//! | `DB_MAX_CONNECTIONS` | `10` | Pool size |
//! | `DB_CONNECT_ATTEMPTS` | `10` | Startup connection attempts (>= 1) |
//! | `DB_CONNECT_BACKOFF_MS` | `2000` | Initial startup back-off |
//! | `JOB_QUEUE` | `default` | Queue lane |
//! | `JOB_ROLE` | `all` | `poller`, `worker` or `all` |
//! | `JOB_WORKERS` | `4` | Worker loops (>= 1) |
//! | `JOB_POLL_INTERVAL_MS` | `5000` | Reconciler interval |
//! | `JOB_RUNNING_TIMEOUT_SECS` | `3600` | Stuck-job deadline |
//! | `JOB_MAX_ATTEMPTS` | `3` | Retry budget (>= 1) |
//! | `JOB_HINT_WAIT_MS` | `5000` | Worker hint wait |
//! | `JOB_STALE_DISPATCH_SECS` | `60` | Re-announce window |
//! | `JOB_PROMOTE_BATCH` | `10` | Jobs promoted per sweep |
//! | `JOB_REFRESH_BATCH` | `10` | Jobs re-announced per sweep |
//! | `JOB_RECOVER_BATCH` | `10` | Jobs recovered per sweep |
//! | `JOB_TASK_TIMEOUT_SECS` | unset | Per-task timeout |
//! | `JOB_SHUTDOWN_GRACE_SECS` | `10` | Hard shutdown deadline |
//! | `JOB_DISPATCH_MODE` | `staged` | `staged` or `direct` |
//! | `JOB_HINT_BACKEND` | `postgres` | `local`, `postgres` or `redis` |
//! | `REDIS_URL` | `redis://127.0.0.1:6379` | Redis hint backend |
//! | `JOB_SIMULATED_WORK_MS` | `2000` | Built-in executor sleep |
//!
//! Unset or empty variables take their default. A variable that is set but
//! does not parse, or is out of range, is a configuration error. Durations
//! are capped at [`MAX_DURATION`]; larger values overflow timestamp arithmetic
//! in the store. The `local` hint backend only reaches loops in the same
//! process, so it requires `JOB_ROLE=all`.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use keel_core::{defaults, DispatchMode, Error, Result, RetryPolicy, SweepLimits};
use keel_db::{ConnectRetry, PoolConfig};

use crate::reconciler::ReconcilerConfig;
use crate::worker::WorkerConfig;

/// Default database URL when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/keel";

/// Default Redis URL when `REDIS_URL` is unset.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Upper bound for any configured duration (100 years).
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Which loops this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    /// Reconciler only.
    Poller,
    /// Worker loops only.
    Worker,
    /// Both.
    #[default]
    All,
}

impl Role {
    pub fn runs_reconciler(self) -> bool {
        matches!(self, Role::Poller | Role::All)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, Role::Worker | Role::All)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Poller => "poller",
            Role::Worker => "worker",
            Role::All => "all",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poller" => Ok(Role::Poller),
            "worker" => Ok(Role::Worker),
            "all" => Ok(Role::All),
            other => Err(Error::Config(format!(
                "unknown role '{other}' (expected 'poller', 'worker' or 'all')"
            ))),
        }
    }
}

/// Transport used for dispatch hints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HintBackend {
    /// In-process broadcast; only useful with `Role::All`.
    Local,
    /// LISTEN/NOTIFY on the job database.
    #[default]
    Postgres,
    /// RPUSH/BLPOP on a Redis list.
    Redis,
}

impl HintBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            HintBackend::Local => "local",
            HintBackend::Postgres => "postgres",
            HintBackend::Redis => "redis",
        }
    }
}

impl FromStr for HintBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(HintBackend::Local),
            "postgres" | "pg" | "notify" => Ok(HintBackend::Postgres),
            "redis" => Ok(HintBackend::Redis),
            other => Err(Error::Config(format!(
                "unknown hint backend '{other}' (expected 'local', 'postgres' or 'redis')"
            ))),
        }
    }
}

/// Complete process configuration.
#[derive(Debug, Clone)]
pub struct KeelConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub connect_retry: ConnectRetry,
    pub queue: String,
    pub role: Role,
    pub workers: usize,
    pub poll_interval: Duration,
    pub running_timeout: Duration,
    pub retry: RetryPolicy,
    pub hint_wait: Duration,
    pub stale_after: Duration,
    pub promote_batch: i64,
    pub refresh_batch: i64,
    pub recover_batch: i64,
    pub task_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
    pub dispatch_mode: DispatchMode,
    pub hint_backend: HintBackend,
    pub redis_url: String,
    pub simulated_work: Duration,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: keel_db::pool::DEFAULT_MAX_CONNECTIONS,
            connect_retry: ConnectRetry::default(),
            queue: defaults::QUEUE_NAME.to_string(),
            role: Role::default(),
            workers: defaults::WORKER_COUNT,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            running_timeout: Duration::from_secs(defaults::RUNNING_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            hint_wait: Duration::from_millis(defaults::HINT_WAIT_MS),
            stale_after: Duration::from_secs(defaults::STALE_DISPATCH_SECS),
            promote_batch: defaults::SWEEP_BATCH,
            refresh_batch: defaults::SWEEP_BATCH,
            recover_batch: defaults::SWEEP_BATCH,
            task_timeout: None,
            shutdown_grace: Duration::from_secs(defaults::SHUTDOWN_GRACE_SECS),
            dispatch_mode: DispatchMode::default(),
            hint_backend: HintBackend::default(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            simulated_work: Duration::from_millis(defaults::SIMULATED_WORK_MS),
        }
    }
}

impl KeelConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let d = Self::default();

        let max_attempts: i32 = env.parse("JOB_MAX_ATTEMPTS", d.retry.max_attempts())?;
        let retry = RetryPolicy::new(max_attempts).map_err(|_| {
            Error::Config(format!("JOB_MAX_ATTEMPTS must be >= 1, got {max_attempts}"))
        })?;

        let config = Self {
            database_url: env.string("DATABASE_URL", &d.database_url),
            db_max_connections: env.at_least("DB_MAX_CONNECTIONS", d.db_max_connections, 1)?,
            connect_retry: ConnectRetry {
                attempts: env.at_least("DB_CONNECT_ATTEMPTS", d.connect_retry.attempts, 1)?,
                initial_backoff: env
                    .millis("DB_CONNECT_BACKOFF_MS", d.connect_retry.initial_backoff)?,
                max_backoff: d.connect_retry.max_backoff,
            },
            queue: env.string("JOB_QUEUE", &d.queue),
            role: env.parse("JOB_ROLE", d.role)?,
            workers: env.at_least("JOB_WORKERS", d.workers, 1)?,
            poll_interval: env.positive_millis("JOB_POLL_INTERVAL_MS", d.poll_interval)?,
            running_timeout: env.positive_secs("JOB_RUNNING_TIMEOUT_SECS", d.running_timeout)?,
            retry,
            hint_wait: env.positive_millis("JOB_HINT_WAIT_MS", d.hint_wait)?,
            stale_after: env.positive_secs("JOB_STALE_DISPATCH_SECS", d.stale_after)?,
            promote_batch: env.at_least("JOB_PROMOTE_BATCH", d.promote_batch, 1)?,
            refresh_batch: env.at_least("JOB_REFRESH_BATCH", d.refresh_batch, 1)?,
            recover_batch: env.at_least("JOB_RECOVER_BATCH", d.recover_batch, 1)?,
            task_timeout: match env.get("JOB_TASK_TIMEOUT_SECS") {
                None => None,
                Some(_) => Some(env.positive_secs("JOB_TASK_TIMEOUT_SECS", Duration::ZERO)?),
            },
            shutdown_grace: env.secs("JOB_SHUTDOWN_GRACE_SECS", d.shutdown_grace)?,
            dispatch_mode: env.parse("JOB_DISPATCH_MODE", d.dispatch_mode)?,
            hint_backend: env.parse("JOB_HINT_BACKEND", d.hint_backend)?,
            redis_url: env.string("REDIS_URL", &d.redis_url),
            simulated_work: env.millis("JOB_SIMULATED_WORK_MS", d.simulated_work)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that no single variable can express.
    fn validate(&self) -> Result<()> {
        if self.hint_backend == HintBackend::Local && self.role != Role::All {
            return Err(Error::Config(format!(
                "JOB_HINT_BACKEND=local cannot reach other processes; JOB_ROLE={} needs \
                 'postgres' or 'redis'",
                self.role.as_str()
            )));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new().max_connections(self.db_max_connections)
    }

    pub fn sweep_limits(&self) -> SweepLimits {
        SweepLimits {
            refresh: self.refresh_batch,
            promote: self.promote_batch,
            recover: self.recover_batch,
            stale_after: self.stale_after,
            running_timeout: self.running_timeout,
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig::default()
            .with_interval(self.poll_interval)
            .with_limits(self.sweep_limits())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_hint_wait(self.hint_wait)
            .with_retry_policy(self.retry)
            .with_task_timeout(self.task_timeout)
    }
}

/// Typed access to a variable lookup.
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value, with empty treated as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
        }
    }

    fn at_least<T>(&self, key: &str, default: T, min: T) -> Result<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
        T::Err: Display,
    {
        let value = self.parse(key, default)?;
        if value < min {
            return Err(Error::Config(format!("{key} must be >= {min}, got {value}")));
        }
        Ok(value)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration> {
        let ms: u64 = self.parse(key, default.as_millis() as u64)?;
        bounded(key, Duration::from_millis(ms))
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration> {
        let secs: u64 = self.parse(key, default.as_secs())?;
        bounded(key, Duration::from_secs(secs))
    }

    fn positive_millis(&self, key: &str, default: Duration) -> Result<Duration> {
        let ms = self.at_least(key, default.as_millis() as u64, 1)?;
        bounded(key, Duration::from_millis(ms))
    }

    fn positive_secs(&self, key: &str, default: Duration) -> Result<Duration> {
        let secs = self.at_least(key, default.as_secs(), 1)?;
        bounded(key, Duration::from_secs(secs))
    }
}

fn bounded(key: &str, value: Duration) -> Result<Duration> {
    if value > MAX_DURATION {
        return Err(Error::Config(format!(
            "{key} must be at most {}s, got {}s",
            MAX_DURATION.as_secs(),
            value.as_secs()
        )));
    }
    Ok(value)
}
