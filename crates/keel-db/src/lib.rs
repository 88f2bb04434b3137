//! # keel-db
//!
//! PostgreSQL layer for the keel job engine.
//!
//! This crate provides:
//! - Connection pool management, including a startup retry loop
//! - [`PgJobStore`], the `SKIP LOCKED` implementation of [`JobStore`]
//! - [`PgNotifyHints`], dispatch hints over LISTEN/NOTIFY
//!
//! ## Example
//!
//! ```rust,ignore
//! use keel_db::{ConnectRetry, Database, JobStore, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect_with_retry(
//!         "postgres://localhost/keel",
//!         PoolConfig::default(),
//!         &ConnectRetry::default(),
//!     )
//!     .await?
//!     .with_queue("emails");
//!     db.migrate().await?;
//!
//!     let id = db.jobs.insert("send welcome mail").await?;
//!     println!("Created job: {}", id);
//!     Ok(())
//! }
//! ```
pub mod jobs;
pub mod notify;
pub mod pool;

// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use keel_core::*;

pub use jobs::PgJobStore;
pub use notify::{channel_for_queue, PgNotifyHints};
pub use pool::{
    connect_with_retry, create_pool, create_pool_with_config, log_pool_metrics, ConnectRetry,
    PoolConfig,
};

/// Combined database context.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job store bound to one queue.
    pub jobs: PgJobStore,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobStore::new(pool.clone()),
            pool,
        }
    }

    /// Connect, retrying while the database comes up.
    pub async fn connect_with_retry(
        url: &str,
        config: PoolConfig,
        retry: &ConnectRetry,
    ) -> Result<Self> {
        let pool = connect_with_retry(url, config, retry).await?;
        Ok(Self::new(pool))
    }

    /// Bind the job store to a queue lane.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.jobs = self.jobs.with_queue(queue);
        self
    }

    /// Set the job store's dispatch mode.
    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.jobs = self.jobs.with_dispatch_mode(mode);
        self
    }

    /// LISTEN/NOTIFY hints for the bound queue lane.
    pub fn notify_hints(&self) -> PgNotifyHints {
        PgNotifyHints::for_queue(self.pool.clone(), self.jobs.queue())
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
