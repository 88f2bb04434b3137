//! Shared setup for Postgres integration tests.

#![allow(dead_code)]

use keel_db::test_fixtures::{test_database_url, unique_queue};
use keel_db::{create_pool, PgJobStore};
use sqlx::PgPool;

/// Connect to the test database and apply pending migrations.
pub async fn setup_test_pool() -> PgPool {
    let pool = create_pool(&test_database_url())
        .await
        .expect("Failed to create test pool");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// A store bound to a queue no other test touches.
pub async fn isolated_store(prefix: &str) -> (PgPool, PgJobStore) {
    let pool = setup_test_pool().await;
    let store = PgJobStore::new(pool.clone()).with_queue(unique_queue(prefix));
    (pool, store)
}

/// Backdate a job's `started_at` by `secs` seconds.
pub async fn backdate_started_at(pool: &PgPool, id: i64, secs: f64) {
    sqlx::query("UPDATE jobs SET started_at = NOW() - make_interval(secs => $2) WHERE id = $1")
        .bind(id)
        .bind(secs)
        .execute(pool)
        .await
        .expect("Failed to backdate started_at");
}

/// Backdate a job's `enqueued_at` by `secs` seconds.
pub async fn backdate_enqueued_at(pool: &PgPool, id: i64, secs: f64) {
    sqlx::query("UPDATE jobs SET enqueued_at = NOW() - make_interval(secs => $2) WHERE id = $1")
        .bind(id)
        .bind(secs)
        .execute(pool)
        .await
        .expect("Failed to backdate enqueued_at");
}
