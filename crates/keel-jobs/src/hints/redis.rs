//! Dispatch hints over a Redis list.
//!
//! Publishing is `RPUSH key id`; consuming is `BLPOP key timeout`. Unlike the
//! broadcast backends, each hint wakes exactly one receiver, so with several
//! workers a hint behaves like a work ticket. Hints survive a worker restart
//! but not a Redis flush, which the hint contract allows.
//!
//! Each queue lane has its own list, so a worker bound to one lane never pops
//! (and drops) a hint meant for another.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tracing::{debug, info};

use keel_core::{defaults, Error, HintChannel, HintReceiver, JobId, Result, Wake};

/// Prefix of every hint list key.
pub const LIST_KEY_PREFIX: &str = "keel:jobs_available";

/// List carrying hints for `queue`.
pub fn list_key_for_queue(queue: &str) -> String {
    format!("{LIST_KEY_PREFIX}:{queue}")
}

/// Extra time the client waits for a `BLPOP` reply beyond the server-side
/// timeout.
const REPLY_SLACK: Duration = Duration::from_secs(2);

/// [`HintChannel`] backed by a Redis list.
#[derive(Clone)]
pub struct RedisHints {
    client: redis::Client,
    publisher: ConnectionManager,
    key: String,
}

impl RedisHints {
    /// Connect to `redis_url` for the default queue lane.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        Self::connect_for_queue(redis_url, defaults::QUEUE_NAME).await
    }

    /// Connect to `redis_url` for `queue`'s lane.
    pub async fn connect_for_queue(redis_url: &str, queue: &str) -> Result<Self> {
        Self::connect_with_key(redis_url, list_key_for_queue(queue)).await
    }

    pub async fn connect_with_key(redis_url: &str, key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("invalid REDIS_URL: {e}")))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| Error::Hint(format!("redis connect: {e}")))?;
        let key = key.into();

        info!(
            subsystem = "jobs",
            component = "hints",
            backend = "redis",
            key = %key,
            "Connected to Redis hint queue"
        );

        Ok(Self {
            client,
            publisher,
            key,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl HintChannel for RedisHints {
    async fn hint(&self, job_id: JobId) -> Result<()> {
        let mut conn = self.publisher.clone();
        let _: () = conn
            .rpush(&self.key, job_id)
            .await
            .map_err(|e| Error::Hint(format!("RPUSH {}: {e}", self.key)))?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn HintReceiver>> {
        // BLPOP parks its connection, so every receiver gets its own.
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Hint(format!("redis connect: {e}")))?;
        Ok(Box::new(RedisReceiver {
            conn,
            key: self.key.clone(),
        }))
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

struct RedisReceiver {
    conn: MultiplexedConnection,
    key: String,
}

#[async_trait]
impl HintReceiver for RedisReceiver {
    async fn recv(&mut self, timeout: Duration) -> Result<Wake> {
        let key = &self.key;
        let conn = &mut self.conn;
        let blpop = async move {
            let popped: redis::RedisResult<Option<(String, String)>> = redis::cmd("BLPOP")
                .arg(key)
                .arg(blpop_timeout_secs(timeout))
                .query_async(conn)
                .await;
            popped
        };

        match tokio::time::timeout(timeout + REPLY_SLACK, blpop).await {
            Err(_) => Ok(Wake::TimedOut),
            Ok(Ok(None)) => Ok(Wake::TimedOut),
            Ok(Ok(Some((_key, payload)))) => {
                let job_id = payload.trim().parse::<JobId>().ok();
                debug!(?job_id, "Hint popped");
                Ok(Wake::Hinted(job_id))
            }
            Ok(Err(e)) => Err(Error::Hint(format!("BLPOP: {e}"))),
        }
    }
}

/// `BLPOP` treats 0 as "block forever"; never send it.
fn blpop_timeout_secs(timeout: Duration) -> f64 {
    timeout.as_secs_f64().max(0.01)
}
