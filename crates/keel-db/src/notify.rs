//! Dispatch hints over Postgres LISTEN/NOTIFY.
//!
//! Publishing goes through the shared pool with `pg_notify`. Every receiver
//! holds a [`PgListener`] on a dedicated single-connection pool built from the
//! shared pool's connect options, so idle listeners never take connections
//! the job store needs. Notifications sent while a listener is reconnecting
//! are lost, which the hint contract allows.
//!
//! Channels are per queue lane (see [`channel_for_queue`]), so a hint for one
//! lane never wakes workers bound to another.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::{Pool, Postgres};
use tracing::{debug, trace};

use keel_core::{defaults, Error, HintChannel, HintReceiver, JobId, Result, Wake};

/// Longest channel name Postgres accepts (`NAMEDATALEN - 1`).
const MAX_CHANNEL_LEN: usize = 63;

/// NOTIFY channel carrying hints for `queue`.
///
/// Names past the identifier limit are cut at a char boundary. Publisher and
/// listeners derive the name the same way, so they always agree; two long
/// queue names sharing a prefix only cost each other spurious wake-ups.
pub fn channel_for_queue(queue: &str) -> String {
    let mut channel = format!("{}:{queue}", defaults::NOTIFY_CHANNEL);
    if channel.len() > MAX_CHANNEL_LEN {
        let mut end = MAX_CHANNEL_LEN;
        while !channel.is_char_boundary(end) {
            end -= 1;
        }
        channel.truncate(end);
    }
    channel
}

/// [`HintChannel`] backed by `NOTIFY` on one channel.
#[derive(Clone)]
pub struct PgNotifyHints {
    pool: Pool<Postgres>,
    channel: String,
}

impl PgNotifyHints {
    /// Publish and listen on the default queue's channel.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::for_queue(pool, defaults::QUEUE_NAME)
    }

    /// Publish and listen on `queue`'s channel.
    pub fn for_queue(pool: Pool<Postgres>, queue: &str) -> Self {
        Self::with_channel(pool, channel_for_queue(queue))
    }

    pub fn with_channel(pool: Pool<Postgres>, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl HintChannel for PgNotifyHints {
    async fn hint(&self, job_id: JobId) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Hint(format!("pg_notify on {}: {e}", self.channel)))?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn HintReceiver>> {
        // LISTEN parks its connection for the receiver's lifetime; the
        // one-connection pool only exists so PgListener can reconnect.
        let options = (*self.pool.connect_options()).clone();
        let dedicated = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::Hint(format!("listener connect: {e}")))?;
        let mut listener = PgListener::connect_with(&dedicated)
            .await
            .map_err(|e| Error::Hint(format!("listener connect: {e}")))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|e| Error::Hint(format!("LISTEN {}: {e}", self.channel)))?;

        debug!(
            subsystem = "jobs",
            component = "hints",
            backend = "postgres",
            channel = %self.channel,
            "Listening for dispatch hints"
        );

        Ok(Box::new(PgNotifyReceiver { listener }))
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

struct PgNotifyReceiver {
    listener: PgListener,
}

#[async_trait]
impl HintReceiver for PgNotifyReceiver {
    async fn recv(&mut self, timeout: Duration) -> Result<Wake> {
        match tokio::time::timeout(timeout, self.listener.recv()).await {
            Err(_) => Ok(Wake::TimedOut),
            Ok(Ok(notification)) => {
                let job_id = parse_payload(notification.payload());
                trace!(?job_id, "Notification received");
                Ok(Wake::Hinted(job_id))
            }
            Ok(Err(e)) => Err(Error::Hint(format!("listener recv: {e}"))),
        }
    }
}

/// Payloads are decimal job ids; anything else is still a wake-up.
fn parse_payload(payload: &str) -> Option<JobId> {
    payload.trim().parse().ok()
}
