//! Dispatch hint channels.
//!
//! [`LocalHints`] serves single-process deployments and tests; [`RedisHints`]
//! is a list-based queue shared across processes. The LISTEN/NOTIFY variant
//! lives in `keel_db::notify` because it rides the database connection.

pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use keel_core::{defaults, Error, HintChannel, HintReceiver, JobId, Result, Wake};

pub use self::redis::RedisHints;

/// In-process hints over a `tokio::sync::broadcast` channel.
///
/// Every receiver sees every hint sent after it subscribed. A receiver that
/// falls more than the channel capacity behind loses the oldest hints and
/// gets a single `Hinted(None)` wake-up instead.
#[derive(Clone)]
pub struct LocalHints {
    tx: broadcast::Sender<JobId>,
}

impl LocalHints {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LocalHints {
    fn default() -> Self {
        Self::new(defaults::EVENT_CAPACITY)
    }
}

#[async_trait]
impl HintChannel for LocalHints {
    async fn hint(&self, job_id: JobId) -> Result<()> {
        // No subscribers is fine; the reconciler re-announces.
        let _ = self.tx.send(job_id);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn HintReceiver>> {
        Ok(Box::new(LocalReceiver {
            rx: self.tx.subscribe(),
        }))
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

struct LocalReceiver {
    rx: broadcast::Receiver<JobId>,
}

#[async_trait]
impl HintReceiver for LocalReceiver {
    async fn recv(&mut self, timeout: Duration) -> Result<Wake> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(Wake::TimedOut),
            Ok(Ok(job_id)) => Ok(Wake::Hinted(Some(job_id))),
            Ok(Err(RecvError::Lagged(skipped))) => {
                debug!(skipped, "Hint receiver lagged, hints dropped");
                Ok(Wake::Hinted(None))
            }
            Ok(Err(RecvError::Closed)) => Err(Error::Hint("local hint channel closed".into())),
        }
    }
}
