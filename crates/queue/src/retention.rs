//! Periodic purge of finished jobs.
//!
//! Count-based retention is applied whenever a job finishes, but age-based
//! retention needs a clock tick: without new completions nothing would
//! ever expire. The sweeper calls [`JobQueue::purge_expired`] on a fixed
//! interval until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::JobQueue;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct RetentionSweeper {
    queue: Arc<dyn JobQueue>,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(queue: Arc<dyn JobQueue>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    /// One sweep. Errors are logged, never propagated.
    pub async fn sweep(&self) -> u64 {
        match self.queue.purge_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(removed, "Queue retention: purged finished jobs");
                } else {
                    tracing::debug!("Queue retention: nothing to purge");
                }
                removed
            }
            Err(e) => {
                tracing::error!(error = %e, "Queue retention: sweep failed");
                0
            }
        }
    }

    /// Run until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Queue retention sweeper started"
        );
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Queue retention sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}
