//! Job dispatch queue.
//!
//! Jobs are keyed by submission id, so enqueuing the same submission twice
//! yields a single logical job. Failed attempts are retried with
//! exponential backoff up to [`RetryPolicy::max_attempts`]; finished jobs
//! are kept for a bounded count or age per [`RetentionPolicy`]. A claim
//! that is never completed or failed counts as a failed attempt once
//! [`RetryPolicy::stall_timeout`] passes.

pub mod memory;
pub mod policy;
pub mod redis_queue;
pub mod retention;
pub mod types;

use async_trait::async_trait;
use codearena_core::{SubmissionId, SubmissionJob};

pub use memory::MemoryQueue;
pub use policy::{RetentionPolicy, RetryPolicy};
pub use redis_queue::RedisQueue;
pub use retention::RetentionSweeper;
pub use types::{
    ClaimedJob, EnqueueReceipt, FailOutcome, JobRecord, JobState, QueueStats, StalledJob,
};

/// Error recorded on an attempt recovered by [`JobQueue::recover_stalled`].
pub const STALLED_ERROR: &str = "Job stalled: worker did not report within the stall timeout";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Job payload encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Job {0} is not active")]
    NotActive(SubmissionId),

    #[error("Corrupt job record for {id}: {reason}")]
    Corrupt { id: SubmissionId, reason: String },
}

/// Contract between intake, workers and the queue backend.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job, deduplicated by its submission id.
    ///
    /// A second call for an id the queue still holds is a no-op that
    /// reports the existing job's current attempt with `duplicate = true`.
    /// The job's own `priority` orders it among waiting jobs.
    async fn enqueue(&self, job: SubmissionJob) -> Result<EnqueueReceipt, QueueError>;

    /// Take the next visible job, if any, moving it to `active`.
    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError>;

    /// Mark an active job as successfully finished.
    async fn complete(&self, id: &SubmissionId) -> Result<(), QueueError>;

    /// Record a failed attempt: either schedule a retry or give up.
    async fn fail(&self, id: &SubmissionId, error: &str) -> Result<FailOutcome, QueueError>;

    /// Send every active job claimed longer ago than the stall timeout
    /// through [`fail`](Self::fail), so a crashed worker's attempt is
    /// retried or exhausted like any other failure.
    async fn recover_stalled(&self) -> Result<Vec<StalledJob>, QueueError>;

    /// Drop finished jobs that fall outside the retention policies.
    /// Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    async fn get(&self, id: &SubmissionId) -> Result<Option<JobRecord>, QueueError>;
}
