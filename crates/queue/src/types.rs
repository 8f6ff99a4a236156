use std::time::Duration;

use codearena_core::{JobAttempt, SubmissionId, SubmissionJob, Timestamp};
use serde::Serialize;

/// Lifecycle position of a job inside the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Visible to workers.
    Waiting,
    /// Scheduled for a retry once its backoff elapses.
    Delayed,
    /// Claimed by a worker.
    Active,
    Completed,
    /// Retries exhausted.
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "delayed" => Some(Self::Delayed),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Everything the queue knows about one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job: SubmissionJob,
    pub state: JobState,
    pub attempt: JobAttempt,
    /// Enqueue order; breaks priority ties.
    pub seq: u64,
    pub enqueued_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

/// Result of [`JobQueue::enqueue`](crate::JobQueue::enqueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub attempt: JobAttempt,
    /// The submission id was already queued; nothing new was scheduled.
    pub duplicate: bool,
}

/// A job handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub job: SubmissionJob,
    pub attempt: JobAttempt,
}

impl ClaimedJob {
    pub fn is_first_attempt(&self) -> bool {
        self.attempt.attempt_number == 1
    }
}

/// What the queue did with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Another attempt is scheduled after `delay`.
    Retrying { next: JobAttempt, delay: Duration },
    /// No attempts left; the job moved to the failed bucket.
    Exhausted { attempts: u32 },
}

/// An active job whose claim outlived [`RetryPolicy::stall_timeout`](crate::RetryPolicy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledJob {
    pub submission_id: SubmissionId,
    pub outcome: FailOutcome,
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}
