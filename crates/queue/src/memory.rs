//! In-process queue backend.
//!
//! Used in single-node development mode and throughout the test suite.
//! Time comes from the injected [`Clock`], so backoff visibility and
//! retention age are testable without sleeping.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use codearena_core::{Clock, JobAttempt, SubmissionId, SubmissionJob, Timestamp};
use tokio::sync::Mutex;

use crate::policy::{RetentionPolicy, RetryPolicy};
use crate::types::{
    ClaimedJob, EnqueueReceipt, FailOutcome, JobRecord, JobState, QueueStats, StalledJob,
};
use crate::{JobQueue, QueueError, STALLED_ERROR};

#[derive(Default)]
struct State {
    jobs: HashMap<SubmissionId, JobRecord>,
    /// Highest priority first, then FIFO.
    waiting: BTreeMap<(Reverse<i32>, u64), SubmissionId>,
    delayed: BTreeMap<(Timestamp, u64), SubmissionId>,
    /// Claim time of each active job.
    active: HashMap<SubmissionId, Timestamp>,
    /// Oldest first.
    completed: VecDeque<SubmissionId>,
    failed: VecDeque<SubmissionId>,
    next_seq: u64,
}

impl State {
    fn promote_due(&mut self, now: Timestamp) {
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let id = entry.remove();
            if let Some(record) = self.jobs.get_mut(&id) {
                record.state = JobState::Waiting;
                self.waiting
                    .insert((Reverse(record.job.priority), record.seq), id);
            }
        }
    }

    /// Move an active job to `delayed` or `failed`.
    fn fail_active(
        &mut self,
        id: &SubmissionId,
        error: &str,
        retry: RetryPolicy,
        now: Timestamp,
    ) -> Result<FailOutcome, QueueError> {
        let record = self
            .jobs
            .get_mut(id)
            .filter(|r| r.state == JobState::Active)
            .ok_or_else(|| QueueError::NotActive(id.clone()))?;
        self.active.remove(id);
        record.last_error = Some(error.to_string());
        let failed_attempt = record.attempt.attempt_number;

        if retry.should_retry(failed_attempt) {
            let delay = retry.delay_after(failed_attempt);
            let next = JobAttempt {
                attempt_number: failed_attempt + 1,
                scheduled_at: now
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX),
                backoff_delay: delay,
            };
            record.attempt = next;
            record.state = JobState::Delayed;
            let seq = record.seq;
            self.delayed.insert((next.scheduled_at, seq), id.clone());
            return Ok(FailOutcome::Retrying { next, delay });
        }

        record.state = JobState::Failed;
        record.finished_at = Some(now);
        self.failed.push_back(id.clone());
        Ok(FailOutcome::Exhausted {
            attempts: failed_attempt,
        })
    }

    /// Apply one retention policy to one finished bucket.
    fn trim(&mut self, state: JobState, policy: RetentionPolicy, now: Timestamp) -> u64 {
        let cutoff = now - policy.max_age_chrono();
        let mut bucket = std::mem::take(match state {
            JobState::Completed => &mut self.completed,
            _ => &mut self.failed,
        });
        let mut removed = 0;

        while let Some(id) = bucket.front() {
            let expired = self
                .jobs
                .get(id)
                .and_then(|r| r.finished_at)
                .map_or(true, |at| at < cutoff);
            if !expired && bucket.len() <= policy.max_count {
                break;
            }
            if let Some(id) = bucket.pop_front() {
                self.jobs.remove(&id);
                removed += 1;
            }
        }

        match state {
            JobState::Completed => self.completed = bucket,
            _ => self.failed = bucket,
        }
        removed
    }
}

pub struct MemoryQueue {
    state: Mutex<State>,
    retry: RetryPolicy,
    keep_completed: RetentionPolicy,
    keep_failed: RetentionPolicy,
    clock: Arc<dyn Clock>,
}

impl MemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_policies(
            clock,
            RetryPolicy::default(),
            RetentionPolicy::completed(),
            RetentionPolicy::failed(),
        )
    }

    pub fn with_policies(
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        keep_completed: RetentionPolicy,
        keep_failed: RetentionPolicy,
    ) -> Self {
        Self {
            state: Mutex::new(State::default()),
            retry,
            keep_completed,
            keep_failed,
            clock,
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: SubmissionJob) -> Result<EnqueueReceipt, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if let Some(existing) = state.jobs.get(&job.submission_id) {
            tracing::debug!(submission_id = %job.submission_id, "Duplicate enqueue ignored");
            return Ok(EnqueueReceipt {
                attempt: existing.attempt,
                duplicate: true,
            });
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        let attempt = JobAttempt::first(now);
        let id = job.submission_id.clone();
        state.waiting.insert((Reverse(job.priority), seq), id.clone());
        state.jobs.insert(
            id,
            JobRecord {
                job,
                state: JobState::Waiting,
                attempt,
                seq,
                enqueued_at: now,
                finished_at: None,
                last_error: None,
            },
        );

        Ok(EnqueueReceipt {
            attempt,
            duplicate: false,
        })
    }

    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.promote_due(now);

        let Some((_, id)) = state.waiting.pop_first() else {
            return Ok(None);
        };
        let Some(record) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        record.state = JobState::Active;
        let claimed = ClaimedJob {
            job: record.job.clone(),
            attempt: record.attempt,
        };
        state.active.insert(id, now);
        Ok(Some(claimed))
    }

    async fn complete(&self, id: &SubmissionId) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let record = state
            .jobs
            .get_mut(id)
            .filter(|r| r.state == JobState::Active)
            .ok_or_else(|| QueueError::NotActive(id.clone()))?;
        record.state = JobState::Completed;
        record.finished_at = Some(now);
        state.active.remove(id);
        state.completed.push_back(id.clone());

        state.trim(JobState::Completed, self.keep_completed, now);
        Ok(())
    }

    async fn fail(&self, id: &SubmissionId, error: &str) -> Result<FailOutcome, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let outcome = state.fail_active(id, error, self.retry, now)?;
        if matches!(outcome, FailOutcome::Exhausted { .. }) {
            state.trim(JobState::Failed, self.keep_failed, now);
        }
        Ok(outcome)
    }

    async fn recover_stalled(&self) -> Result<Vec<StalledJob>, QueueError> {
        let now = self.clock.now();
        let cutoff = now - self.retry.stall_timeout_chrono();
        let mut state = self.state.lock().await;

        let mut stalled: Vec<(Timestamp, SubmissionId)> = state
            .active
            .iter()
            .filter(|(_, claimed_at)| **claimed_at < cutoff)
            .map(|(id, claimed_at)| (*claimed_at, id.clone()))
            .collect();
        stalled.sort();

        let mut recovered = Vec::with_capacity(stalled.len());
        for (_, id) in stalled {
            let outcome = state.fail_active(&id, STALLED_ERROR, self.retry, now)?;
            recovered.push(StalledJob {
                submission_id: id,
                outcome,
            });
        }
        if recovered
            .iter()
            .any(|s| matches!(s.outcome, FailOutcome::Exhausted { .. }))
        {
            state.trim(JobState::Failed, self.keep_failed, now);
        }
        Ok(recovered)
    }

    async fn purge_expired(&self) -> Result<u64, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let removed = state.trim(JobState::Completed, self.keep_completed, now)
            + state.trim(JobState::Failed, self.keep_failed, now);
        Ok(removed)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for record in state.jobs.values() {
            match record.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Delayed => stats.delayed += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn get(&self, id: &SubmissionId) -> Result<Option<JobRecord>, QueueError> {
        Ok(self.state.lock().await.jobs.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use codearena_core::{FakeClock, Language, PRIORITY_BACKGROUND, PRIORITY_URGENT};

    use super::*;

    fn job(id: &str) -> SubmissionJob {
        SubmissionJob::new(SubmissionId::new(id), "p-1", Language::Python, "print(1)", vec![])
    }

    fn queue() -> (MemoryQueue, FakeClock) {
        let clock = FakeClock::new();
        (MemoryQueue::new(Arc::new(clock.clone())), clock)
    }

    async fn claim_id(queue: &MemoryQueue) -> Option<String> {
        queue
            .claim()
            .await
            .unwrap()
            .map(|c| c.job.submission_id.to_string())
    }

    #[tokio::test]
    async fn enqueue_twice_yields_one_job() {
        let (queue, _) = queue();
        let first = queue.enqueue(job("s-1")).await.unwrap();
        let second = queue.enqueue(job("s-1")).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(second.attempt.attempt_number, 1);
        assert_eq!(queue.stats().await.unwrap().waiting, 1);

        assert_eq!(claim_id(&queue).await.as_deref(), Some("s-1"));
        assert_eq!(claim_id(&queue).await, None);
    }

    #[tokio::test]
    async fn duplicate_of_active_job_is_not_requeued() {
        let (queue, _) = queue();
        queue.enqueue(job("s-1")).await.unwrap();
        claim_id(&queue).await;

        let again = queue.enqueue(job("s-1")).await.unwrap();
        assert!(again.duplicate);
        assert_eq!(claim_id(&queue).await, None);
    }

    #[tokio::test]
    async fn higher_priority_first_then_fifo() {
        let (queue, _) = queue();
        queue.enqueue(job("a")).await.unwrap();
        queue
            .enqueue(job("b").with_priority(PRIORITY_BACKGROUND))
            .await
            .unwrap();
        queue.enqueue(job("c")).await.unwrap();
        queue
            .enqueue(job("d").with_priority(PRIORITY_URGENT))
            .await
            .unwrap();

        let mut order = Vec::new();
        while let Some(id) = claim_id(&queue).await {
            order.push(id);
        }
        assert_eq!(order, ["d", "a", "c", "b"]);
    }

    #[tokio::test]
    async fn failed_attempt_is_hidden_until_backoff_elapses() {
        let (queue, clock) = queue();
        let id = SubmissionId::new("s-1");
        queue.enqueue(job("s-1")).await.unwrap();
        claim_id(&queue).await;

        let outcome = queue.fail(&id, "worker crashed").await.unwrap();
        assert_matches!(outcome, FailOutcome::Retrying { next, delay } => {
            assert_eq!(next.attempt_number, 2);
            assert_eq!(delay, Duration::from_secs(1));
        });
        assert_eq!(claim_id(&queue).await, None);

        clock.advance(Duration::from_millis(999));
        assert_eq!(claim_id(&queue).await, None);

        clock.advance(Duration::from_millis(1));
        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.attempt.attempt_number, 2);
        assert!(!claimed.is_first_attempt());
    }

    #[tokio::test]
    async fn third_failure_exhausts_the_job() {
        let (queue, clock) = queue();
        let id = SubmissionId::new("s-1");
        queue.enqueue(job("s-1")).await.unwrap();

        claim_id(&queue).await;
        assert_matches!(queue.fail(&id, "e1").await.unwrap(), FailOutcome::Retrying { .. });
        clock.advance(Duration::from_secs(1));

        claim_id(&queue).await;
        assert_matches!(
            queue.fail(&id, "e2").await.unwrap(),
            FailOutcome::Retrying { delay, .. } if delay == Duration::from_secs(2)
        );
        clock.advance(Duration::from_secs(2));

        claim_id(&queue).await;
        assert_matches!(
            queue.fail(&id, "e3").await.unwrap(),
            FailOutcome::Exhausted { attempts: 3 }
        );

        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.last_error.as_deref(), Some("e3"));
        assert_eq!(queue.stats().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn abandoned_claim_is_retried_after_stall_timeout() {
        let (queue, clock) = queue();
        let id = SubmissionId::new("s-1");
        let retry = RetryPolicy::default();
        queue.enqueue(job("s-1")).await.unwrap();
        claim_id(&queue).await;

        clock.advance(retry.stall_timeout - Duration::from_secs(1));
        assert!(queue.recover_stalled().await.unwrap().is_empty());

        clock.advance(Duration::from_secs(2));
        let stalled = queue.recover_stalled().await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].submission_id, id);
        assert_matches!(stalled[0].outcome, FailOutcome::Retrying { next, .. } => {
            assert_eq!(next.attempt_number, 2);
        });
        assert_eq!(queue.stats().await.unwrap().active, 0);

        clock.advance(retry.delay_after(1));
        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.attempt.attempt_number, 2);

        let record = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.last_error.as_deref(), Some(STALLED_ERROR));
    }

    #[tokio::test]
    async fn repeatedly_abandoned_job_ends_up_failed() {
        let (queue, clock) = queue();
        let retry = RetryPolicy::default();
        queue.enqueue(job("s-1")).await.unwrap();

        let mut last = None;
        for _ in 1..=retry.max_attempts {
            assert!(claim_id(&queue).await.is_some());
            clock.advance(Duration::from_secs(48 * 60 * 60));
            last = queue.recover_stalled().await.unwrap().pop();
            clock.advance(Duration::from_secs(60));
        }

        assert_matches!(
            last.map(|s| s.outcome),
            Some(FailOutcome::Exhausted { attempts: 3 })
        );
        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.active, stats.failed), (0, 1));
        assert_eq!(claim_id(&queue).await, None);
    }

    #[tokio::test]
    async fn completing_unclaimed_job_is_rejected() {
        let (queue, _) = queue();
        queue.enqueue(job("s-1")).await.unwrap();
        assert_matches!(
            queue.complete(&SubmissionId::new("s-1")).await,
            Err(QueueError::NotActive(_))
        );
    }

    #[tokio::test]
    async fn completed_jobs_are_trimmed_by_count() {
        let clock = FakeClock::new();
        let queue = MemoryQueue::with_policies(
            Arc::new(clock.clone()),
            RetryPolicy::default(),
            RetentionPolicy {
                max_count: 2,
                max_age: Duration::from_secs(3600),
            },
            RetentionPolicy::failed(),
        );

        for id in ["a", "b", "c"] {
            queue.enqueue(job(id)).await.unwrap();
            claim_id(&queue).await;
            queue.complete(&SubmissionId::new(id)).await.unwrap();
        }

        assert_eq!(queue.stats().await.unwrap().completed, 2);
        assert!(queue.get(&SubmissionId::new("a")).await.unwrap().is_none());
        assert!(queue.get(&SubmissionId::new("c")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn completed_jobs_expire_by_age() {
        let (queue, clock) = queue();
        queue.enqueue(job("s-1")).await.unwrap();
        claim_id(&queue).await;
        queue.complete(&SubmissionId::new("s-1")).await.unwrap();

        clock.advance(Duration::from_secs(59 * 60));
        assert_eq!(queue.purge_expired().await.unwrap(), 0);

        clock.advance(Duration::from_secs(2 * 60));
        assert_eq!(queue.purge_expired().await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());

        // Once purged, the id may be enqueued afresh.
        assert!(!queue.enqueue(job("s-1")).await.unwrap().duplicate);
    }

    #[tokio::test]
    async fn failed_jobs_outlive_completed_ones() {
        let (queue, clock) = queue();
        let retry = RetryPolicy::default();
        queue.enqueue(job("ok")).await.unwrap();
        queue.enqueue(job("bad")).await.unwrap();

        claim_id(&queue).await;
        queue.complete(&SubmissionId::new("ok")).await.unwrap();
        for attempt in 1..=retry.max_attempts {
            claim_id(&queue).await;
            queue.fail(&SubmissionId::new("bad"), "boom").await.unwrap();
            clock.advance(retry.delay_after(attempt));
        }

        clock.advance(Duration::from_secs(2 * 60 * 60));
        assert_eq!(queue.purge_expired().await.unwrap(), 1);
        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.completed, stats.failed), (0, 1));
    }
}
