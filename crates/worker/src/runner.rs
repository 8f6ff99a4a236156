//! Claim/execute/report loop.

use std::sync::Arc;
use std::time::Duration;

use codearena_core::{Clock, StatusEvent, SubmissionId, SubmissionStatus};
use codearena_db::{StatusUpdate, StoreError, SubmissionStore};
use codearena_events::StatusChannel;
use codearena_queue::{ClaimedJob, FailOutcome, JobQueue, QueueError, STALLED_ERROR};
use tokio_util::sync::CancellationToken;

use crate::executor::{ExecutionError, Executor};

/// Idle polling cadence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerConfig {
    /// Delay after the first empty poll.
    pub idle_initial: Duration,
    /// Upper bound on the idle delay.
    pub idle_max: Duration,
    /// Growth factor per consecutive empty poll.
    pub idle_multiplier: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            idle_initial: Duration::from_millis(200),
            idle_max: Duration::from_secs(5),
            idle_multiplier: 1.5,
        }
    }
}

/// Next idle delay, clamped to [`RunnerConfig::idle_max`].
pub fn next_idle_delay(current: Duration, config: &RunnerConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.idle_multiplier) as u64;
    Duration::from_millis(next_ms).min(config.idle_max)
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// What one processed attempt led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A verdict was recorded and published.
    Finished(SubmissionStatus),
    /// The attempt failed; the queue will retry after `delay`.
    Retrying { delay: Duration },
    /// The final attempt failed; a `system_error` was recorded and published.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub submission_id: SubmissionId,
    pub attempt: u32,
    pub outcome: RunOutcome,
}

pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn SubmissionStore>,
    channel: StatusChannel,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn SubmissionStore>,
        channel: StatusChannel,
        executor: Arc<dyn Executor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            store,
            channel,
            executor,
            clock,
            config: RunnerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Poll until `cancel` is triggered. An in-flight job is always
    /// finished before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Job runner started");
        let mut idle = self.config.idle_initial;

        while !cancel.is_cancelled() {
            match self.run_once().await {
                Ok(Some(_)) => {
                    idle = self.config.idle_initial;
                    continue;
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Job runner cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
            idle = next_idle_delay(idle, &self.config);
        }
        tracing::info!("Job runner stopped");
    }

    /// Claim and process at most one job. Stalled claims left by crashed
    /// workers are recovered first.
    pub async fn run_once(&self) -> Result<Option<RunReport>, RunnerError> {
        self.recover_stalled().await?;

        let Some(claimed) = self.queue.claim().await? else {
            return Ok(None);
        };
        let id = claimed.job.submission_id.clone();
        let attempt = claimed.attempt.attempt_number;
        tracing::info!(submission_id = %id, attempt, "Job claimed");

        // Retries of the same job do not re-announce Running.
        if claimed.is_first_attempt() {
            let running = StatusEvent::running(id.clone()).at(self.clock.now());
            if let Err(e) = self
                .store
                .update_status(&id, &StatusUpdate::from_event(&running))
                .await
            {
                tracing::warn!(submission_id = %id, error = %e, "Failed to mark submission processing");
            }
            self.publish(&running).await;
        }

        let outcome = match self.process(&claimed).await {
            Ok(status) => {
                self.queue.complete(&id).await?;
                RunOutcome::Finished(status)
            }
            Err(e) => self.handle_failure(&id, attempt, &e).await?,
        };

        Ok(Some(RunReport {
            submission_id: id,
            attempt,
            outcome,
        }))
    }

    /// Execute, persist and publish a verdict.
    async fn process(&self, claimed: &ClaimedJob) -> Result<SubmissionStatus, RunnerError> {
        let id = &claimed.job.submission_id;
        let outcome = self.executor.execute(&claimed.job).await?;
        if !outcome.status.is_terminal() {
            return Err(ExecutionError::NonTerminal(outcome.status).into());
        }

        let event = StatusEvent::finished(
            id.clone(),
            outcome.status,
            outcome.metrics,
            outcome.test_results,
        )
        .at(self.clock.now());
        self.store
            .update_status(id, &StatusUpdate::from_event(&event))
            .await?;
        self.publish(&event).await;

        tracing::info!(
            submission_id = %id,
            status = %outcome.status,
            passed = event.passed_count(),
            total = event.total_count(),
            "Submission finished"
        );
        Ok(outcome.status)
    }

    async fn handle_failure(
        &self,
        id: &SubmissionId,
        attempt: u32,
        error: &RunnerError,
    ) -> Result<RunOutcome, RunnerError> {
        match self.queue.fail(id, &error.to_string()).await? {
            FailOutcome::Retrying { next, delay } => {
                tracing::warn!(
                    submission_id = %id,
                    attempt,
                    next_attempt = next.attempt_number,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retry scheduled"
                );
                Ok(RunOutcome::Retrying { delay })
            }
            FailOutcome::Exhausted { attempts } => {
                self.report_exhausted(id, attempts, &error.to_string()).await;
                Ok(RunOutcome::Exhausted)
            }
        }
    }

    async fn recover_stalled(&self) -> Result<(), RunnerError> {
        for stalled in self.queue.recover_stalled().await? {
            let id = &stalled.submission_id;
            match stalled.outcome {
                FailOutcome::Retrying { next, delay } => tracing::warn!(
                    submission_id = %id,
                    next_attempt = next.attempt_number,
                    delay_ms = delay.as_millis() as u64,
                    "Stalled job rescheduled"
                ),
                FailOutcome::Exhausted { attempts } => {
                    self.report_exhausted(id, attempts, STALLED_ERROR).await;
                }
            }
        }
        Ok(())
    }

    /// Record and publish the `system_error` of a job out of attempts.
    async fn report_exhausted(&self, id: &SubmissionId, attempts: u32, error: &str) {
        tracing::error!(submission_id = %id, attempts, error, "Retries exhausted");
        let failed = StatusEvent::failed(
            id.clone(),
            SubmissionStatus::SystemError,
            format!("Execution failed after {attempts} attempts: {error}"),
        )
        .at(self.clock.now());
        if let Err(e) = self
            .store
            .update_status(id, &StatusUpdate::from_event(&failed))
            .await
        {
            tracing::error!(submission_id = %id, error = %e, "Failed to record system error");
        }
        self.publish(&failed).await;
    }

    async fn publish(&self, event: &StatusEvent) {
        if let Err(e) = self.channel.publish(event).await {
            tracing::error!(
                submission_id = %event.submission_id,
                status = %event.status,
                error = %e,
                "Failed to publish status event"
            );
        }
    }
}
