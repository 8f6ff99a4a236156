//! Submission intake: throttle, validate, persist, enqueue, announce.

use std::sync::Arc;

use codearena_cache::RateLimiter;
use codearena_core::{
    Clock, CoreError, DisplayStatus, NewSubmission, RateDecision, StatusEvent, SubmissionId,
    SubmissionJob,
};
use codearena_db::{NewSubmissionRow, SubmissionStore};
use codearena_events::StatusChannel;
use codearena_queue::JobQueue;
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// What the caller is told about an accepted submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeReceipt {
    pub submission_id: SubmissionId,
    pub status: DisplayStatus,
    #[serde(skip)]
    pub rate: RateDecision,
    #[serde(skip)]
    pub duplicate: bool,
}

pub struct SubmissionIntake {
    limiter: Arc<RateLimiter>,
    store: Arc<dyn SubmissionStore>,
    queue: Arc<dyn JobQueue>,
    channel: StatusChannel,
    clock: Arc<dyn Clock>,
}

impl SubmissionIntake {
    pub fn new(
        limiter: Arc<RateLimiter>,
        store: Arc<dyn SubmissionStore>,
        queue: Arc<dyn JobQueue>,
        channel: StatusChannel,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limiter,
            store,
            queue,
            channel,
            clock,
        }
    }

    /// Accept a submission on behalf of `identity`.
    ///
    /// The rate limit is charged before the request is validated, so
    /// malformed requests count against the caller too. An enqueue failure
    /// fails the request; the row written just before it stays `queued`.
    pub async fn submit(
        &self,
        identity: Option<&str>,
        request: NewSubmission,
    ) -> AppResult<IntakeReceipt> {
        let rate = self.limiter.check_submission(identity).await?;
        if !rate.allowed {
            return Err(AppError::RateLimited(rate));
        }

        request.check()?;

        let test_cases = self
            .store
            .problem_test_cases(&request.problem_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "Problem",
                id: request.problem_id.clone(),
            })?;
        if test_cases.is_empty() {
            return Err(CoreError::Validation(format!(
                "problem '{}' has no test cases",
                request.problem_id
            ))
            .into());
        }

        let submission_id = SubmissionId::generate();
        let row = NewSubmissionRow {
            id: submission_id.clone(),
            problem_id: request.problem_id.clone(),
            language: request.language,
            code: request.code.clone(),
            created_at: self.clock.now(),
        };
        self.store.insert_submission(&row).await?;

        let job = SubmissionJob::new(
            submission_id.clone(),
            request.problem_id,
            request.language,
            request.code,
            test_cases,
        );
        let receipt = self.queue.enqueue(job).await?;

        if receipt.duplicate {
            tracing::debug!(submission_id = %submission_id, "Submission was already queued");
        } else {
            tracing::info!(
                submission_id = %submission_id,
                language = %row.language,
                problem_id = %row.problem_id,
                "Submission queued"
            );
            let event = StatusEvent::queued(submission_id.clone()).at(self.clock.now());
            if let Err(e) = self.channel.publish(&event).await {
                tracing::error!(
                    submission_id = %submission_id,
                    error = %e,
                    "Failed to publish queued event"
                );
            }
        }

        Ok(IntakeReceipt {
            submission_id,
            status: DisplayStatus::Queued,
            rate,
            duplicate: receipt.duplicate,
        })
    }
}
