//! Status-change events published by workers on the status channel.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use crate::status::SubmissionStatus;
use crate::types::{SubmissionId, Timestamp};

/// Resource usage reported alongside a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub execution_time_ms: u64,
    pub memory_used_kb: u64,
}

/// Outcome of a single test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_case_id: String,
    pub passed: bool,
    #[serde(default)]
    pub output: String,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A status change for one submission.
///
/// Intermediate events (`queued`, `processing`) carry only the status and
/// timestamp. Terminal events may additionally carry metrics, per-test
/// results, or an error description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub submission_id: SubmissionId,
    #[serde(deserialize_with = "lenient_status")]
    pub status: SubmissionStatus,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ExecutionMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<Vec<TestResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Unknown tokens decode as `queued`, the same fallback as
/// [`DisplayStatus::from_token`](crate::DisplayStatus::from_token), so such
/// an event is still delivered and is never terminal.
fn lenient_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SubmissionStatus, D::Error> {
    let token = String::deserialize(deserializer)?;
    Ok(SubmissionStatus::from_token(&token).unwrap_or(SubmissionStatus::Queued))
}

impl StatusEvent {
    fn bare(submission_id: SubmissionId, status: SubmissionStatus) -> Self {
        Self {
            submission_id,
            status,
            timestamp: Utc::now(),
            metrics: None,
            test_results: None,
            error: None,
        }
    }

    /// The job has been durably accepted by the queue.
    pub fn queued(submission_id: SubmissionId) -> Self {
        Self::bare(submission_id, SubmissionStatus::Queued)
    }

    /// A worker has started executing the job.
    pub fn running(submission_id: SubmissionId) -> Self {
        Self::bare(submission_id, SubmissionStatus::Processing)
    }

    /// The job ran to a verdict.
    pub fn finished(
        submission_id: SubmissionId,
        status: SubmissionStatus,
        metrics: ExecutionMetrics,
        test_results: Vec<TestResult>,
    ) -> Self {
        Self {
            metrics: Some(metrics),
            test_results: Some(test_results),
            ..Self::bare(submission_id, status)
        }
    }

    /// The job could not produce a verdict (e.g. retries exhausted).
    pub fn failed(
        submission_id: SubmissionId,
        status: SubmissionStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::bare(submission_id, status)
        }
    }

    /// Override the timestamp (e.g. with an injected clock).
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn passed_count(&self) -> usize {
        self.test_results
            .as_ref()
            .map(|results| results.iter().filter(|r| r.passed).count())
            .unwrap_or(0)
    }

    pub fn total_count(&self) -> usize {
        self.test_results.as_ref().map(Vec::len).unwrap_or(0)
    }
}
