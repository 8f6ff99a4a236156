//! Row types for the `submissions` table.

use codearena_core::{
    DisplayStatus, Language, StatusEvent, SubmissionId, SubmissionSnapshot, SubmissionStatus,
    TestResult, Timestamp,
};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `submissions` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct SubmissionRecord {
    pub id: String,
    pub problem_id: String,
    pub language: String,
    pub code: String,
    /// Raw status token; may be anything an older writer left behind.
    pub status: String,
    pub execution_time_ms: Option<i64>,
    pub memory_used_kb: Option<i64>,
    pub test_results: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl SubmissionRecord {
    pub fn submission_id(&self) -> SubmissionId {
        SubmissionId::new(self.id.clone())
    }

    /// Client view of the row, through the same status mapping as the live path.
    pub fn snapshot(&self) -> SubmissionSnapshot {
        let test_results: Option<Vec<TestResult>> = self
            .test_results
            .clone()
            .and_then(|value| serde_json::from_value(value).ok());
        let counts = test_results
            .as_ref()
            .map(|results| (results.iter().filter(|r| r.passed).count(), results.len()));

        SubmissionSnapshot {
            submission_id: self.submission_id(),
            status: DisplayStatus::from_token(&self.status),
            execution_time_ms: self.execution_time_ms.and_then(|v| u64::try_from(v).ok()),
            memory_used_kb: self.memory_used_kb.and_then(|v| u64::try_from(v).ok()),
            test_results,
            passed_count: counts.map(|(passed, _)| passed),
            total_count: counts.map(|(_, total)| total),
            error: self.error_message.clone(),
            updated_at: self
                .completed_at
                .or(self.started_at)
                .unwrap_or(self.created_at),
        }
    }
}

/// Values for inserting a freshly accepted submission.
#[derive(Debug, Clone)]
pub struct NewSubmissionRow {
    pub id: SubmissionId,
    pub problem_id: String,
    pub language: Language,
    pub code: String,
    pub created_at: Timestamp,
}

/// A status transition written by a worker.
///
/// `None` fields leave the stored column untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: SubmissionStatus,
    pub execution_time_ms: Option<i64>,
    pub memory_used_kb: Option<i64>,
    pub test_results: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub at: Timestamp,
}

impl StatusUpdate {
    pub fn from_event(event: &StatusEvent) -> Self {
        Self {
            status: event.status,
            execution_time_ms: event
                .metrics
                .and_then(|m| i64::try_from(m.execution_time_ms).ok()),
            memory_used_kb: event
                .metrics
                .and_then(|m| i64::try_from(m.memory_used_kb).ok()),
            test_results: event
                .test_results
                .as_ref()
                .and_then(|results| serde_json::to_value(results).ok()),
            error_message: event.error.clone(),
            at: event.timestamp,
        }
    }

    /// Whether this transition marks the start of execution.
    pub fn starts_execution(&self) -> bool {
        self.status == SubmissionStatus::Processing
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use codearena_core::{ExecutionMetrics, SubmissionStatus};

    use super::*;

    fn record(status: &str) -> SubmissionRecord {
        let created = Utc::now();
        SubmissionRecord {
            id: "s-1".into(),
            problem_id: "p-1".into(),
            language: "python".into(),
            code: "print(1)".into(),
            status: status.into(),
            execution_time_ms: None,
            memory_used_kb: None,
            test_results: None,
            error_message: None,
            created_at: created,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn unknown_token_reads_as_queued() {
        let snap = record("weird").snapshot();
        assert_eq!(snap.status, DisplayStatus::Queued);
        assert!(!snap.is_terminal());
    }

    #[test]
    fn memory_limit_reads_as_time_limit() {
        let snap = record("memory_limit_exceeded").snapshot();
        assert_eq!(snap.status, DisplayStatus::TimeLimitExceeded);
    }

    #[test]
    fn snapshot_prefers_latest_timestamp() {
        let mut row = record("accepted");
        let done = row.created_at + Duration::seconds(5);
        row.started_at = Some(row.created_at + Duration::seconds(1));
        row.completed_at = Some(done);
        assert_eq!(row.snapshot().updated_at, done);
    }

    #[test]
    fn update_from_terminal_event_carries_results() {
        let event = StatusEvent::finished(
            "s-1".into(),
            SubmissionStatus::Accepted,
            ExecutionMetrics {
                execution_time_ms: 15,
                memory_used_kb: 800,
            },
            vec![TestResult {
                test_case_id: "t1".into(),
                passed: true,
                output: "1".into(),
                execution_time_ms: 15,
                error: None,
            }],
        );
        let update = StatusUpdate::from_event(&event);
        assert!(update.is_terminal());
        assert_eq!(update.execution_time_ms, Some(15));

        let mut row = record("processing");
        row.test_results = update.test_results.clone();
        let snap = row.snapshot();
        assert_eq!(snap.passed_count, Some(1));
        assert_eq!(snap.total_count, Some(1));
    }
}
