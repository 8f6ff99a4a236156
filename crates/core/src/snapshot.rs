//! Client-facing views of a submission's state.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::{StatusEvent, TestResult};
use crate::status::DisplayStatus;
use crate::types::{SubmissionId, Timestamp};

/// What a client sees for a submission at one point in time.
///
/// Produced both from live [`StatusEvent`]s and from store rows, always
/// through the same status mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSnapshot {
    pub submission_id: SubmissionId,
    pub status: DisplayStatus,
    pub execution_time_ms: Option<u64>,
    pub memory_used_kb: Option<u64>,
    pub test_results: Option<Vec<TestResult>>,
    pub passed_count: Option<usize>,
    pub total_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: Timestamp,
}

impl SubmissionSnapshot {
    /// Build the view implied by a status event.
    pub fn from_event(event: &StatusEvent) -> Self {
        let counts = event
            .test_results
            .as_ref()
            .map(|_| (event.passed_count(), event.total_count()));

        Self {
            submission_id: event.submission_id.clone(),
            status: event.status.display(),
            execution_time_ms: event.metrics.map(|m| m.execution_time_ms),
            memory_used_kb: event.metrics.map(|m| m.memory_used_kb),
            test_results: event.test_results.clone(),
            passed_count: counts.map(|(passed, _)| passed),
            total_count: counts.map(|(_, total)| total),
            error: event.error.clone(),
            updated_at: event.timestamp,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A snapshot whose status is known to be terminal.
///
/// The result cache only accepts this type, so a `Queued` or `Running`
/// view cannot be cached: it cannot be constructed in the first place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SubmissionSnapshot", into = "SubmissionSnapshot")]
pub struct TerminalSnapshot(SubmissionSnapshot);

impl TerminalSnapshot {
    pub fn submission_id(&self) -> &SubmissionId {
        &self.0.submission_id
    }

    pub fn snapshot(&self) -> &SubmissionSnapshot {
        &self.0
    }

    pub fn into_inner(self) -> SubmissionSnapshot {
        self.0
    }
}

impl TryFrom<SubmissionSnapshot> for TerminalSnapshot {
    type Error = CoreError;

    fn try_from(snapshot: SubmissionSnapshot) -> Result<Self, Self::Error> {
        if snapshot.is_terminal() {
            Ok(Self(snapshot))
        } else {
            Err(CoreError::Validation(format!(
                "submission {} is still '{}'",
                snapshot.submission_id, snapshot.status
            )))
        }
    }
}

impl From<TerminalSnapshot> for SubmissionSnapshot {
    fn from(value: TerminalSnapshot) -> Self {
        value.0
    }
}
