//! JSON frames exchanged over `/ws`.
//!
//! Every frame is `{"type": "<kind>", "data": {...}}`; kinds without a
//! payload omit `data`.

use axum::extract::ws::Message;
use codearena_core::{
    DisplayStatus, StatusEvent, SubmissionId, SubmissionSnapshot, TestResult, Timestamp,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRef {
    pub submission_id: SubmissionId,
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeSubmission(SubmissionRef),
    UnsubscribeSubmission(SubmissionRef),
    Ping,
}

impl ClientMessage {
    /// Decode a text frame, rejecting blank submission ids.
    pub fn parse(text: &str) -> Result<Self, String> {
        let message: Self =
            serde_json::from_str(text).map_err(|e| format!("Malformed message: {e}"))?;
        match &message {
            Self::SubscribeSubmission(r) | Self::UnsubscribeSubmission(r)
                if r.submission_id.as_str().trim().is_empty() =>
            {
                Err("Invalid submissionId".to_string())
            }
            _ => Ok(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub submission_id: SubmissionId,
    pub status: DisplayStatus,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpdate {
    pub submission_id: SubmissionId,
    pub status: DisplayStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_used_kb: Option<u64>,
    pub test_results: Vec<TestResult>,
    pub passed_count: usize,
    pub total_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed(SubmissionRef),
    Unsubscribed(SubmissionRef),
    SubmissionStatus(StatusUpdate),
    SubmissionCompleted(CompletedUpdate),
    Error(ErrorNotice),
    Pong,
}

impl ServerMessage {
    /// The frame a subscriber sees for `event`: `submission_status` for
    /// intermediate states, `submission_completed` for terminal ones.
    pub fn from_event(event: &StatusEvent) -> Self {
        let snapshot = SubmissionSnapshot::from_event(event);
        if !snapshot.is_terminal() {
            return Self::SubmissionStatus(StatusUpdate {
                submission_id: snapshot.submission_id,
                status: snapshot.status,
                timestamp: snapshot.updated_at,
            });
        }

        Self::SubmissionCompleted(CompletedUpdate {
            submission_id: snapshot.submission_id,
            status: snapshot.status,
            execution_time_ms: snapshot.execution_time_ms,
            memory_used_kb: snapshot.memory_used_kb,
            test_results: snapshot.test_results.unwrap_or_default(),
            passed_count: snapshot.passed_count.unwrap_or(0),
            total_count: snapshot.total_count.unwrap_or(0),
            error: snapshot.error,
            timestamp: snapshot.updated_at,
        })
    }

    pub fn subscribed(submission_id: SubmissionId) -> Self {
        Self::Subscribed(SubmissionRef { submission_id })
    }

    pub fn unsubscribed(submission_id: SubmissionId) -> Self {
        Self::Unsubscribed(SubmissionRef { submission_id })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
        })
    }

    /// Encode as a WebSocket text frame.
    pub fn to_message(&self) -> Message {
        match serde_json::to_string(self) {
            Ok(json) => Message::Text(json.into()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server message");
                Message::Text(r#"{"type":"error","data":{"message":"Internal error"}}"#.into())
            }
        }
    }
}
