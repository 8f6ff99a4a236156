//! Submission status model.
//!
//! Workers and the relational store speak in [`SubmissionStatus`] machine
//! tokens (`queued`, `processing`, `wrong_answer`, ...). Clients only ever
//! see [`DisplayStatus`] labels. The many-to-one mapping between the two
//! lives in [`SubmissionStatus::display`] and nowhere else, so the live
//! fan-out, the result cache and the point-in-time read all agree on the
//! label for a given underlying state.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Internal tokens
// ---------------------------------------------------------------------------

/// Worker-facing status token, as persisted in the `submissions.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Processing,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    SystemError,
}

impl SubmissionStatus {
    /// Every token, in lifecycle order.
    pub const ALL: [SubmissionStatus; 9] = [
        Self::Queued,
        Self::Processing,
        Self::Accepted,
        Self::WrongAnswer,
        Self::TimeLimitExceeded,
        Self::MemoryLimitExceeded,
        Self::RuntimeError,
        Self::CompilationError,
        Self::SystemError,
    ];

    /// The token string stored in the database and carried on the wire.
    pub fn as_token(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
            Self::TimeLimitExceeded => "time_limit_exceeded",
            Self::MemoryLimitExceeded => "memory_limit_exceeded",
            Self::RuntimeError => "runtime_error",
            Self::CompilationError => "compilation_error",
            Self::SystemError => "system_error",
        }
    }

    /// Parse a token string. Returns `None` for anything unrecognised.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_token() == token)
    }

    /// Whether no further status events follow this one.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Processing)
    }

    /// Collapse the token into the label shown to clients.
    ///
    /// `memory_limit_exceeded` surfaces as "Time Limit Exceeded" and
    /// `system_error` as "Runtime Error"; existing clients only understand
    /// the seven display labels.
    pub fn display(self) -> DisplayStatus {
        match self {
            Self::Queued => DisplayStatus::Queued,
            Self::Processing => DisplayStatus::Running,
            Self::Accepted => DisplayStatus::Accepted,
            Self::WrongAnswer => DisplayStatus::WrongAnswer,
            Self::TimeLimitExceeded | Self::MemoryLimitExceeded => {
                DisplayStatus::TimeLimitExceeded
            }
            Self::RuntimeError | Self::SystemError => DisplayStatus::RuntimeError,
            Self::CompilationError => DisplayStatus::CompilationError,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

// ---------------------------------------------------------------------------
// Display labels
// ---------------------------------------------------------------------------

/// Client-facing status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayStatus {
    #[serde(rename = "Queued")]
    Queued,
    #[serde(rename = "Running")]
    Running,
    #[serde(rename = "Accepted")]
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Compilation Error")]
    CompilationError,
}

impl DisplayStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::RuntimeError => "Runtime Error",
            Self::CompilationError => "Compilation Error",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    /// Map a raw store token to its label.
    ///
    /// Total: an unknown or missing token is shown as "Queued".
    pub fn from_token(token: &str) -> Self {
        SubmissionStatus::from_token(token)
            .map(SubmissionStatus::display)
            .unwrap_or(Self::Queued)
    }
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
