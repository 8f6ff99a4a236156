//! Work items handed to the execution workers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{SubmissionId, Timestamp};

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent jobs. Dispatched before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal jobs. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background jobs. Dispatched last.
pub const PRIORITY_BACKGROUND: i32 = -10;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Languages the execution workers accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Java,
    Cpp,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Java => "java",
            Self::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Self::Python),
            "javascript" => Ok(Self::Javascript),
            "java" => Ok(Self::Java),
            "cpp" => Ok(Self::Cpp),
            other => Err(CoreError::Validation(format!(
                "unsupported language '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A test case as shipped to the worker: input plus expected output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseRef {
    pub id: String,
    pub input: String,
    pub expected_output: String,
}

/// One unit of work for the execution pool.
///
/// Built once at intake and never mutated afterwards. The queue owns it
/// until a worker claims it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionJob {
    pub submission_id: SubmissionId,
    pub problem_id: String,
    pub language: Language,
    pub code: String,
    /// Ordered as the problem defines them.
    pub test_cases: Vec<TestCaseRef>,
    /// Higher values are dispatched first; equal priorities run FIFO.
    #[serde(default)]
    pub priority: i32,
}

impl SubmissionJob {
    pub fn new(
        submission_id: SubmissionId,
        problem_id: impl Into<String>,
        language: Language,
        code: impl Into<String>,
        test_cases: Vec<TestCaseRef>,
    ) -> Self {
        Self {
            submission_id,
            problem_id: problem_id.into(),
            language,
            code: code.into(),
            test_cases,
            priority: PRIORITY_NORMAL,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// One scheduled execution of a [`SubmissionJob`].
///
/// The first attempt is created on enqueue with no delay; each retry
/// creates the next one with an exponential backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobAttempt {
    /// 1-based.
    pub attempt_number: u32,
    /// When the attempt becomes visible to workers.
    pub scheduled_at: Timestamp,
    pub backoff_delay: Duration,
}

impl JobAttempt {
    /// The attempt created at enqueue time.
    pub fn first(scheduled_at: Timestamp) -> Self {
        Self {
            attempt_number: 1,
            scheduled_at,
            backoff_delay: Duration::ZERO,
        }
    }
}
