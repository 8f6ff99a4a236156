use std::time::Duration;

use async_trait::async_trait;
use codearena_core::{ExecutionMetrics, SubmissionJob, SubmissionStatus, TestResult};

/// A verdict produced by running a job against its test cases.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Must be a terminal status.
    pub status: SubmissionStatus,
    pub metrics: ExecutionMetrics,
    pub test_results: Vec<TestResult>,
}

/// The job could not produce a verdict. Retried per the queue's policy.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Executor crashed: {0}")]
    Crashed(String),

    #[error("Execution exceeded {0:?}")]
    Timeout(Duration),

    #[error("Executor returned non-terminal status '{0}'")]
    NonTerminal(SubmissionStatus),

    #[error("Execution infrastructure unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &SubmissionJob) -> Result<ExecutionOutcome, ExecutionError>;
}
