use async_trait::async_trait;
use codearena_core::{SubmissionId, TestCaseRef};

use crate::models::{NewSubmissionRow, StatusUpdate, SubmissionRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Submission {0} does not exist")]
    MissingSubmission(SubmissionId),
}

/// Read/write contract of the relational store.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Ordered test cases of a problem, or `None` if the problem is unknown.
    async fn problem_test_cases(
        &self,
        problem_id: &str,
    ) -> Result<Option<Vec<TestCaseRef>>, StoreError>;

    /// Insert a new submission row in status `queued`.
    async fn insert_submission(&self, row: &NewSubmissionRow) -> Result<(), StoreError>;

    async fn fetch(&self, id: &SubmissionId) -> Result<Option<SubmissionRecord>, StoreError>;

    async fn update_status(
        &self,
        id: &SubmissionId,
        update: &StatusUpdate,
    ) -> Result<(), StoreError>;
}
