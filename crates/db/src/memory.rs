//! In-process [`SubmissionStore`] used when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use codearena_core::{SubmissionId, TestCaseRef};
use tokio::sync::RwLock;

use crate::models::{NewSubmissionRow, StatusUpdate, SubmissionRecord};
use crate::store::{StoreError, SubmissionStore};

#[derive(Default)]
pub struct MemorySubmissionStore {
    problems: RwLock<HashMap<String, Vec<TestCaseRef>>>,
    submissions: RwLock<HashMap<SubmissionId, SubmissionRecord>>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a problem and its ordered test cases.
    pub async fn add_problem(&self, problem_id: impl Into<String>, test_cases: Vec<TestCaseRef>) {
        self.problems
            .write()
            .await
            .insert(problem_id.into(), test_cases);
    }

    pub async fn submission_count(&self) -> usize {
        self.submissions.read().await.len()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn problem_test_cases(
        &self,
        problem_id: &str,
    ) -> Result<Option<Vec<TestCaseRef>>, StoreError> {
        Ok(self.problems.read().await.get(problem_id).cloned())
    }

    async fn insert_submission(&self, row: &NewSubmissionRow) -> Result<(), StoreError> {
        self.submissions
            .write()
            .await
            .entry(row.id.clone())
            .or_insert_with(|| SubmissionRecord {
                id: row.id.to_string(),
                problem_id: row.problem_id.clone(),
                language: row.language.as_str().to_string(),
                code: row.code.clone(),
                status: "queued".to_string(),
                execution_time_ms: None,
                memory_used_kb: None,
                test_results: None,
                error_message: None,
                created_at: row.created_at,
                started_at: None,
                completed_at: None,
            });
        Ok(())
    }

    async fn fetch(&self, id: &SubmissionId) -> Result<Option<SubmissionRecord>, StoreError> {
        Ok(self.submissions.read().await.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &SubmissionId,
        update: &StatusUpdate,
    ) -> Result<(), StoreError> {
        let mut submissions = self.submissions.write().await;
        let record = submissions
            .get_mut(id)
            .ok_or_else(|| StoreError::MissingSubmission(id.clone()))?;

        record.status = update.status.as_token().to_string();
        if update.execution_time_ms.is_some() {
            record.execution_time_ms = update.execution_time_ms;
        }
        if update.memory_used_kb.is_some() {
            record.memory_used_kb = update.memory_used_kb;
        }
        if update.test_results.is_some() {
            record.test_results = update.test_results.clone();
        }
        if update.error_message.is_some() {
            record.error_message = update.error_message.clone();
        }
        if update.starts_execution() && record.started_at.is_none() {
            record.started_at = Some(update.at);
        }
        if update.is_terminal() {
            record.completed_at = Some(update.at);
        }
        Ok(())
    }
}
