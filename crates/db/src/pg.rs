//! Postgres implementation of [`SubmissionStore`].

use async_trait::async_trait;
use codearena_core::{SubmissionId, TestCaseRef};
use sqlx::{FromRow, PgPool};

use crate::models::{NewSubmissionRow, StatusUpdate, SubmissionRecord};
use crate::store::{StoreError, SubmissionStore};

/// Column list for `submissions` queries.
const COLUMNS: &str = "\
    id, problem_id, language, code, status, \
    execution_time_ms, memory_used_kb, test_results, error_message, \
    created_at, started_at, completed_at";

#[derive(Debug, FromRow)]
struct TestCaseRow {
    id: String,
    input: String,
    expected_output: String,
}

/// Queries against the `problems`, `test_cases` and `submissions` tables.
pub struct SubmissionRepo;

impl SubmissionRepo {
    pub async fn problem_exists(pool: &PgPool, problem_id: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM problems WHERE id = $1)")
            .bind(problem_id)
            .fetch_one(pool)
            .await
    }

    /// Test cases of a problem in their defined order.
    pub async fn list_test_cases(
        pool: &PgPool,
        problem_id: &str,
    ) -> Result<Vec<TestCaseRef>, sqlx::Error> {
        let rows = sqlx::query_as::<_, TestCaseRow>(
            "SELECT id, input, expected_output FROM test_cases \
             WHERE problem_id = $1 \
             ORDER BY order_index ASC, id ASC",
        )
        .bind(problem_id)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TestCaseRef {
                id: row.id,
                input: row.input,
                expected_output: row.expected_output,
            })
            .collect())
    }

    /// Insert a submission in status `queued`. A repeated id is a no-op.
    pub async fn insert(pool: &PgPool, row: &NewSubmissionRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO submissions (id, problem_id, language, code, status, created_at) \
             VALUES ($1, $2, $3, $4, 'queued', $5) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(row.id.as_str())
        .bind(&row.problem_id)
        .bind(row.language.as_str())
        .bind(&row.code)
        .bind(row.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: &SubmissionId,
    ) -> Result<Option<SubmissionRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM submissions WHERE id = $1");
        sqlx::query_as::<_, SubmissionRecord>(&query)
            .bind(id.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Apply a status transition. Returns `false` if no row matched.
    ///
    /// `started_at` is stamped on the first `processing` transition and
    /// `completed_at` on a terminal one; absent result fields keep their
    /// stored values.
    pub async fn update_status(
        pool: &PgPool,
        id: &SubmissionId,
        update: &StatusUpdate,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE submissions SET \
                 status = $2, \
                 execution_time_ms = COALESCE($3, execution_time_ms), \
                 memory_used_kb = COALESCE($4, memory_used_kb), \
                 test_results = COALESCE($5, test_results), \
                 error_message = COALESCE($6, error_message), \
                 started_at = CASE WHEN $7 THEN COALESCE(started_at, $9) ELSE started_at END, \
                 completed_at = CASE WHEN $8 THEN $9 ELSE completed_at END \
             WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(update.status.as_token())
        .bind(update.execution_time_ms)
        .bind(update.memory_used_kb)
        .bind(&update.test_results)
        .bind(&update.error_message)
        .bind(update.starts_execution())
        .bind(update.is_terminal())
        .bind(update.at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// [`SubmissionStore`] backed by a Postgres pool.
#[derive(Clone)]
pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn problem_test_cases(
        &self,
        problem_id: &str,
    ) -> Result<Option<Vec<TestCaseRef>>, StoreError> {
        if !SubmissionRepo::problem_exists(&self.pool, problem_id).await? {
            return Ok(None);
        }
        let cases = SubmissionRepo::list_test_cases(&self.pool, problem_id).await?;
        Ok(Some(cases))
    }

    async fn insert_submission(&self, row: &NewSubmissionRow) -> Result<(), StoreError> {
        SubmissionRepo::insert(&self.pool, row).await?;
        Ok(())
    }

    async fn fetch(&self, id: &SubmissionId) -> Result<Option<SubmissionRecord>, StoreError> {
        Ok(SubmissionRepo::find_by_id(&self.pool, id).await?)
    }

    async fn update_status(
        &self,
        id: &SubmissionId,
        update: &StatusUpdate,
    ) -> Result<(), StoreError> {
        if SubmissionRepo::update_status(&self.pool, id, update).await? {
            Ok(())
        } else {
            Err(StoreError::MissingSubmission(id.clone()))
        }
    }
}
