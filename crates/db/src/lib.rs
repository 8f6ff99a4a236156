//! Relational store collaborator.
//!
//! The submission pipeline only needs a narrow read/write contract from the
//! database: load a problem's test cases, insert a submission, fetch it by
//! id and update its status by id. [`SubmissionStore`] captures that
//! contract; [`PgSubmissionStore`] implements it on Postgres and
//! [`MemorySubmissionStore`] in process.

pub mod memory;
pub mod models;
pub mod pg;
pub mod store;

use sqlx::postgres::PgPoolOptions;

pub use memory::MemorySubmissionStore;
pub use models::{NewSubmissionRow, StatusUpdate, SubmissionRecord};
pub use pg::{PgSubmissionStore, SubmissionRepo};
pub use store::{StoreError, SubmissionStore};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Cheap liveness probe used by `/health`.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
