//! Point-in-time status read: result cache first, then the store.

use std::sync::Arc;
use std::time::Duration;

use codearena_cache::ResultCache;
use codearena_core::{CoreError, SubmissionId, SubmissionSnapshot, TerminalSnapshot};
use codearena_db::SubmissionStore;

use crate::error::AppResult;

pub struct StatusReader {
    store: Arc<dyn SubmissionStore>,
    cache: Arc<dyn ResultCache>,
    cache_ttl: Duration,
}

impl StatusReader {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        cache: Arc<dyn ResultCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            cache_ttl,
        }
    }

    /// Current view of a submission.
    ///
    /// A store row that turns out to be terminal is written back to the
    /// cache; anything still in flight is returned uncached.
    pub async fn fetch(&self, id: &SubmissionId) -> AppResult<SubmissionSnapshot> {
        if let Some(hit) = self.cache.get(id).await {
            tracing::debug!(submission_id = %id, "Result cache hit");
            return Ok(hit.into_inner());
        }

        let record = self
            .store
            .fetch(id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "Submission",
                id: id.to_string(),
            })?;

        let snapshot = record.snapshot();
        if let Ok(terminal) = TerminalSnapshot::try_from(snapshot.clone()) {
            self.cache.put(terminal, self.cache_ttl).await;
        }
        Ok(snapshot)
    }
}
