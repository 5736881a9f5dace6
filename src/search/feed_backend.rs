//! Secondary feed search backend / 备用快照搜索后端
//!
//! Applies the whole filter set in memory against a freshly fetched
//! snapshot, reusing the same predicate rules and relevance engine as the
//! primary backend so search semantics never drift between sources.
//! O(n) per request by design - real-time freshness over indexing, always
//! fronted by the cache.

use std::sync::Arc;
use std::time::Instant;

use chrono::Local;

use super::aggregate::rank_and_page;
use super::filters::FilterSet;
use super::relevance::matches_search;
use super::schema::SearchResult;
use super::{SearchError, SearchSource};
use crate::feed::SnapshotSource;

pub struct FeedBackend {
    source: Arc<dyn SnapshotSource>,
}

impl FeedBackend {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }

    /// Snapshot date for a request: explicit tag, range start, or today
    fn snapshot_date(f: &FilterSet) -> String {
        f.date
            .clone()
            .or_else(|| f.date_from.clone())
            .unwrap_or_else(|| Local::now().format("%d-%m").to_string())
    }

    /// Execute a search over the live snapshot / 执行快照搜索
    pub async fn search(&self, filters: &FilterSet) -> Result<SearchResult, SearchError> {
        let started = Instant::now();
        let f = filters.normalized();
        let date = Self::snapshot_date(&f);

        let snapshot = self
            .source
            .fetch_snapshot(&date)
            .await
            .map_err(|e| SearchError::FeedUnavailable(e.to_string()))?;
        let snapshot_len = snapshot.len();

        let candidates = match f.search_term() {
            Some(term) => {
                let term = term.to_string();
                snapshot
                    .into_iter()
                    .filter(|p| matches_search(p, &term, f.include_variants))
                    .collect()
            }
            None => snapshot,
        };

        let mut result = rank_and_page(candidates, &f, SearchSource::Secondary);
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            date,
            snapshot = snapshot_len,
            total = result.total,
            elapsed_ms = result.execution_time_ms,
            "feed search done"
        );
        Ok(result)
    }
}
