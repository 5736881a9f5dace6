//! Hybrid product search / 混合商品搜索
//!
//! Leaf-first: `relevance` and the cache layer are pure leaves, the two
//! backends (`db_backend`, `feed_backend`) share `filters`/`aggregate`
//! semantics, and `orchestrator` composes both with cache-first
//! short-circuiting and fallback.

pub mod aggregate;
pub mod db_backend;
pub mod feed_backend;
pub mod filters;
pub mod orchestrator;
pub mod relevance;
pub mod schema;

pub use db_backend::DbBackend;
pub use feed_backend::FeedBackend;
pub use filters::{FilterSet, SortField, SortOrder};
pub use orchestrator::{SearchOptions, SearchOrchestrator};
pub use schema::{Aggregations, FacetCount, SearchResult, Suggestion};

use serde::{Deserialize, Serialize};

/// Which backend(s) a search prefers / 数据源偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Primary,
    Secondary,
    #[default]
    Hybrid,
}

impl SearchSource {
    pub fn tag(&self) -> &'static str {
        match self {
            SearchSource::Primary => "primary",
            SearchSource::Secondary => "secondary",
            SearchSource::Hybrid => "hybrid",
        }
    }
}

/// Search failure taxonomy / 搜索错误分类
///
/// A zero-match search is a successful empty result, never an error; only
/// an unrecovered backend failure surfaces here. Cache failures never do.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("primary store unavailable: {0}")]
    PrimaryUnavailable(String),
    #[error("feed snapshot unavailable: {0}")]
    FeedUnavailable(String),
    #[error("both sources failed (primary: {primary}; secondary: {secondary})")]
    BothSourcesFailed { primary: String, secondary: String },
}
