use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use pricelist_backend::search::{
    FilterSet, SearchOptions, SearchResult, SearchSource, Suggestion,
};

use super::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// Free natural-language phrase; when present it is parsed into
    /// structured filters before searching / 自然语言查询
    #[serde(default)]
    pub query: Option<String>,
    /// Preferred data source / 数据源偏好
    #[serde(default)]
    pub source: SearchSource,
    /// Allow falling back to the other source / 是否允许回退
    #[serde(default = "default_fallback")]
    pub fallback: bool,
    #[serde(flatten)]
    pub filters: FilterSet,
}

fn default_fallback() -> bool {
    true
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Json<ApiResponse<SearchResult>> {
    let options = SearchOptions {
        preferred_source: req.source,
        fallback_enabled: req.fallback,
    };

    let result = match req.query.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => state.search.intelligent_search(q, &options).await,
        _ => state.search.search(&req.filters, &options).await,
    };

    match result {
        Ok(r) => Json(ApiResponse::success(r)),
        Err(e) => {
            tracing::error!(error = %e, "search request failed");
            Json(ApiResponse::error(&e.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SuggestionParams {
    pub q: String,
    #[serde(default = "default_suggestion_limit")]
    pub limit: u32,
    /// Rank plain base models above variants / 基础型号优先
    #[serde(default)]
    pub exact: bool,
}

fn default_suggestion_limit() -> u32 {
    10
}

pub async fn suggestions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SuggestionParams>,
) -> Json<ApiResponse<Vec<Suggestion>>> {
    let prefix = params.q.trim();
    if prefix.is_empty() {
        return Json(ApiResponse::success(Vec::new()));
    }

    match state
        .search
        .get_search_suggestions(prefix, params.limit, params.exact)
        .await
    {
        Ok(s) => Json(ApiResponse::success(s)),
        Err(e) => {
            tracing::error!(error = %e, "suggestion request failed");
            Json(ApiResponse::error(&e.to_string()))
        }
    }
}
