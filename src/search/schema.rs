//! Search result shapes shared by both backends / 搜索结果结构

use serde::{Deserialize, Serialize};

use super::filters::FilterSet;
use super::SearchSource;
use crate::models::Product;

/// One facet entry: a field value and how many filtered rows carry it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetCount {
    pub value: String,
    pub count: u64,
}

/// Autocomplete suggestion / 自动补全建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub value: String,
    pub count: u64,
}

/// Facet tables over the filtered set, each capped and sorted by
/// descending count / 聚合统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregations {
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub categories: Vec<FacetCount>,
    pub colors: Vec<FacetCount>,
    pub storages: Vec<FacetCount>,
    pub suppliers: Vec<FacetCount>,
    pub brands: Vec<FacetCount>,
    pub regions: Vec<FacetCount>,
}

/// One page of products plus pagination metadata, the echoed filters and
/// the aggregations / 一页搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub products: Vec<Product>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_previous: bool,
    pub filters: FilterSet,
    pub source: SearchSource,
    pub execution_time_ms: u64,
    pub aggregations: Aggregations,
}

impl SearchResult {
    /// Assemble a result page with derived pagination fields
    pub fn paged(
        products: Vec<Product>,
        total: u64,
        filters: &FilterSet,
        source: SearchSource,
        aggregations: Aggregations,
    ) -> Self {
        let limit = filters.limit.max(1);
        let total_pages = (total.div_ceil(limit as u64)) as u32;
        let page = filters.page.max(1);
        Self {
            products,
            total,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
            filters: filters.clone(),
            source,
            execution_time_ms: 0,
            aggregations,
        }
    }

    /// Empty successful result: zero matches is not a failure / 空结果
    pub fn empty(filters: &FilterSet, source: SearchSource) -> Self {
        Self::paged(Vec::new(), 0, filters, source, Aggregations::default())
    }
}
