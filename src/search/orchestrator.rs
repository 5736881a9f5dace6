//! Hybrid search orchestrator / 混合搜索编排器
//!
//! Decides which backend(s) serve a request, applies cache-first
//! short-circuiting, and normalizes both backends' outputs into one
//! result shape. In hybrid mode both backends run concurrently and the
//! orchestrator waits for both to settle - an empty-but-successful
//! primary result must not preempt a populated secondary one.
//!
//! All collaborators are injected; the orchestrator is built once at
//! process start and shared.

use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqlitePool;

use super::db_backend::DbBackend;
use super::feed_backend::FeedBackend;
use super::filters::FilterSet;
use super::schema::{SearchResult, Suggestion};
use super::{SearchError, SearchSource};
use crate::cache::{cache_key, CacheOutcome, SearchCache};
use crate::feed::SnapshotSource;
use crate::models::parse_price;

/// Per-request orchestration options / 检索选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub preferred_source: SearchSource,
    pub fallback_enabled: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            preferred_source: SearchSource::Hybrid,
            fallback_enabled: true,
        }
    }
}

pub struct SearchOrchestrator {
    db: DbBackend,
    feed: FeedBackend,
    cache: SearchCache,
}

impl SearchOrchestrator {
    pub fn new(pool: SqlitePool, source: Arc<dyn SnapshotSource>, cache: SearchCache) -> Self {
        Self {
            db: DbBackend::new(pool),
            feed: FeedBackend::new(source),
            cache,
        }
    }

    /// The sole search entry point / 唯一搜索入口
    pub async fn search(
        &self,
        filters: &FilterSet,
        options: &SearchOptions,
    ) -> Result<SearchResult, SearchError> {
        let f = filters.normalized();
        match options.preferred_source {
            SearchSource::Primary => self.search_primary(&f, options.fallback_enabled).await,
            SearchSource::Secondary => self.search_secondary(&f, options.fallback_enabled).await,
            SearchSource::Hybrid => self.search_hybrid(&f).await,
        }
    }

    /// Primary store first; an empty page falls back to the live feed
    /// when allowed (guarded against recursing back)
    async fn search_primary(
        &self,
        f: &FilterSet,
        allow_fallback: bool,
    ) -> Result<SearchResult, SearchError> {
        let key = cache_key(f, SearchSource::Primary);
        if let CacheOutcome::Hit(result) = self.cache.get(&key).await {
            return Ok(result);
        }

        let result = match self.db.search(f).await {
            Ok(r) if r.total == 0 && allow_fallback => {
                tracing::debug!("primary returned no rows, trying feed fallback");
                match self.feed.search(f).await {
                    Ok(fallback) => fallback,
                    Err(e) => {
                        tracing::warn!(error = %e, "feed fallback failed, keeping empty primary result");
                        r
                    }
                }
            }
            Ok(r) => r,
            Err(e) if allow_fallback => {
                tracing::warn!(error = %e, "primary store failed, falling back to feed");
                self.feed.search(f).await?
            }
            Err(e) => return Err(e),
        };

        self.cache.put(&key, &result).await;
        Ok(result)
    }

    /// Live feed first; a feed failure falls back to the primary store
    /// when allowed. A fresh empty snapshot is an answer, not a failure.
    async fn search_secondary(
        &self,
        f: &FilterSet,
        allow_fallback: bool,
    ) -> Result<SearchResult, SearchError> {
        let key = cache_key(f, SearchSource::Secondary);
        if let CacheOutcome::Hit(result) = self.cache.get(&key).await {
            return Ok(result);
        }

        let result = match self.feed.search(f).await {
            Ok(r) => r,
            Err(e) if allow_fallback => {
                tracing::warn!(error = %e, "feed failed, falling back to primary store");
                self.db.search(f).await?
            }
            Err(e) => return Err(e),
        };

        self.cache.put(&key, &result).await;
        Ok(result)
    }

    /// Run both backends concurrently, wait for both to settle, prefer
    /// populated secondary rows (real-time freshness wins) / 混合模式
    async fn search_hybrid(&self, f: &FilterSet) -> Result<SearchResult, SearchError> {
        let key = cache_key(f, SearchSource::Hybrid);
        if let CacheOutcome::Hit(result) = self.cache.get(&key).await {
            return Ok(result);
        }

        let started = Instant::now();
        let (primary, secondary) = tokio::join!(self.db.search(f), self.feed.search(f));

        let mut result = match (primary, secondary) {
            (_, Ok(s)) if s.total > 0 => s,
            (Ok(p), _) => p,
            (Err(_), Ok(s)) => s,
            (Err(p), Err(s)) => {
                return Err(SearchError::BothSourcesFailed {
                    primary: p.to_string(),
                    secondary: s.to_string(),
                })
            }
        };
        result.execution_time_ms = started.elapsed().as_millis() as u64;

        self.cache.put(&key, &result).await;
        Ok(result)
    }

    /// Natural-language entry point: extract structured tokens, fall back
    /// to a plain free-text term / 自然语言检索
    pub async fn intelligent_search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResult, SearchError> {
        let filters = parse_intelligent_query(query);
        tracing::debug!(
            query,
            search = ?filters.search,
            capacity = ?filters.capacity,
            color = ?filters.color,
            max_price = ?filters.max_price,
            "intelligent query parsed"
        );
        self.search(&filters, options).await
    }

    /// Autocomplete over distinct model names / 自动补全
    pub async fn get_search_suggestions(
        &self,
        prefix: &str,
        limit: u32,
        exact_match: bool,
    ) -> Result<Vec<Suggestion>, SearchError> {
        self.db.suggestions(prefix, limit, exact_match).await
    }
}

static MODEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(iphone|galaxy|samsung|xiaomi|redmi|poco|motorola|realme)\s*(\d{1,2}[a-z]?(?:\s+pro(?:\s+max)?|\s+plus|\s+mini|\s+ultra)?)\b",
    )
    .unwrap()
});

static CAPACITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{2,4})\s*(gb|tb)\b").unwrap()
});

static MAX_PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bat[eé]\s*(?:r\$)?\s*([\d.,]+)").unwrap()
});

/// Fixed color keyword list (pt-BR + en) / 颜色关键词表
const COLOR_WORDS: &[&str] = &[
    "preto", "branco", "azul", "verde", "vermelho", "rosa", "roxo", "dourado", "prata",
    "cinza", "amarelo", "laranja", "black", "white", "blue", "green", "red", "pink",
    "purple", "gold", "silver", "gray", "titanium",
];

/// Turn a free-text phrase into a structured filter set. Recognized
/// tokens become structured filters; otherwise the whole input is the
/// search term.
pub fn parse_intelligent_query(query: &str) -> FilterSet {
    let text = query.trim();
    let lower = text.to_lowercase();
    let mut f = FilterSet::default();
    let mut recognized = false;

    if let Some(caps) = MODEL_RE.captures(&lower) {
        let brand = caps[1].trim();
        let rest = caps[2].split_whitespace().collect::<Vec<_>>().join(" ");
        f.search = Some(format!("{} {}", brand, rest));
        recognized = true;
    }

    if let Some(caps) = CAPACITY_RE.captures(&lower) {
        f.capacity = Some(format!("{}{}", &caps[1], caps[2].to_uppercase()));
        recognized = true;
    }

    for color in COLOR_WORDS {
        if lower.split_whitespace().any(|w| w == *color) {
            f.color = Some((*color).to_string());
            recognized = true;
            break;
        }
    }

    if let Some(caps) = MAX_PRICE_RE.captures(&lower) {
        if let Some(price) = parse_price(&caps[1]) {
            f.max_price = Some(price);
            recognized = true;
        }
    }

    if !recognized && !text.is_empty() {
        f.search = Some(text.to_string());
    }
    f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::{run_migrations, upsert_products};
    use crate::feed::{FeedError, StaticFeed};
    use crate::models::{Product, SupplierRef};
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DATE: &str = "29-08";

    fn item(id: &str, model: &str, price: &str) -> Product {
        Product {
            id: id.into(),
            model: model.into(),
            brand: Some("Apple".into()),
            category: Some("iphone".into()),
            storage: Some("128GB".into()),
            region: None,
            color: Some("Preto".into()),
            price: price.into(),
            supplier: SupplierRef::Name("MegaCell".into()),
            date: DATE.into(),
            available: true,
            lowest_price: false,
        }
    }

    fn five_rows() -> Vec<Product> {
        (1..=5).map(|i| item(&i.to_string(), "iPhone 16", &format!("{}00,00", i + 40))).collect()
    }

    async fn migrated_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    /// Pool without migrations: every query fails
    async fn broken_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn cache() -> SearchCache {
        SearchCache::new(Arc::new(MemoryCache::new(64)), 300, 2048)
    }

    fn filters() -> FilterSet {
        FilterSet { date: Some(DATE.into()), ..Default::default() }
    }

    /// Snapshot source counting how often it is actually consulted
    struct CountingFeed {
        inner: StaticFeed,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotSource for CountingFeed {
        async fn fetch_snapshot(&self, date: &str) -> Result<Vec<Product>, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_snapshot(date).await
        }
    }

    #[tokio::test]
    async fn test_hybrid_primary_error_secondary_wins() {
        // Primary throws, secondary returns 5 rows: no error raised
        let source = Arc::new(StaticFeed::new().with_snapshot(DATE, five_rows()));
        let orch = SearchOrchestrator::new(broken_pool().await, source, cache());
        let r = orch.search(&filters(), &SearchOptions::default()).await.unwrap();
        assert_eq!(r.total, 5);
        assert_eq!(r.source, SearchSource::Secondary);
    }

    #[tokio::test]
    async fn test_hybrid_prefers_populated_secondary() {
        // Primary succeeds but is empty; populated secondary wins
        let source = Arc::new(StaticFeed::new().with_snapshot(DATE, five_rows()));
        let orch = SearchOrchestrator::new(migrated_pool().await, source, cache());
        let r = orch.search(&filters(), &SearchOptions::default()).await.unwrap();
        assert_eq!(r.total, 5);
        assert_eq!(r.source, SearchSource::Secondary);
    }

    #[tokio::test]
    async fn test_hybrid_empty_secondary_uses_primary() {
        let pool = migrated_pool().await;
        upsert_products(&pool, &[item("1", "iPhone 16", "4.500,00")]).await.unwrap();
        let source = Arc::new(StaticFeed::new().with_snapshot(DATE, Vec::new()));
        let orch = SearchOrchestrator::new(pool, source, cache());
        let r = orch.search(&filters(), &SearchOptions::default()).await.unwrap();
        assert_eq!(r.total, 1);
        assert_eq!(r.source, SearchSource::Primary);
    }

    #[tokio::test]
    async fn test_hybrid_both_failed() {
        let source = Arc::new(StaticFeed::new()); // no snapshot for DATE
        let orch = SearchOrchestrator::new(broken_pool().await, source, cache());
        let err = orch.search(&filters(), &SearchOptions::default()).await.unwrap_err();
        assert!(matches!(err, SearchError::BothSourcesFailed { .. }));
    }

    #[tokio::test]
    async fn test_primary_no_fallback_returns_empty_success() {
        // Scenario: preferred primary, fallback disabled, zero rows
        let source = Arc::new(StaticFeed::new().with_snapshot(DATE, five_rows()));
        let orch = SearchOrchestrator::new(migrated_pool().await, source, cache());
        let options = SearchOptions {
            preferred_source: SearchSource::Primary,
            fallback_enabled: false,
        };
        let r = orch.search(&filters(), &options).await.unwrap();
        assert_eq!(r.total, 0);
        assert_eq!(r.source, SearchSource::Primary);
    }

    #[tokio::test]
    async fn test_primary_empty_falls_back_to_feed() {
        let source = Arc::new(StaticFeed::new().with_snapshot(DATE, five_rows()));
        let orch = SearchOrchestrator::new(migrated_pool().await, source, cache());
        let options = SearchOptions {
            preferred_source: SearchSource::Primary,
            fallback_enabled: true,
        };
        let r = orch.search(&filters(), &options).await.unwrap();
        assert_eq!(r.total, 5);
        assert_eq!(r.source, SearchSource::Secondary);
    }

    #[tokio::test]
    async fn test_secondary_error_falls_back_to_primary() {
        let pool = migrated_pool().await;
        upsert_products(&pool, &[item("1", "iPhone 16", "4.500,00")]).await.unwrap();
        let source = Arc::new(StaticFeed::new()); // unknown date
        let orch = SearchOrchestrator::new(pool, source, cache());
        let options = SearchOptions {
            preferred_source: SearchSource::Secondary,
            fallback_enabled: true,
        };
        let r = orch.search(&filters(), &options).await.unwrap();
        assert_eq!(r.total, 1);
        assert_eq!(r.source, SearchSource::Primary);
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let source = Arc::new(CountingFeed {
            inner: StaticFeed::new().with_snapshot(DATE, five_rows()),
            calls: AtomicUsize::new(0),
        });
        let orch = SearchOrchestrator::new(broken_pool().await, source.clone(), cache());

        let first = orch.search(&filters(), &SearchOptions::default()).await.unwrap();
        let second = orch.search(&filters(), &SearchOptions::default()).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1, "second call must hit the cache");

        // Identical payloads except execution time
        assert_eq!(first.products, second.products);
        assert_eq!(first.total, second.total);
        assert_eq!(first.aggregations, second.aggregations);
    }

    #[tokio::test]
    async fn test_cache_keys_isolate_sources() {
        let pool = migrated_pool().await;
        upsert_products(&pool, &[item("1", "iPhone 16", "4.500,00")]).await.unwrap();
        let source = Arc::new(StaticFeed::new().with_snapshot(DATE, five_rows()));
        let orch = SearchOrchestrator::new(pool, source, cache());

        let hybrid = orch.search(&filters(), &SearchOptions::default()).await.unwrap();
        assert_eq!(hybrid.total, 5);
        // A different preferred source is a different cache entry
        let options = SearchOptions {
            preferred_source: SearchSource::Primary,
            fallback_enabled: false,
        };
        let primary = orch.search(&filters(), &options).await.unwrap();
        assert_eq!(primary.total, 1);
    }

    #[test]
    fn test_intelligent_parse_structured_tokens() {
        let f = parse_intelligent_query("iphone 16 pro 256gb azul até R$ 7.000,00");
        assert_eq!(f.search.as_deref(), Some("iphone 16 pro"));
        assert_eq!(f.capacity.as_deref(), Some("256GB"));
        assert_eq!(f.color.as_deref(), Some("azul"));
        assert_eq!(f.max_price, Some(7000.0));
    }

    #[test]
    fn test_intelligent_parse_freeform_fallback() {
        let f = parse_intelligent_query("capinha transparente");
        assert_eq!(f.search.as_deref(), Some("capinha transparente"));
        assert_eq!(f.capacity, None);
        assert_eq!(f.max_price, None);
    }

    #[test]
    fn test_intelligent_parse_capacity_only() {
        let f = parse_intelligent_query("128gb");
        assert_eq!(f.capacity.as_deref(), Some("128GB"));
        assert_eq!(f.search, None);
    }
}
