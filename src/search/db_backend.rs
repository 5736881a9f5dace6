//! Primary store search backend / 主存储搜索后端
//!
//! Builds dynamic predicates against the relational products table.
//! Structured queries stay fully in SQL including the per-facet grouped
//! counts. Text queries cannot express the variant grammar in LIKE, so a
//! broad CASE-ranked candidate scan (bounded) feeds the shared in-memory
//! pipeline, keeping text semantics identical to the feed backend.
//!
//! Errors are propagated, not swallowed - the orchestrator owns the
//! fallback decision.

use std::time::Instant;

use sqlx::sqlite::SqliteArguments;
use sqlx::{query::Query, Row, Sqlite, SqlitePool};

use super::aggregate::{self, rank_and_page};
use super::filters::{FacetField, FilterSet, SortField, SortOrder, MAX_LIMIT};
use super::relevance::{self, parse_query, QueryShape};
use super::schema::{Aggregations, FacetCount, SearchResult, Suggestion};
use super::{SearchError, SearchSource};
use crate::db::product_from_row;
use crate::models::Product;

/// Upper bound for the text candidate scan / 文本候选扫描上限
const CANDIDATE_SCAN_LIMIT: i64 = 10_000;

/// Positional bind argument for dynamically built SQL
enum SqlArg {
    Text(String),
    Real(f64),
    Int(i64),
}

fn bind_all<'q>(
    mut q: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &'q [SqlArg],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for arg in args {
        q = match arg {
            SqlArg::Text(s) => q.bind(s.as_str()),
            SqlArg::Real(f) => q.bind(*f),
            SqlArg::Int(i) => q.bind(*i),
        };
    }
    q
}

/// Strip to lowercase alphanumerics, mirroring the in-memory storage
/// comparison ("128gb" == "128 GB")
fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// "DD-MM" tag to a sortable "MMDD" string for SQL range comparison
fn sql_date_key(tag: &str) -> Option<String> {
    super::filters::date_key(tag).map(|(m, d)| format!("{:02}{:02}", m, d))
}

pub struct DbBackend {
    pool: SqlitePool,
}

impl DbBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Execute a search against the relational store / 执行主存储搜索
    pub async fn search(&self, filters: &FilterSet) -> Result<SearchResult, SearchError> {
        let started = Instant::now();
        let f = filters.normalized();

        let term = f.search_term().map(str::to_string);
        let mut result = match term {
            Some(term) => self.search_text(&f, &term).await?,
            None => self.search_structured(&f).await?,
        };
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            total = result.total,
            elapsed_ms = result.execution_time_ms,
            "primary search done"
        );
        Ok(result)
    }

    /// Structured (no text) path: pagination, ordering and facet counts
    /// all in SQL / 结构化查询路径
    async fn search_structured(&self, f: &FilterSet) -> Result<SearchResult, SearchError> {
        let (conds, args) = build_conditions(f, None);
        let where_sql = where_clause(&conds);

        let count_sql = format!("SELECT COUNT(*) AS total FROM products {}", where_sql);
        let total: i64 = bind_all(sqlx::query(&count_sql), &args)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SearchError::PrimaryUnavailable(e.to_string()))?
            .get("total");

        let offset = ((f.page.max(1) - 1) as i64) * f.limit as i64;
        let page_sql = format!(
            "SELECT * FROM products {} ORDER BY {} LIMIT ? OFFSET ?",
            where_sql,
            order_clause(f)
        );
        let rows = bind_all(sqlx::query(&page_sql), &args)
            .bind(f.limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SearchError::PrimaryUnavailable(e.to_string()))?;
        let products: Vec<Product> = rows.iter().map(product_from_row).collect();

        let aggregations = self.sql_aggregations(f).await?;
        Ok(SearchResult::paged(
            products,
            total.max(0) as u64,
            f,
            SearchSource::Primary,
            aggregations,
        ))
    }

    /// Text path: broad ranked candidate scan, exact grammar applied by
    /// the shared pipeline / 文本查询路径
    async fn search_text(&self, f: &FilterSet, term: &str) -> Result<SearchResult, SearchError> {
        let (conds, mut args) = text_prefilter(term);

        // Non-facet structural predicates narrow the scan; facet fields
        // must stay out so the exclude-own-facet counts see their rows
        let mut scan_conds = conds;
        push_non_facet_conditions(f, &mut scan_conds, &mut args);

        let t = term.to_lowercase();
        let sql = format!(
            "SELECT *, CASE \
                WHEN model_lower = ? THEN 100 \
                WHEN model_lower LIKE ? THEN 80 \
                WHEN model_lower LIKE ? THEN 60 \
                ELSE 30 END AS score \
             FROM products {} ORDER BY score DESC, length(model) ASC LIMIT ?",
            where_clause(&scan_conds)
        );

        let mut head_args = vec![
            SqlArg::Text(t.clone()),
            SqlArg::Text(format!("{}%", t)),
            SqlArg::Text(format!("%{}%", t)),
        ];
        head_args.append(&mut args);

        let rows = bind_all(sqlx::query(&sql), &head_args)
            .bind(CANDIDATE_SCAN_LIMIT)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SearchError::PrimaryUnavailable(e.to_string()))?;

        let candidates: Vec<Product> = rows
            .iter()
            .map(product_from_row)
            .filter(|p| relevance::matches_search(p, term, f.include_variants))
            .collect();

        Ok(rank_and_page(candidates, f, SearchSource::Primary))
    }

    /// Grouped-count facet queries, each dropping its own equality
    /// predicate / 分组计数聚合
    async fn sql_aggregations(&self, f: &FilterSet) -> Result<Aggregations, SearchError> {
        let (conds, args) = build_conditions(f, None);
        let price_sql = format!(
            "SELECT MIN(price_value) AS lo, MAX(price_value) AS hi FROM products {}",
            where_clause(&conds)
        );
        let row = bind_all(sqlx::query(&price_sql), &args)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SearchError::PrimaryUnavailable(e.to_string()))?;
        let price_min: Option<f64> = row.get("lo");
        let price_max: Option<f64> = row.get("hi");

        Ok(Aggregations {
            price_min,
            price_max,
            categories: self
                .facet_counts(f, FacetField::Category, "category", aggregate::CAP_CATEGORIES)
                .await?,
            colors: self
                .facet_counts(f, FacetField::Color, "color", aggregate::CAP_COLORS)
                .await?,
            storages: self
                .facet_counts(f, FacetField::Storage, "storage", aggregate::CAP_STORAGES)
                .await?,
            suppliers: self
                .facet_counts(f, FacetField::Supplier, "supplier_name", aggregate::CAP_SUPPLIERS)
                .await?,
            brands: self
                .facet_counts(f, FacetField::Brand, "brand", aggregate::CAP_BRANDS)
                .await?,
            regions: self
                .facet_counts(f, FacetField::Region, "region", aggregate::CAP_REGIONS)
                .await?,
        })
    }

    async fn facet_counts(
        &self,
        f: &FilterSet,
        field: FacetField,
        column: &str,
        cap: usize,
    ) -> Result<Vec<FacetCount>, SearchError> {
        let (mut conds, args) = build_conditions(f, Some(field));
        conds.push(format!("{col} IS NOT NULL AND TRIM({col}) != ''", col = column));

        let sql = format!(
            "SELECT {col} AS value, COUNT(*) AS cnt FROM products {} \
             GROUP BY {col} ORDER BY cnt DESC, value ASC LIMIT ?",
            where_clause(&conds),
            col = column
        );
        let rows = bind_all(sqlx::query(&sql), &args)
            .bind(cap as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SearchError::PrimaryUnavailable(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| FacetCount {
                value: r.get("value"),
                count: r.get::<i64, _>("cnt").max(0) as u64,
            })
            .collect())
    }

    /// Distinct model names matching a prefix, ranked by count / 搜索建议
    ///
    /// With `exact_match` the variant-suffixed names are pushed below the
    /// base models regardless of their counts.
    pub async fn suggestions(
        &self,
        prefix: &str,
        limit: u32,
        exact_match: bool,
    ) -> Result<Vec<Suggestion>, SearchError> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        // Same ceiling as page sizes; the over-fetch stays bounded too
        let limit = limit.clamp(1, MAX_LIMIT);
        let fetch = if exact_match { limit.saturating_mul(3) } else { limit };

        let rows = sqlx::query(
            "SELECT model, COUNT(*) AS cnt FROM products WHERE model_lower LIKE ? \
             GROUP BY model ORDER BY cnt DESC, model ASC LIMIT ?",
        )
        .bind(format!("{}%", prefix))
        .bind(fetch as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SearchError::PrimaryUnavailable(e.to_string()))?;

        let mut out: Vec<Suggestion> = rows
            .iter()
            .map(|r| Suggestion {
                value: r.get("model"),
                count: r.get::<i64, _>("cnt").max(0) as u64,
            })
            .collect();

        if exact_match {
            out.sort_by(|a, b| {
                let pa = relevance::mentions_variant(&a.value);
                let pb = relevance::mentions_variant(&b.value);
                pa.cmp(&pb)
                    .then_with(|| b.count.cmp(&a.count))
                    .then_with(|| a.value.cmp(&b.value))
            });
            out.truncate(limit as usize);
        }
        Ok(out)
    }
}

fn where_clause(conds: &[String]) -> String {
    if conds.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conds.join(" AND "))
    }
}

/// ORDER BY for the structured path; unparseable prices always sort last
fn order_clause(f: &FilterSet) -> String {
    let dir = match f.sort_order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    match f.sort_by {
        SortField::Price => format!(
            "CASE WHEN price_value IS NULL THEN 1 ELSE 0 END, price_value {dir}, id ASC"
        ),
        SortField::Model => format!("model_lower {dir}, id ASC"),
        SortField::Brand => format!("LOWER(COALESCE(brand,'')) {dir}, id ASC"),
        SortField::Date => format!("substr(date,4,2) || substr(date,1,2) {dir}, id ASC"),
    }
}

/// Equality/range/list/boolean predicates from the filter set, skipping
/// at most one facet field's own equality / 构建条件
fn build_conditions(f: &FilterSet, skip: Option<FacetField>) -> (Vec<String>, Vec<SqlArg>) {
    let mut conds = Vec::new();
    let mut args = Vec::new();

    if let Some(ref model) = f.model {
        conds.push("model_lower = ?".to_string());
        args.push(SqlArg::Text(model.to_lowercase()));
    }
    if skip != Some(FacetField::Brand) {
        if let Some(ref v) = f.brand {
            conds.push("LOWER(COALESCE(brand,'')) = ?".to_string());
            args.push(SqlArg::Text(v.to_lowercase()));
        }
    }
    if skip != Some(FacetField::Category) {
        if let Some(ref v) = f.category {
            conds.push("LOWER(COALESCE(category,'')) = ?".to_string());
            args.push(SqlArg::Text(v.to_lowercase()));
        }
    }
    if skip != Some(FacetField::Color) {
        if let Some(ref v) = f.color {
            conds.push("LOWER(COALESCE(color,'')) = ?".to_string());
            args.push(SqlArg::Text(v.to_lowercase()));
        }
    }
    if skip != Some(FacetField::Region) {
        if let Some(ref v) = f.region {
            conds.push("LOWER(COALESCE(region,'')) = ?".to_string());
            args.push(SqlArg::Text(v.to_lowercase()));
        }
    }
    if skip != Some(FacetField::Storage) {
        for v in [&f.storage, &f.capacity].into_iter().flatten() {
            conds.push("REPLACE(LOWER(COALESCE(storage,'')), ' ', '') = ?".to_string());
            args.push(SqlArg::Text(squash(v)));
        }
    }
    if skip != Some(FacetField::Supplier) {
        if let Some(id) = f.supplier_id {
            conds.push("supplier_id = ?".to_string());
            args.push(SqlArg::Int(id));
        }
        if let Some(ref ids) = f.supplier_ids {
            let marks = vec!["?"; ids.len()].join(",");
            conds.push(format!("supplier_id IN ({})", marks));
            for id in ids {
                args.push(SqlArg::Int(*id));
            }
        }
        if let Some(ref name) = f.supplier_name {
            conds.push("LOWER(supplier_name) = ?".to_string());
            args.push(SqlArg::Text(name.to_lowercase()));
        }
    }

    push_non_facet_conditions(f, &mut conds, &mut args);
    (conds, args)
}

/// Predicates that never participate in facet exclusion: price range,
/// booleans and date constraints
fn push_non_facet_conditions(f: &FilterSet, conds: &mut Vec<String>, args: &mut Vec<SqlArg>) {
    if let Some(min) = f.min_price {
        conds.push("price_value >= ?".to_string());
        args.push(SqlArg::Real(min));
    }
    if let Some(max) = f.max_price {
        conds.push("price_value <= ?".to_string());
        args.push(SqlArg::Real(max));
    }
    if let Some(v) = f.available {
        conds.push("available = ?".to_string());
        args.push(SqlArg::Int(v as i64));
    }
    if let Some(v) = f.lowest_price {
        conds.push("lowest_price = ?".to_string());
        args.push(SqlArg::Int(v as i64));
    }
    if let Some(ref tag) = f.date {
        conds.push("date = ?".to_string());
        args.push(SqlArg::Text(tag.clone()));
    }
    if let Some(key) = f.date_from.as_deref().and_then(sql_date_key) {
        conds.push("substr(date,4,2) || substr(date,1,2) >= ?".to_string());
        args.push(SqlArg::Text(key));
    }
    if let Some(key) = f.date_to.as_deref().and_then(sql_date_key) {
        conds.push("substr(date,4,2) || substr(date,1,2) <= ?".to_string());
        args.push(SqlArg::Text(key));
    }
}

/// Broad SQL pre-filter for a text term; the exact grammar runs in Rust
/// over the scanned candidates
fn text_prefilter(term: &str) -> (Vec<String>, Vec<SqlArg>) {
    let t = term.trim().to_lowercase();
    let mut conds = Vec::new();
    let mut args = Vec::new();

    let fields_like = |args: &mut Vec<SqlArg>, needle: &str| -> String {
        let pat = format!("%{}%", needle);
        for _ in 0..5 {
            args.push(SqlArg::Text(pat.clone()));
        }
        "(model_lower LIKE ? OR LOWER(COALESCE(brand,'')) LIKE ? \
          OR LOWER(COALESCE(category,'')) LIKE ? OR LOWER(COALESCE(color,'')) LIKE ? \
          OR LOWER(COALESCE(storage,'')) LIKE ?)"
            .to_string()
    };

    match parse_query(&t) {
        QueryShape::BareNumber { number } => {
            conds.push(fields_like(&mut args, &number));
        }
        QueryShape::BrandModel { brand, number, .. } => {
            let brand_and_number =
                "(model_lower LIKE ? AND model_lower LIKE ?)".to_string();
            let fallback = fields_like(&mut args, &t);
            // Rebuild arg order: brand+number binds come first
            let mut head = vec![
                SqlArg::Text(format!("%{}%", brand)),
                SqlArg::Text(format!("%{}%", number)),
            ];
            head.append(&mut args);
            args = head;
            conds.push(format!("({} OR {})", brand_and_number, fallback));
        }
        QueryShape::Freeform { term } => {
            for token in term.split_whitespace() {
                conds.push(fields_like(&mut args, token));
            }
        }
    }
    (conds, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{run_migrations, upsert_products};
    use crate::models::SupplierRef;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        upsert_products(&pool, &fixture()).await.unwrap();
        pool
    }

    fn item(
        id: &str,
        model: &str,
        color: &str,
        storage: &str,
        price: &str,
        supplier: (i64, &str),
    ) -> Product {
        Product {
            id: id.into(),
            model: model.into(),
            brand: Some("Apple".into()),
            category: Some("iphone".into()),
            storage: Some(storage.into()),
            region: Some("EUA".into()),
            color: Some(color.into()),
            price: price.into(),
            supplier: SupplierRef::Id { id: supplier.0, name: supplier.1.into() },
            date: "29-08".into(),
            available: true,
            lowest_price: false,
        }
    }

    fn fixture() -> Vec<Product> {
        vec![
            item("1", "iPhone 16", "Preto", "128GB", "4.500,00", (1, "MegaCell")),
            item("2", "iPhone 16", "Azul", "256GB", "4.800,00", (1, "MegaCell")),
            item("3", "iPhone 16 Pro", "Preto", "256GB", "6.200,00", (2, "TopImports")),
            item("4", "iPhone 16 Pro Max", "Titânio", "512GB", "7.900,00", (2, "TopImports")),
            item("5", "iPhone 16e", "Branco", "128GB", "3.400,00", (1, "MegaCell")),
            item("6", "Galaxy S24", "Preto", "256GB", "3.900,00", (3, "AndroidShop")),
        ]
    }

    #[tokio::test]
    async fn test_structured_search_pages_and_counts() {
        let backend = DbBackend::new(seeded_pool().await);
        let f = FilterSet {
            brand: Some("apple".into()),
            limit: 3,
            ..Default::default()
        };
        let r = backend.search(&f).await.unwrap();
        assert_eq!(r.total, 5);
        assert_eq!(r.products.len(), 3);
        assert_eq!(r.total_pages, 2);
        // Default ordering is price ascending
        assert_eq!(r.products[0].model, "iPhone 16e");
    }

    #[tokio::test]
    async fn test_structured_facets_exclude_own_field() {
        let backend = DbBackend::new(seeded_pool().await);
        let f = FilterSet { color: Some("Preto".into()), ..Default::default() };
        let r = backend.search(&f).await.unwrap();
        assert_eq!(r.total, 3);
        // Color facet ignores the color filter itself
        let colors: Vec<&str> = r.aggregations.colors.iter().map(|c| c.value.as_str()).collect();
        assert!(colors.contains(&"Azul"));
        // Supplier facet is narrowed by the color filter
        let sum: u64 = r.aggregations.suppliers.iter().map(|s| s.count).sum();
        assert_eq!(sum, 3);
    }

    #[tokio::test]
    async fn test_text_search_strict_base() {
        let backend = DbBackend::new(seeded_pool().await);
        let f = FilterSet { search: Some("16".into()), ..Default::default() };
        let r = backend.search(&f).await.unwrap();
        let models: Vec<&str> = r.products.iter().map(|p| p.model.as_str()).collect();
        assert_eq!(models, vec!["iPhone 16", "iPhone 16"]);
    }

    #[tokio::test]
    async fn test_text_search_include_variants_base_first() {
        let backend = DbBackend::new(seeded_pool().await);
        let f = FilterSet {
            search: Some("16".into()),
            include_variants: true,
            ..Default::default()
        };
        let r = backend.search(&f).await.unwrap();
        assert_eq!(r.total, 5);
        assert_eq!(r.products[0].model, "iPhone 16");
    }

    #[tokio::test]
    async fn test_text_search_pro_max() {
        let backend = DbBackend::new(seeded_pool().await);
        let f = FilterSet { search: Some("iphone 16 pro max".into()), ..Default::default() };
        let r = backend.search(&f).await.unwrap();
        let models: Vec<&str> = r.products.iter().map(|p| p.model.as_str()).collect();
        assert_eq!(models, vec!["iPhone 16 Pro Max"]);
    }

    #[tokio::test]
    async fn test_price_range_and_supplier_list() {
        let backend = DbBackend::new(seeded_pool().await);
        let f = FilterSet {
            min_price: Some(4000.0),
            max_price: Some(7000.0),
            supplier_ids: Some(vec![1, 2]),
            ..Default::default()
        };
        let r = backend.search(&f).await.unwrap();
        let ids: Vec<&str> = r.products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(r.aggregations.price_min, Some(4500.0));
        assert_eq!(r.aggregations.price_max, Some(6200.0));
    }

    #[tokio::test]
    async fn test_suggestions_rank_and_penalty() {
        let backend = DbBackend::new(seeded_pool().await);
        let plain = backend.suggestions("iphone", 10, false).await.unwrap();
        assert_eq!(plain[0].value, "iPhone 16");
        assert_eq!(plain[0].count, 2);

        let exact = backend.suggestions("iphone 16", 3, true).await.unwrap();
        assert_eq!(exact[0].value, "iPhone 16");
        // Variant-suffixed names sink below base models
        assert!(exact.iter().position(|s| s.value == "iPhone 16 Pro").unwrap() > 0);
        assert_eq!(exact.len(), 3);
    }

    #[tokio::test]
    async fn test_suggestions_limit_clamped() {
        let backend = DbBackend::new(seeded_pool().await);
        // An absurd limit is clamped to the page-size ceiling, zero to 1
        let all = backend.suggestions("iphone", u32::MAX, true).await.unwrap();
        assert!(all.len() <= MAX_LIMIT as usize);
        let one = backend.suggestions("iphone", 0, false).await.unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_rows_is_success() {
        let backend = DbBackend::new(seeded_pool().await);
        let f = FilterSet { brand: Some("nokia".into()), ..Default::default() };
        let r = backend.search(&f).await.unwrap();
        assert_eq!(r.total, 0);
        assert!(r.products.is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_propagates_error() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let backend = DbBackend::new(pool);
        let err = backend.search(&FilterSet::default()).await.unwrap_err();
        assert!(matches!(err, SearchError::PrimaryUnavailable(_)));
    }
}
