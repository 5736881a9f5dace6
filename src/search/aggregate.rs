//! Shared ranking, paging and facet-count pipeline / 共享排序分页聚合管线
//!
//! Both backends funnel their text-matched candidate sets through
//! [`rank_and_page`], so relevance ordering, pagination and facet counts
//! are identical regardless of source.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::filters::{FacetField, FilterSet, SortField, SortOrder};
use super::relevance::relevance_score;
use super::schema::{Aggregations, FacetCount, SearchResult};
use super::SearchSource;
use crate::models::Product;

/// Facet cardinality caps / 聚合基数上限
pub const CAP_CATEGORIES: usize = 20;
pub const CAP_COLORS: usize = 30;
pub const CAP_STORAGES: usize = 20;
pub const CAP_SUPPLIERS: usize = 50;
pub const CAP_BRANDS: usize = 20;
pub const CAP_REGIONS: usize = 20;

/// Rank, slice and aggregate a text-matched candidate set.
///
/// `candidates` must already have the free-text search applied but not the
/// structural filters; facet counts need the rows that fail only their own
/// facet's constraint.
pub fn rank_and_page(
    candidates: Vec<Product>,
    filters: &FilterSet,
    source: SearchSource,
) -> SearchResult {
    let term = filters.search_term().map(str::to_string);

    let mut filtered: Vec<&Product> = candidates
        .iter()
        .filter(|p| filters.matches_product(p))
        .collect();

    sort_products(&mut filtered, filters, term.as_deref());

    let total = filtered.len() as u64;
    let offset = ((filters.page.max(1) - 1) as usize).saturating_mul(filters.limit as usize);
    let page: Vec<Product> = filtered
        .into_iter()
        .skip(offset)
        .take(filters.limit as usize)
        .cloned()
        .collect();

    let aggregations = build_aggregations(&candidates, filters);
    SearchResult::paged(page, total, filters, source, aggregations)
}

/// Relevance-then-price when a term is present, else the requested sort
fn sort_products(items: &mut [&Product], filters: &FilterSet, term: Option<&str>) {
    let by_field = |a: &Product, b: &Product| -> Ordering {
        let ord = match filters.sort_by {
            SortField::Price => cmp_price(a, b),
            SortField::Model => a.model.to_lowercase().cmp(&b.model.to_lowercase()),
            SortField::Brand => opt_lower(&a.brand).cmp(&opt_lower(&b.brand)),
            SortField::Date => {
                super::filters::date_key(&a.date).cmp(&super::filters::date_key(&b.date))
            }
        };
        match filters.sort_order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    };

    match term {
        Some(t) => {
            items.sort_by(|a, b| {
                relevance_score(b, t)
                    .cmp(&relevance_score(a, t))
                    .then_with(|| cmp_price(a, b))
                    .then_with(|| by_field(a, b))
                    .then_with(|| a.id.cmp(&b.id))
            });
        }
        None => {
            items.sort_by(|a, b| by_field(a, b).then_with(|| a.id.cmp(&b.id)));
        }
    }
}

/// Missing or unparseable prices sort last / 无价格排最后
fn cmp_price(a: &Product, b: &Product) -> Ordering {
    let pa = a.price_value().unwrap_or(f64::INFINITY);
    let pb = b.price_value().unwrap_or(f64::INFINITY);
    pa.partial_cmp(&pb).unwrap_or(Ordering::Equal)
}

fn opt_lower(v: &Option<String>) -> String {
    v.as_deref().unwrap_or("").to_lowercase()
}

/// Build every facet table over the candidate set. For each facet the
/// rows are re-filtered with that facet's own equality predicate dropped.
pub fn build_aggregations(candidates: &[Product], filters: &FilterSet) -> Aggregations {
    let facet = |field: FacetField, cap: usize, value: fn(&Product) -> Option<String>| {
        count_values(
            candidates
                .iter()
                .filter(|p| filters.matches_structural(p, Some(field)))
                .filter_map(value),
            cap,
        )
    };

    let (price_min, price_max) = candidates
        .iter()
        .filter(|p| filters.matches_product(p))
        .filter_map(|p| p.price_value())
        .fold((None, None), |(min, max): (Option<f64>, Option<f64>), v| {
            (
                Some(min.map_or(v, |m: f64| m.min(v))),
                Some(max.map_or(v, |m: f64| m.max(v))),
            )
        });

    Aggregations {
        price_min,
        price_max,
        categories: facet(FacetField::Category, CAP_CATEGORIES, |p| p.category.clone()),
        colors: facet(FacetField::Color, CAP_COLORS, |p| p.color.clone()),
        storages: facet(FacetField::Storage, CAP_STORAGES, |p| p.storage.clone()),
        suppliers: facet(FacetField::Supplier, CAP_SUPPLIERS, |p| {
            Some(p.supplier.name().to_string())
        }),
        brands: facet(FacetField::Brand, CAP_BRANDS, |p| p.brand.clone()),
        regions: facet(FacetField::Region, CAP_REGIONS, |p| p.region.clone()),
    }
}

/// Count distinct non-blank values, sort by descending count (value as
/// tie-break for determinism) and cap the table size
fn count_values(values: impl Iterator<Item = String>, cap: usize) -> Vec<FacetCount> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for v in values {
        let v = v.trim().to_string();
        if v.is_empty() {
            continue;
        }
        *counts.entry(v).or_default() += 1;
    }
    let mut out: Vec<FacetCount> = counts
        .into_iter()
        .map(|(value, count)| FacetCount { value, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    out.truncate(cap);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SupplierRef;

    fn product(id: &str, model: &str, color: Option<&str>, price: &str) -> Product {
        Product {
            id: id.into(),
            model: model.into(),
            brand: Some("Apple".into()),
            category: Some("iphone".into()),
            storage: Some("128GB".into()),
            region: None,
            color: color.map(Into::into),
            price: price.into(),
            supplier: SupplierRef::Name("MegaCell".into()),
            date: "29-08".into(),
            available: true,
            lowest_price: false,
        }
    }

    #[test]
    fn test_facet_sum_property() {
        // Counts of a single-valued field sum to total minus blanks
        let candidates = vec![
            product("1", "iPhone 16", Some("Preto"), "100"),
            product("2", "iPhone 16", Some("Preto"), "200"),
            product("3", "iPhone 16", Some("Azul"), "300"),
            product("4", "iPhone 16", None, "400"),
        ];
        let aggs = build_aggregations(&candidates, &FilterSet::default());
        let sum: u64 = aggs.colors.iter().map(|f| f.count).sum();
        assert_eq!(sum, 3); // 4 rows minus 1 null color
        assert_eq!(aggs.colors[0].value, "Preto");
        assert_eq!(aggs.colors[0].count, 2);
    }

    #[test]
    fn test_own_facet_excluded() {
        let candidates = vec![
            product("1", "iPhone 16", Some("Preto"), "100"),
            product("2", "iPhone 16", Some("Azul"), "200"),
        ];
        let f = FilterSet { color: Some("Preto".into()), ..Default::default() };
        let aggs = build_aggregations(&candidates, &f);
        // Color facet still shows both options despite the color filter
        assert_eq!(aggs.colors.len(), 2);
        // But price bounds honor the full filter
        assert_eq!(aggs.price_min, Some(100.0));
        assert_eq!(aggs.price_max, Some(100.0));
    }

    #[test]
    fn test_cap_and_order() {
        let mut candidates = Vec::new();
        for i in 0..40 {
            candidates.push(product(&i.to_string(), "iPhone 16", Some(&format!("Cor{i}")), "100"));
        }
        // One dominant value
        for i in 40..45 {
            candidates.push(product(&i.to_string(), "iPhone 16", Some("Preto"), "100"));
        }
        let aggs = build_aggregations(&candidates, &FilterSet::default());
        assert_eq!(aggs.colors.len(), CAP_COLORS);
        assert_eq!(aggs.colors[0].value, "Preto");
    }

    #[test]
    fn test_rank_and_page_price_tiebreak() {
        let candidates = vec![
            product("a", "iPhone 16", None, "900"),
            product("b", "iPhone 16", None, "700"),
            product("c", "iPhone 16 256GB", None, "800"),
        ];
        let f = FilterSet {
            search: Some("16".into()),
            ..Default::default()
        };
        let r = rank_and_page(candidates, &f, SearchSource::Secondary);
        // All three are strict base hits; ascending price breaks the tie
        assert_eq!(r.total, 3);
        let prices: Vec<&str> = r.products.iter().map(|p| p.price.as_str()).collect();
        assert_eq!(prices, vec!["700", "800", "900"]);
    }

    #[test]
    fn test_pagination_slice() {
        let candidates: Vec<Product> =
            (0..25).map(|i| product(&format!("{i:02}"), "iPhone 16", None, "100")).collect();
        let f = FilterSet { page: 2, limit: 10, ..Default::default() };
        let r = rank_and_page(candidates, &f, SearchSource::Secondary);
        assert_eq!(r.total, 25);
        assert_eq!(r.products.len(), 10);
        assert_eq!(r.total_pages, 3);
        assert!(r.has_previous && r.has_next);
    }
}
