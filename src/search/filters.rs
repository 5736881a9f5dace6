//! Filter set - the structured query contract / 过滤条件集
//!
//! Every incoming request is parsed into a closed [`FilterSet`] before it
//! reaches any backend. The empty string and the literal token "all" mean
//! "no constraint" for categorical fields, never "match empty".

use serde::{Deserialize, Serialize};

use crate::models::Product;

/// Hard ceiling for the page size / 分页大小上限
pub const MAX_LIMIT: u32 = 100;

const DEFAULT_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Price,
    Model,
    Brand,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Facet fields whose own equality predicate is dropped while that facet
/// is being counted / 聚合时排除自身条件的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetField {
    Category,
    Color,
    Storage,
    Supplier,
    Brand,
    Region,
}

/// The query contract. All fields optional; see `normalized` for the
/// clamping and "all"-token rules / 查询契约
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSet {
    pub search: Option<String>,
    pub model: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub storage: Option<String>,
    /// Capacity phrase like "128GB"; matched against the storage field
    pub capacity: Option<String>,
    pub color: Option<String>,
    pub region: Option<String>,
    pub date: Option<String>,
    pub supplier_id: Option<i64>,
    pub supplier_ids: Option<Vec<i64>>,
    pub supplier_name: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub available: Option<bool>,
    pub lowest_price: Option<bool>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    /// When false, a base-model search rejects Pro/Max/Plus/Mini/lettered
    /// and refurbished variants / 是否包含变体
    pub include_variants: bool,
    pub page: u32,
    pub limit: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            search: None,
            model: None,
            brand: None,
            category: None,
            storage: None,
            capacity: None,
            color: None,
            region: None,
            date: None,
            supplier_id: None,
            supplier_ids: None,
            supplier_name: None,
            min_price: None,
            max_price: None,
            available: None,
            lowest_price: None,
            date_from: None,
            date_to: None,
            include_variants: false,
            page: 1,
            limit: DEFAULT_LIMIT,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

/// Strip a categorical filter value: empty and "all" mean unconstrained
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

impl FilterSet {
    /// Produce the canonical form used by every backend: page >= 1, limit
    /// clamped, "all"/empty categorical values dropped / 规范化
    pub fn normalized(&self) -> FilterSet {
        let mut f = self.clone();
        f.page = f.page.max(1);
        f.limit = f.limit.clamp(1, MAX_LIMIT);
        f.search = clean(f.search);
        f.model = clean(f.model);
        f.brand = clean(f.brand);
        f.category = clean(f.category);
        f.storage = clean(f.storage);
        f.capacity = clean(f.capacity);
        f.color = clean(f.color);
        f.region = clean(f.region);
        f.date = clean(f.date);
        f.supplier_name = clean(f.supplier_name);
        f.date_from = clean(f.date_from);
        f.date_to = clean(f.date_to);
        f.supplier_ids = f.supplier_ids.filter(|ids| !ids.is_empty());
        f
    }

    /// True when a non-empty free-text search term is present
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Apply every structural predicate (everything except the free-text
    /// search term) against one product / 应用结构化条件
    pub fn matches_product(&self, p: &Product) -> bool {
        self.matches_structural(p, None)
    }

    /// Same as `matches_product`, but with one facet field's own equality
    /// predicate dropped, so facet counts reflect "what else is available
    /// given the current search" / 排除指定字段后匹配
    pub fn matches_structural(&self, p: &Product, skip: Option<FacetField>) -> bool {
        if !eq_opt(&self.model, Some(&p.model)) {
            return false;
        }
        if skip != Some(FacetField::Brand) && !eq_opt(&self.brand, p.brand.as_deref()) {
            return false;
        }
        if skip != Some(FacetField::Category) && !eq_opt(&self.category, p.category.as_deref()) {
            return false;
        }
        if skip != Some(FacetField::Color) && !eq_opt(&self.color, p.color.as_deref()) {
            return false;
        }
        if skip != Some(FacetField::Region) && !eq_opt(&self.region, p.region.as_deref()) {
            return false;
        }
        if skip != Some(FacetField::Storage) {
            if !storage_eq(&self.storage, p.storage.as_deref()) {
                return false;
            }
            if !storage_eq(&self.capacity, p.storage.as_deref()) {
                return false;
            }
        }

        if skip != Some(FacetField::Supplier) {
            if let Some(id) = self.supplier_id {
                if p.supplier.id() != Some(id) {
                    return false;
                }
            }
            if let Some(ref ids) = self.supplier_ids {
                match p.supplier.id() {
                    Some(id) if ids.contains(&id) => {}
                    _ => return false,
                }
            }
            if let Some(ref name) = self.supplier_name {
                if !p.supplier.name().eq_ignore_ascii_case(name) {
                    return false;
                }
            }
        }

        if self.min_price.is_some() || self.max_price.is_some() {
            // Unparseable prices are excluded from price-range filters
            let value = match p.price_value() {
                Some(v) => v,
                None => return false,
            };
            if let Some(min) = self.min_price {
                if value < min {
                    return false;
                }
            }
            if let Some(max) = self.max_price {
                if value > max {
                    return false;
                }
            }
        }

        if let Some(want) = self.available {
            if p.available != want {
                return false;
            }
        }
        if let Some(want) = self.lowest_price {
            if p.lowest_price != want {
                return false;
            }
        }

        if let Some(ref tag) = self.date {
            if !p.date.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            let key = match date_key(&p.date) {
                Some(k) => k,
                None => return false,
            };
            if let Some(from) = self.date_from.as_deref().and_then(date_key) {
                if key < from {
                    return false;
                }
            }
            if let Some(to) = self.date_to.as_deref().and_then(date_key) {
                if key > to {
                    return false;
                }
            }
        }

        true
    }
}

/// Case-insensitive equality against an optional field; an unset filter
/// always passes, an unset field never matches a set filter
fn eq_opt(filter: &Option<String>, value: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(want) => value.is_some_and(|v| v.to_lowercase() == want.to_lowercase()),
    }
}

/// Storage comparison ignoring separators and case: "128gb" == "128 GB"
fn storage_eq(filter: &Option<String>, value: Option<&str>) -> bool {
    fn squash(s: &str) -> String {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase()
    }
    match filter {
        None => true,
        Some(want) => value.is_some_and(|v| squash(v) == squash(want)),
    }
}

/// Sortable key for a "DD-MM" date tag: (month, day) / 日-月标签排序键
pub fn date_key(tag: &str) -> Option<(u8, u8)> {
    let (day, month) = tag.trim().split_once('-')?;
    let day: u8 = day.parse().ok()?;
    let month: u8 = month.parse().ok()?;
    if day == 0 || day > 31 || month == 0 || month > 12 {
        return None;
    }
    Some((month, day))
}
