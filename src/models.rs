use serde::{Deserialize, Serialize};

/// Supplier reference: a registered supplier (id + name) or a bare name
/// string as it appears in the feed / 供应商引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SupplierRef {
    Id { id: i64, name: String },
    Name(String),
}

impl SupplierRef {
    pub fn id(&self) -> Option<i64> {
        match self {
            SupplierRef::Id { id, .. } => Some(*id),
            SupplierRef::Name(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SupplierRef::Id { name, .. } => name,
            SupplierRef::Name(name) => name,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A single supplier offer for a date / 单个供应商报价
///
/// `price` keeps its original localized form ("1.234,56"); use
/// [`Product::price_value`] wherever a number is needed. Absent optional
/// attributes mean "unknown" and never match an empty-string filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub price: String,
    pub supplier: SupplierRef,
    /// Day-month tag, e.g. "29-08" / 日-月标签
    pub date: String,
    #[serde(default = "default_true")]
    pub available: bool,
    /// Computed upstream, consumed as-is / 上游计算，按原样使用
    #[serde(default)]
    pub lowest_price: bool,
}

impl Product {
    /// Normalized numeric price; `None` when the localized string does not
    /// parse to a positive number / 规范化价格
    pub fn price_value(&self) -> Option<f64> {
        parse_price(&self.price)
    }
}

/// Parse a localized decimal price string / 解析本地化价格字符串
///
/// Accepts "R$ 1.234,56", "1.234,56", "1,234.56", "1234.56" and plain
/// integers. Returns `None` for anything that does not normalize to a
/// positive number.
pub fn parse_price(raw: &str) -> Option<f64> {
    let s: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if s.is_empty() {
        return None;
    }

    let normalized = match (s.rfind('.'), s.rfind(',')) {
        // Both separators: the later one is the decimal point
        (Some(dot), Some(comma)) => {
            if dot > comma {
                s.replace(',', "")
            } else {
                s.replace('.', "").replace(',', ".")
            }
        }
        // Comma only: "1,234" is a thousands group, otherwise decimal
        (None, Some(comma)) => {
            if s.matches(',').count() > 1 || s.len() - comma == 4 {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        // Dot only: pt-BR "1.234" is a thousands group
        (Some(dot), None) => {
            if s.matches('.').count() > 1 || s.len() - dot == 4 {
                s.replace('.', "")
            } else {
                s
            }
        }
        (None, None) => s,
    };

    normalized.parse::<f64>().ok().filter(|v| *v > 0.0)
}
