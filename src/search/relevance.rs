//! Relevance and variant-matching engine / 相关性与变体匹配引擎
//!
//! Pure functions, no I/O. Product names are hierarchical and ambiguous:
//! "iPhone 16" must match the base model but not "iPhone 16 Pro",
//! "iPhone 16 Pro Max", "iPhone 16 Plus", "iPhone 16e" or refurbished
//! stock, unless the caller opts in or the query itself names a variant.
//!
//! The query is parsed once into a [`QueryShape`]; each shape selects one
//! of five mutually exclusive matchers. All variant-keyword checks use
//! boundary-delimited containment (order-insensitive), one consistent
//! strictness level for every arm.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Product;

/// Variant keywords excluded from a strict base-model match
const VARIANT_WORDS: &[&str] = &["pro", "max", "plus", "mini", "se", "ultra"];

/// Condition keywords marking non-new stock / 非全新机条件关键词
const CONDITION_WORDS: &[&str] = &[
    "cpo",
    "recondicionado",
    "ativado",
    "usado",
    "refurbished",
    "open box",
    "seminovo",
    "vitrine",
];

/// Score tiers / 分数等级
pub const SCORE_EXACT_BARE: i64 = 3000;
pub const SCORE_EXACT_SHAPED: i64 = 2000;
pub const SCORE_PARTIAL: i64 = 600;
pub const SCORE_FREEFORM_MODEL: i64 = 400;
pub const SCORE_FIELD_BRAND: i64 = 300;
pub const SCORE_FIELD_CATEGORY: i64 = 200;
pub const SCORE_FIELD_COLOR: i64 = 150;
pub const SCORE_FIELD_STORAGE: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeQualifier {
    Max,
    Plus,
    Mini,
}

impl SizeQualifier {
    pub fn token(&self) -> &'static str {
        match self {
            SizeQualifier::Max => "max",
            SizeQualifier::Plus => "plus",
            SizeQualifier::Mini => "mini",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "max" => Some(SizeQualifier::Max),
            "plus" => Some(SizeQualifier::Plus),
            "mini" => Some(SizeQualifier::Mini),
            _ => None,
        }
    }
}

/// Parsed shape of a free-text query / 查询解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum QueryShape {
    /// A bare 1-2 digit number, e.g. "16"
    BareNumber { number: String },
    /// "<brand> <number>[letter][ pro][ max|plus|mini]"
    BrandModel {
        brand: String,
        number: String,
        letter: Option<char>,
        pro: bool,
        size: Option<SizeQualifier>,
    },
    /// Anything else: degrade to substring containment, never an error
    Freeform { term: String },
}

static BARE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}$").unwrap());

static BRAND_MODEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z][a-z ]*?)\s+(\d{1,2})([a-z])?(?:\s+(pro))?(?:\s+(max|plus|mini))?$")
        .unwrap()
});

/// Parse a lowercased, trimmed query into its shape / 解析查询形状
pub fn parse_query(term: &str) -> QueryShape {
    let t = term.trim().to_lowercase();
    if BARE_NUMBER_RE.is_match(&t) {
        return QueryShape::BareNumber { number: t };
    }
    if let Some(caps) = BRAND_MODEL_RE.captures(&t) {
        let brand = caps[1].trim().to_string();
        // A leading variant keyword is not a brand ("pro 14" is freeform)
        if !VARIANT_WORDS.contains(&brand.as_str()) {
            return QueryShape::BrandModel {
                brand,
                number: caps[2].to_string(),
                letter: caps.get(3).and_then(|m| m.as_str().chars().next()),
                pro: caps.get(4).is_some(),
                size: caps.get(5).and_then(|m| SizeQualifier::parse(m.as_str())),
            };
        }
    }
    QueryShape::Freeform { term: t }
}

/// Boundary-delimited containment: `word` must not continue an adjacent
/// alphanumeric run ("pro" does not hit "produto") / 边界限定包含
fn contains_word(name: &str, word: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = name[from..].find(word) {
        let start = from + pos;
        let end = start + word.len();
        let before_ok = name[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = name[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

fn contains_any_word(name: &str, words: &[&str]) -> bool {
    words.iter().any(|w| contains_word(name, w))
}

/// Whether a name or query mentions refurbished/condition stock
pub fn mentions_condition(text: &str) -> bool {
    contains_any_word(text, CONDITION_WORDS)
}

/// Whether a name carries any variant qualifier; used to penalize variant
/// suggestions when the caller wants exact base models
pub fn mentions_variant(text: &str) -> bool {
    let t = text.to_lowercase();
    contains_any_word(&t, VARIANT_WORDS) || mentions_condition(&t)
}

/// Byte positions of standalone numeric occurrences of `number` (not part
/// of a longer digit run)
fn number_positions(name: &str, number: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(pos) = name[from..].find(number) {
        let start = from + pos;
        let end = start + number.len();
        let before_ok = name[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_ascii_digit());
        let after_ok = name[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_digit());
        if before_ok && after_ok {
            out.push((start, end));
        }
        from = end;
    }
    out
}

/// Loose containment of the model number: "16" hits "iPhone 16e" too
fn has_number_loose(name: &str, number: &str) -> bool {
    !number_positions(name, number).is_empty()
}

/// Occurrence of the number followed by exactly one given letter and then
/// a boundary: matches the "16e" in "iPhone 16e 128GB"
fn has_letter_suffix(name: &str, number: &str, letter: char) -> bool {
    number_positions(name, number).iter().any(|&(_, end)| {
        let mut rest = name[end..].chars();
        if rest.next() != Some(letter) {
            return false;
        }
        rest.next().map_or(true, |c| !c.is_alphanumeric())
    })
}

/// Strict base-model pattern: the number token sits right after a word
/// (the brand token position), has no trailing letter, and no variant
/// keyword appears anywhere in the name / 严格基础型号匹配
fn is_strict_base(name: &str, number: &str) -> bool {
    if contains_any_word(name, VARIANT_WORDS) {
        return false;
    }
    number_positions(name, number).iter().any(|&(start, end)| {
        let after_ok = name[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        let before_ok = name[..start]
            .trim_end()
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphabetic());
        after_ok && before_ok
    })
}

/// Brand containment; multi-word brands must appear as a delimited phrase
fn contains_brand(name: &str, brand: &str) -> bool {
    contains_word(name, brand)
}

/// Core variant disambiguation / 变体判别
///
/// Returns whether `candidate_model` is an acceptable hit for `term`.
/// With `include_variants` the negative constraints are dropped and any
/// name containing brand + number passes.
pub fn matches_variant(candidate_model: &str, term: &str, include_variants: bool) -> bool {
    let name = candidate_model.to_lowercase();
    let t = term.trim().to_lowercase();

    // Condition pre-filter, independent of query shape
    if !include_variants && !mentions_condition(&t) && mentions_condition(&name) {
        return false;
    }

    match parse_query(&t) {
        QueryShape::BareNumber { number } => {
            if include_variants {
                has_number_loose(&name, &number)
            } else {
                is_strict_base(&name, &number)
            }
        }
        QueryShape::BrandModel { brand, number, letter, pro, size } => {
            if !contains_brand(&name, &brand) || !has_number_loose(&name, &number) {
                return false;
            }
            if include_variants {
                return true;
            }
            match (letter, pro, size) {
                // 1. Plain "<brand> <number>": strict base, reject variants
                (None, false, None) => is_strict_base(&name, &number),
                // 2. Letter variant only: require that suffix, reject sizes
                (Some(l), false, None) => {
                    has_letter_suffix(&name, &number, l)
                        && !contains_any_word(&name, &["pro", "max", "plus", "mini"])
                }
                // 3. Pro + size: both tokens must co-occur, any order
                (_, true, Some(sz)) => {
                    contains_word(&name, "pro") && contains_word(&name, sz.token())
                }
                // 4. Pro without size: "pro" present, sizes absent
                (_, true, None) => {
                    contains_word(&name, "pro")
                        && !contains_any_word(&name, &["max", "plus", "mini"])
                }
                // 5. Size without pro: size present, "pro" absent
                (_, false, Some(sz)) => {
                    contains_word(&name, sz.token()) && !contains_word(&name, "pro")
                }
            }
        }
        QueryShape::Freeform { term } => name.contains(&term),
    }
}

/// Full-record text match used by both backends / 两个后端共用的文本匹配
///
/// Shaped queries go through the variant matcher. A candidate whose name
/// does not mention the model number at all still gets the broader
/// field-containment fallback, so non-phone rows are not silently dropped.
pub fn matches_search(p: &Product, term: &str, include_variants: bool) -> bool {
    let t = term.trim().to_lowercase();
    if t.is_empty() {
        return true;
    }
    match parse_query(&t) {
        QueryShape::Freeform { term } => {
            field_contains(p, &term)
        }
        QueryShape::BareNumber { ref number } | QueryShape::BrandModel { ref number, .. } => {
            if matches_variant(&p.model, &t, include_variants) {
                return true;
            }
            let name = p.model.to_lowercase();
            if has_number_loose(&name, number) {
                // Name mentions the number but failed the grammar: a real
                // variant mismatch, not a fallback case
                return false;
            }
            field_contains(p, &t)
        }
    }
}

/// Case-insensitive substring containment over the searchable fields
fn field_contains(p: &Product, t: &str) -> bool {
    let hit = |v: &Option<String>| v.as_deref().is_some_and(|s| s.to_lowercase().contains(t));
    p.model.to_lowercase().contains(t)
        || hit(&p.brand)
        || hit(&p.category)
        || hit(&p.color)
        || hit(&p.storage)
}

/// Tiered relevance score / 分级相关性评分
///
/// Deterministic and pure: exact base-model hits outrank variant
/// containment, which outranks field-substring hits. Ties are broken by
/// ascending price at the sort sites.
pub fn relevance_score(p: &Product, term: &str) -> i64 {
    let t = term.trim().to_lowercase();
    if t.is_empty() {
        return 0;
    }
    let name = p.model.to_lowercase();
    match parse_query(&t) {
        QueryShape::BareNumber { number } => {
            if is_strict_base(&name, &number) {
                SCORE_EXACT_BARE
            } else if has_number_loose(&name, &number) {
                SCORE_PARTIAL
            } else {
                field_score(p, &t)
            }
        }
        QueryShape::BrandModel { ref brand, ref number, .. } => {
            if matches_variant(&p.model, &t, false) {
                SCORE_EXACT_SHAPED
            } else if contains_brand(&name, brand) && has_number_loose(&name, number) {
                SCORE_PARTIAL
            } else {
                field_score(p, &t)
            }
        }
        QueryShape::Freeform { term } => {
            if name.contains(&term) {
                SCORE_FREEFORM_MODEL
            } else {
                field_score(p, &term)
            }
        }
    }
}

fn field_score(p: &Product, t: &str) -> i64 {
    let hit = |v: &Option<String>| v.as_deref().is_some_and(|s| s.to_lowercase().contains(t));
    if hit(&p.brand) {
        SCORE_FIELD_BRAND
    } else if hit(&p.category) {
        SCORE_FIELD_CATEGORY
    } else if hit(&p.color) {
        SCORE_FIELD_COLOR
    } else if hit(&p.storage) {
        SCORE_FIELD_STORAGE
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SupplierRef;

    fn product(model: &str) -> Product {
        Product {
            id: model.to_string(),
            model: model.to_string(),
            brand: Some("Apple".into()),
            category: Some("iphone".into()),
            storage: None,
            region: None,
            color: None,
            price: "1000".into(),
            supplier: SupplierRef::Name("X".into()),
            date: "29-08".into(),
            available: true,
            lowest_price: false,
        }
    }

    #[test]
    fn test_parse_shapes() {
        assert_eq!(parse_query("16"), QueryShape::BareNumber { number: "16".into() });
        assert_eq!(
            parse_query("iPhone 16 Pro Max"),
            QueryShape::BrandModel {
                brand: "iphone".into(),
                number: "16".into(),
                letter: None,
                pro: true,
                size: Some(SizeQualifier::Max),
            }
        );
        assert_eq!(
            parse_query("iphone 16e"),
            QueryShape::BrandModel {
                brand: "iphone".into(),
                number: "16".into(),
                letter: Some('e'),
                pro: false,
                size: None,
            }
        );
        assert_eq!(
            parse_query("iphone 15 plus"),
            QueryShape::BrandModel {
                brand: "iphone".into(),
                number: "15".into(),
                letter: None,
                pro: false,
                size: Some(SizeQualifier::Plus),
            }
        );
        assert_eq!(
            parse_query("capinha transparente"),
            QueryShape::Freeform { term: "capinha transparente".into() }
        );
        assert_eq!(parse_query("164"), QueryShape::Freeform { term: "164".into() });
    }

    #[test]
    fn test_bare_number_strict() {
        // Property: "<brand> N<suffix>" matches iff suffix is empty
        assert!(matches_variant("iPhone 16", "16", false));
        assert!(matches_variant("iPhone 16 128GB", "16", false));
        assert!(!matches_variant("iPhone 16 Pro", "16", false));
        assert!(!matches_variant("iPhone 16 Pro Max", "16", false));
        assert!(!matches_variant("iPhone 16 Plus", "16", false));
        assert!(!matches_variant("iPhone 16 Mini", "16", false));
        assert!(!matches_variant("iPhone 16e", "16", false));
        // Different number never matches
        assert!(!matches_variant("iPhone 15", "16", false));
        assert!(!matches_variant("iPhone 164", "16", false));
    }

    #[test]
    fn test_bare_number_with_variants() {
        for name in ["iPhone 16", "iPhone 16 Pro", "iPhone 16 Pro Max", "iPhone 16e"] {
            assert!(matches_variant(name, "16", true), "{name}");
        }
        assert!(!matches_variant("iPhone 15", "16", true));
    }

    #[test]
    fn test_explicit_base_query() {
        assert!(matches_variant("iPhone 16 128GB Preto", "iphone 16", false));
        assert!(!matches_variant("iPhone 16 Pro", "iphone 16", false));
        assert!(!matches_variant("iPhone 16e", "iphone 16", false));
        assert!(!matches_variant("Galaxy S24", "iphone 16", false));
    }

    #[test]
    fn test_letter_variant_query() {
        assert!(matches_variant("iPhone 16e 128GB", "iphone 16e", false));
        assert!(!matches_variant("iPhone 16", "iphone 16e", false));
        assert!(!matches_variant("iPhone 16 Pro", "iphone 16e", false));
    }

    #[test]
    fn test_pro_max_co_occurrence() {
        // Property: both "pro" and "max" must co-occur, any order
        assert!(matches_variant("iPhone 16 Pro Max 256GB", "iphone 16 pro max", false));
        assert!(matches_variant("iPhone 16 Max Pro", "iphone 16 pro max", false));
        assert!(!matches_variant("iPhone 16 Pro", "iphone 16 pro max", false));
        assert!(!matches_variant("iPhone 16", "iphone 16 pro max", false));
    }

    #[test]
    fn test_pro_without_size() {
        assert!(matches_variant("iPhone 16 Pro 128GB", "iphone 16 pro", false));
        assert!(!matches_variant("iPhone 16 Pro Max", "iphone 16 pro", false));
        assert!(!matches_variant("iPhone 16", "iphone 16 pro", false));
    }

    #[test]
    fn test_size_without_pro() {
        assert!(matches_variant("iPhone 16 Plus", "iphone 16 plus", false));
        assert!(!matches_variant("iPhone 16 Pro Max", "iphone 16 plus", false));
        assert!(!matches_variant("iPhone 16", "iphone 16 plus", false));
    }

    #[test]
    fn test_condition_prefilter() {
        assert!(!matches_variant("iPhone 16 CPO", "16", false));
        assert!(!matches_variant("iPhone 16 Recondicionado", "iphone 16", false));
        assert!(!matches_variant("iPhone 16 Open box", "16", false));
        // The query naming a condition keyword lifts the filter
        assert!(matches_variant("iPhone 16 CPO", "iphone 16 cpo", false));
        // includeVariants lifts it too
        assert!(matches_variant("iPhone 16 CPO", "16", true));
    }

    #[test]
    fn test_word_boundaries() {
        // "pro" must not hit inside an unrelated word
        assert!(matches_variant("iPhone 16 com Proteção", "16", false));
        assert!(!contains_word("promax", "pro"));
        assert!(contains_word("pro-max", "pro"));
        assert!(contains_word("iphone 16 pro", "pro"));
        assert!(!contains_word("produto", "pro"));
    }

    #[test]
    fn test_freeform_fallback_never_panics() {
        assert!(matches_variant("Capinha iPhone transparente", "capinha", false));
        assert!(!matches_variant("iPhone 16", "xyz###", false));
    }

    #[test]
    fn test_relevance_tiers_descend() {
        let base = product("iPhone 16");
        let pro = product("iPhone 16 Pro");
        let other = product("Galaxy S24");

        let s_base = relevance_score(&base, "16");
        let s_pro = relevance_score(&pro, "16");
        let s_other = relevance_score(&other, "16");
        assert!(s_base > s_pro, "exact base must outrank variant containment");
        assert!(s_pro > s_other || s_other == 0);

        // Explicit query: exact > partial > field
        let s_exact = relevance_score(&pro, "iphone 16 pro");
        let s_partial = relevance_score(&product("iPhone 16 Pro Max"), "iphone 16 pro");
        assert!(s_exact > s_partial);
        assert!(s_partial > relevance_score(&other, "iphone 16 pro"));
    }

    #[test]
    fn test_matches_search_field_fallback() {
        // A row that never mentions the number falls back to fields
        let mut acc = product("Pelicula 3D");
        acc.brand = Some("Genérica".into());
        acc.category = Some("acessorio 16".into());
        assert!(matches_search(&acc, "16", false));

        // A row that mentions the number but fails the grammar is out
        let pro = product("iPhone 16 Pro");
        assert!(!matches_search(&pro, "16", false));
    }
}
