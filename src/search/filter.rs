//! Structured metadata filters.
//!
//! A [`FilterPredicate`] is a closed set of optional constraints: category
//! equality, colour equality and a single price comparison. Untrusted JSON
//! (language-model output, user input) is validated field by field; the
//! caller decides whether problems are dropped ([`FilterPredicate::from_json_lenient`])
//! or rejected ([`FilterPredicate::from_json_strict`]).
//!
//! Wire format: `{"category": "electronics", "color": "white", "price": {"$lt": 300}}`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::catalog::{MetadataStore, ProductRecord};
use crate::error::{Error, Result};

/// Numeric comparison applied to the product price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl Comparator {
    /// Parse `lt`, `$lt`, `LTE`, ... into a comparator.
    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim();
        let key = key.strip_prefix('$').unwrap_or(key);
        match key.to_ascii_lowercase().as_str() {
            "lt" => Some(Comparator::Lt),
            "lte" => Some(Comparator::Lte),
            "gt" => Some(Comparator::Gt),
            "gte" => Some(Comparator::Gte),
            "eq" => Some(Comparator::Eq),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Lt => "lt",
            Comparator::Lte => "lte",
            Comparator::Gt => "gt",
            Comparator::Gte => "gte",
            Comparator::Eq => "eq",
        }
    }

    /// Evaluate `value <op> threshold`.
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => value < threshold,
            Comparator::Lte => value <= threshold,
            Comparator::Gt => value > threshold,
            Comparator::Gte => value >= threshold,
            Comparator::Eq => (value - threshold).abs() <= 1e-9 * threshold.abs().max(1.0),
        }
    }
}

/// Price constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceFilter {
    pub comparator: Comparator,
    pub threshold: f64,
}

/// Conjunction of optional metadata constraints.
///
/// String values are stored trimmed and lower-cased; matching is
/// case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterPredicate {
    pub category: Option<String>,
    pub color: Option<String>,
    pub price: Option<PriceFilter>,
}

/// Problem found while validating filter JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterIssue {
    /// Top-level value is not an object.
    NotAnObject,
    /// Key outside the schema.
    UnknownKey(String),
    /// Recognised key with an unusable value.
    InvalidValue { key: String, reason: String },
    /// Value not present in the catalog vocabulary.
    UnknownValue { key: String, value: String },
}

impl fmt::Display for FilterIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterIssue::NotAnObject => write!(f, "filter must be a JSON object"),
            FilterIssue::UnknownKey(key) => write!(f, "unknown filter key '{}'", key),
            FilterIssue::InvalidValue { key, reason } => {
                write!(f, "invalid value for '{}': {}", key, reason)
            }
            FilterIssue::UnknownValue { key, value } => {
                write!(f, "'{}' is not a known {}", value, key)
            }
        }
    }
}

/// Allowed filter values.
///
/// `None` vocabularies accept any value.
#[derive(Debug, Clone, Default)]
pub struct FilterSchema {
    pub categories: Option<BTreeSet<String>>,
    pub colors: Option<BTreeSet<String>>,
}

impl FilterSchema {
    /// Accepts any category or colour.
    pub fn open() -> Self {
        Self::default()
    }

    /// Restrict values to what the catalog contains.
    pub fn from_store(store: &MetadataStore) -> Self {
        Self {
            categories: Some(store.categories()),
            colors: Some(store.colors()),
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: impl AsRef<str>) -> Self {
        self.category = Some(normalize(category.as_ref()));
        self
    }

    pub fn with_color(mut self, color: impl AsRef<str>) -> Self {
        self.color = Some(normalize(color.as_ref()));
        self
    }

    pub fn with_price(mut self, comparator: Comparator, threshold: f64) -> Self {
        self.price = Some(PriceFilter {
            comparator,
            threshold,
        });
        self
    }

    /// Reject constraints no product could ever satisfy because the value
    /// itself is unusable (blank terms, non-finite thresholds).
    pub fn validate(&self) -> Result<()> {
        for (key, term) in [("category", &self.category), ("color", &self.color)] {
            if term.as_deref().is_some_and(|t| t.trim().is_empty()) {
                return Err(Error::InvalidArgument(format!(
                    "malformed filter: empty {}",
                    key
                )));
            }
        }
        if let Some(price) = &self.price {
            if !price.threshold.is_finite() {
                return Err(Error::InvalidArgument(format!(
                    "malformed filter: price threshold {} is not a finite number",
                    price.threshold
                )));
            }
        }
        Ok(())
    }

    /// True when no field is populated.
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.color.is_none() && self.price.is_none()
    }

    /// Whether `record` satisfies every populated field.
    pub fn matches(&self, record: &ProductRecord) -> bool {
        if let Some(category) = &self.category {
            if normalize(&record.category) != *category {
                return false;
            }
        }
        if let Some(color) = &self.color {
            if normalize(&record.color) != *color {
                return false;
            }
        }
        if let Some(price) = &self.price {
            if !price.comparator.compare(record.price, price.threshold) {
                return false;
            }
        }
        true
    }

    /// Records satisfying the predicate, order preserved.
    pub fn apply(&self, records: &[Arc<ProductRecord>]) -> Vec<Arc<ProductRecord>> {
        records
            .iter()
            .filter(|record| self.matches(record))
            .cloned()
            .collect()
    }

    /// Validate filter JSON, collecting every problem found.
    ///
    /// Valid fields are kept even when other fields are rejected.
    /// `null` (top-level or per key) means "no constraint".
    pub fn parse(value: &Value, schema: &FilterSchema) -> (Self, Vec<FilterIssue>) {
        let mut predicate = FilterPredicate::default();
        let mut issues = Vec::new();

        let object = match value {
            Value::Null => return (predicate, issues),
            Value::Object(object) => object,
            _ => {
                issues.push(FilterIssue::NotAnObject);
                return (predicate, issues);
            }
        };

        for (raw_key, raw_value) in object {
            if raw_value.is_null() {
                continue;
            }
            let key = raw_key.trim().to_lowercase();
            match key.as_str() {
                "category" => {
                    predicate.category =
                        parse_term(&key, raw_value, schema.categories.as_ref(), &mut issues);
                }
                "color" => {
                    predicate.color =
                        parse_term(&key, raw_value, schema.colors.as_ref(), &mut issues);
                }
                "price" => match parse_price(raw_value) {
                    Ok(price) => predicate.price = Some(price),
                    Err(reason) => issues.push(FilterIssue::InvalidValue { key, reason }),
                },
                _ => issues.push(FilterIssue::UnknownKey(raw_key.clone())),
            }
        }

        (predicate, issues)
    }

    /// Keep what validates, drop the rest.
    pub fn from_json_lenient(value: &Value, schema: &FilterSchema) -> Self {
        let (predicate, issues) = Self::parse(value, schema);
        for issue in &issues {
            tracing::debug!("Dropping filter field: {}", issue);
        }
        predicate
    }

    /// Reject the whole filter if any field fails validation.
    pub fn from_json_strict(value: &Value, schema: &FilterSchema) -> Result<Self> {
        let (predicate, issues) = Self::parse(value, schema);
        if issues.is_empty() {
            return Ok(predicate);
        }
        let reasons: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
        Err(Error::InvalidArgument(format!(
            "malformed filter: {}",
            reasons.join("; ")
        )))
    }

    /// Wire-format JSON.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        if let Some(category) = &self.category {
            object.insert("category".into(), json!(category));
        }
        if let Some(color) = &self.color {
            object.insert("color".into(), json!(color));
        }
        if let Some(price) = &self.price {
            let mut comparison = Map::new();
            comparison.insert(
                format!("${}", price.comparator.as_str()),
                json!(price.threshold),
            );
            object.insert("price".into(), Value::Object(comparison));
        }
        Value::Object(object)
    }
}

fn parse_term(
    key: &str,
    value: &Value,
    vocabulary: Option<&BTreeSet<String>>,
    issues: &mut Vec<FilterIssue>,
) -> Option<String> {
    let Some(text) = value.as_str() else {
        issues.push(FilterIssue::InvalidValue {
            key: key.to_string(),
            reason: "expected a string".into(),
        });
        return None;
    };
    let term = normalize(text);
    if term.is_empty() {
        issues.push(FilterIssue::InvalidValue {
            key: key.to_string(),
            reason: "empty string".into(),
        });
        return None;
    }
    if let Some(vocabulary) = vocabulary {
        if !vocabulary.contains(&term) {
            issues.push(FilterIssue::UnknownValue {
                key: key.to_string(),
                value: term,
            });
            return None;
        }
    }
    Some(term)
}

fn parse_price(value: &Value) -> std::result::Result<PriceFilter, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "expected an object like {\"$lt\": 300}".to_string())?;
    if object.len() != 1 {
        return Err(format!(
            "expected exactly one comparator, found {}",
            object.len()
        ));
    }
    let (op, threshold) = object
        .iter()
        .next()
        .ok_or_else(|| "missing comparator".to_string())?;
    let comparator =
        Comparator::parse(op).ok_or_else(|| format!("unknown comparator '{}'", op))?;
    let threshold = match threshold {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').parse::<f64>().ok(),
        _ => None,
    }
    .filter(|t| t.is_finite())
    .ok_or_else(|| format!("threshold {} is not a finite number", threshold))?;

    Ok(PriceFilter {
        comparator,
        threshold,
    })
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for FilterPredicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterPredicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FilterPredicate::from_json_strict(&value, &FilterSchema::open())
            .map_err(serde::de::Error::custom)
    }
}
