//! Retrieval evaluation against a labelled query set.
//!
//! Each case lists the product ids that should come back for a query. A
//! [`Retriever`] runs the query under one [`Strategy`]; predictions are
//! scored with set precision, recall and F1 and averaged overall and per
//! query type.

mod metrics;
mod report;

pub use metrics::{score_query, AggregateMetrics, QueryMetrics};
pub use report::{EvaluationReport, QueryEvaluation};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::search::{FilterPredicate, FilterSchema, SearchOutcome};

/// How a query is turned into a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Semantic ranking only
    Baseline,
    /// Ranking restricted by the case's manual filter
    Hybrid,
    /// Ranking restricted by a filter extracted from the query
    Smart,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Baseline => "baseline",
            Strategy::Hybrid => "hybrid",
            Strategy::Smart => "smart",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A labelled query.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalCase {
    pub query: String,
    /// Relevant product ids
    pub expected_items: Vec<String>,
    /// Query-type label, e.g. "color + category"
    pub category: String,
    /// Manual filter for the hybrid strategy
    pub filters: Option<FilterPredicate>,
}

#[derive(Deserialize)]
struct RawCase {
    query: String,
    #[serde(default)]
    expected_items: Vec<String>,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    filters: Option<Value>,
}

fn default_category() -> String {
    "uncategorized".to_string()
}

/// Parse a JSON array of cases. Manual filters are validated strictly.
pub fn parse_cases(raw: &str) -> Result<Vec<EvalCase>> {
    let raw_cases: Vec<RawCase> = serde_json::from_str(raw)?;
    raw_cases
        .into_iter()
        .enumerate()
        .map(|(i, case)| {
            if case.query.trim().is_empty() {
                return Err(Error::InvalidArgument(format!("case {} has an empty query", i + 1)));
            }
            let filters = match case.filters {
                None | Some(Value::Null) => None,
                Some(value) => Some(
                    FilterPredicate::from_json_strict(&value, &FilterSchema::open()).map_err(
                        |e| Error::InvalidArgument(format!("case {} ({:?}): {}", i + 1, case.query, e)),
                    )?,
                ),
            };
            Ok(EvalCase {
                query: case.query,
                expected_items: case.expected_items,
                category: case.category,
                filters,
            })
        })
        .collect()
}

/// Load cases from a JSON file.
pub fn load_cases(path: impl AsRef<Path>) -> Result<Vec<EvalCase>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    parse_cases(&raw)
}

/// Runs an evaluation case through the search pipeline.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Strategy this retriever applies.
    fn strategy(&self) -> Strategy;

    /// Top-`k` results for `case`.
    async fn retrieve(&self, case: &EvalCase, k: usize) -> Result<SearchOutcome>;
}

/// Score every case with `retriever`.
///
/// A case whose retrieval fails with an external-service error is recorded
/// with an empty prediction; any other error aborts the run.
pub async fn evaluate(
    cases: &[EvalCase],
    retriever: &dyn Retriever,
    k: usize,
) -> Result<EvaluationReport> {
    if k == 0 {
        return Err(Error::InvalidArgument("k must be at least 1".into()));
    }
    if cases.is_empty() {
        return Err(Error::InvalidArgument("no evaluation cases".into()));
    }
    let strategy = retriever.strategy();
    info!("Evaluating {} cases with the {} strategy", cases.len(), strategy);

    let mut queries = Vec::with_capacity(cases.len());
    for (i, case) in cases.iter().enumerate() {
        let (predicted, filter, filter_relaxed, error) = match retriever.retrieve(case, k).await {
            Ok(outcome) => {
                let mut ids = outcome.ids();
                ids.truncate(k);
                (ids, Some(outcome.filter), outcome.filter_relaxed, None)
            }
            Err(e) if e.is_recoverable() => {
                warn!("Case {} ({:?}) failed: {}", i + 1, case.query, e);
                (Vec::new(), None, false, Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };
        let metrics = score_query(&predicted, &case.expected_items);
        tracing::debug!(
            "[{}/{}] {:?}: predicted {:?}, precision {:.2}",
            i + 1,
            cases.len(),
            case.query,
            predicted,
            metrics.precision
        );
        queries.push(QueryEvaluation {
            query: case.query.clone(),
            category: case.category.clone(),
            filter,
            filter_relaxed,
            expected: case.expected_items.clone(),
            predicted,
            metrics,
            error,
        });
    }

    Ok(EvaluationReport::new(strategy, k, queries))
}
