//! Retrieval quality metrics.

use serde::Serialize;
use std::collections::BTreeSet;

/// Set-based scores for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetrics {
    pub precision: f64,
    /// Absent when the query has no relevant items
    pub recall: Option<f64>,
    /// Absent when recall is absent
    pub f1: Option<f64>,
    #[serde(rename = "tp")]
    pub true_positives: usize,
    #[serde(rename = "fp")]
    pub false_positives: usize,
    #[serde(rename = "fn")]
    pub false_negatives: usize,
}

/// Score predicted ids against the relevant set. Duplicates are ignored.
pub fn score_query(predicted: &[String], truth: &[String]) -> QueryMetrics {
    let predicted: BTreeSet<&str> = predicted.iter().map(String::as_str).collect();
    let truth: BTreeSet<&str> = truth.iter().map(String::as_str).collect();

    let tp = predicted.intersection(&truth).count();
    let fp = predicted.len() - tp;
    let fn_ = truth.len() - tp;

    let precision = if predicted.is_empty() {
        0.0
    } else {
        tp as f64 / predicted.len() as f64
    };
    let recall = (!truth.is_empty()).then(|| tp as f64 / truth.len() as f64);
    let f1 = recall.map(|recall| {
        if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        }
    });

    QueryMetrics {
        precision,
        recall,
        f1,
        true_positives: tp,
        false_positives: fp,
        false_negatives: fn_,
    }
}

/// Mean scores over a group of queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateMetrics {
    /// Queries in the group
    pub queries: usize,
    /// Queries whose retrieval failed
    pub failed: usize,
    pub precision: f64,
    /// Mean over queries with a defined recall
    pub recall: Option<f64>,
    /// Mean over queries with a defined F1
    pub f1: Option<f64>,
    /// Queries contributing to `recall` and `f1`
    pub recall_queries: usize,
}

impl AggregateMetrics {
    /// Aggregate `(metrics, failed)` pairs.
    pub fn from_queries<'a>(items: impl IntoIterator<Item = (&'a QueryMetrics, bool)>) -> Self {
        let mut queries = 0;
        let mut failed = 0;
        let mut precision_sum = 0.0;
        let mut recall_sum = 0.0;
        let mut recall_queries = 0;
        let mut f1_sum = 0.0;
        let mut f1_queries = 0;

        for (metrics, did_fail) in items {
            queries += 1;
            failed += usize::from(did_fail);
            precision_sum += metrics.precision;
            if let Some(recall) = metrics.recall {
                recall_sum += recall;
                recall_queries += 1;
            }
            if let Some(f1) = metrics.f1 {
                f1_sum += f1;
                f1_queries += 1;
            }
        }

        Self {
            queries,
            failed,
            precision: if queries == 0 {
                0.0
            } else {
                precision_sum / queries as f64
            },
            recall: mean(recall_sum, recall_queries),
            f1: mean(f1_sum, f1_queries),
            recall_queries,
        }
    }
}

fn mean(sum: f64, count: usize) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}
