//! Evaluation report and its renderings.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::metrics::{AggregateMetrics, QueryMetrics};
use super::Strategy;
use crate::error::Result;
use crate::search::FilterPredicate;

/// Outcome of one evaluated query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEvaluation {
    pub query: String,
    /// Query-type label
    pub category: String,
    /// Filter used for retrieval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterPredicate>,
    pub filter_relaxed: bool,
    pub expected: Vec<String>,
    pub predicted: Vec<String>,
    pub metrics: QueryMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated results of an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub strategy: Strategy,
    pub top_k: usize,
    pub overall: AggregateMetrics,
    /// Keyed by query-type label
    pub by_category: BTreeMap<String, AggregateMetrics>,
    pub queries: Vec<QueryEvaluation>,
}

impl EvaluationReport {
    /// Assemble a report, computing the aggregates.
    pub fn new(strategy: Strategy, top_k: usize, queries: Vec<QueryEvaluation>) -> Self {
        let overall = AggregateMetrics::from_queries(
            queries.iter().map(|q| (&q.metrics, q.error.is_some())),
        );

        let mut groups: BTreeMap<&str, Vec<&QueryEvaluation>> = BTreeMap::new();
        for query in &queries {
            groups.entry(query.category.as_str()).or_default().push(query);
        }
        let by_category = groups
            .into_iter()
            .map(|(category, group)| {
                let aggregate = AggregateMetrics::from_queries(
                    group.iter().map(|q| (&q.metrics, q.error.is_some())),
                );
                (category.to_string(), aggregate)
            })
            .collect();

        Self {
            strategy,
            top_k,
            overall,
            by_category,
            queries,
        }
    }

    /// Up to `n` queries with the highest F1, ties in input order.
    pub fn best(&self, n: usize) -> Vec<&QueryEvaluation> {
        let mut scored = self.scored();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(n).map(|(_, q)| q).collect()
    }

    /// Up to `n` queries with the lowest F1, ties in input order.
    pub fn worst(&self, n: usize) -> Vec<&QueryEvaluation> {
        let mut scored = self.scored();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.into_iter().take(n).map(|(_, q)| q).collect()
    }

    fn scored(&self) -> Vec<(f64, &QueryEvaluation)> {
        self.queries
            .iter()
            .filter_map(|q| q.metrics.f1.map(|f1| (f1, q)))
            .collect()
    }

    /// Print a plain-text summary to stdout.
    pub fn render_summary(&self) {
        println!("--- {} evaluation (top_k = {}) ---", self.strategy, self.top_k);
        println!("queries: {}", self.overall.queries);
        if self.overall.failed > 0 {
            println!("failed queries: {}", self.overall.failed);
        }
        print_aggregate(&self.overall);

        println!();
        println!("--- By query type ---");
        for (category, aggregate) in &self.by_category {
            println!(
                "{:20} F1: {} (n={})",
                category,
                percent(aggregate.f1),
                aggregate.queries
            );
        }

        println!();
        println!("--- Best queries ---");
        for query in self.best(3) {
            println!("+ {:45} F1: {}", query.query, percent(query.metrics.f1));
        }

        println!();
        println!("--- Worst queries ---");
        for query in self.worst(3) {
            println!("- {:45} F1: {}", query.query, percent(query.metrics.f1));
            println!("  expected: {:?}", query.expected);
            println!("  got:      {:?}", query.predicted);
            if let Some(filter) = &query.filter {
                if !filter.is_empty() {
                    println!("  filter:   {}", filter);
                }
            }
            if let Some(error) = &query.error {
                println!("  error:    {}", error);
            }
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

fn print_aggregate(aggregate: &AggregateMetrics) {
    println!("mean precision: {}", percent(Some(aggregate.precision)));
    println!(
        "mean recall: {} (over {} queries)",
        percent(aggregate.recall),
        aggregate.recall_queries
    );
    println!("mean F1: {}", percent(aggregate.f1));
}

fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}%", v * 100.0),
        None => "n/a".to_string(),
    }
}
