//! Hybrid search: metadata filtering followed by semantic ranking.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::index::rank_order;
use super::{Embedder, FilterPredicate, IndexSnapshot, Modality};
use crate::catalog::ProductRecord;
use crate::error::{Error, Result};

/// A ranked product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Matched product
    pub record: Arc<ProductRecord>,
    /// Best similarity across the searched modalities, in [0, 1]
    pub score: f32,
    /// 1-based position
    pub rank: usize,
    /// Modality that produced `score`
    pub modality: Modality,
}

/// Results of one search call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    /// Filter that was requested
    pub filter: FilterPredicate,
    /// The filter matched nothing rankable and ranking ran over the whole catalog
    pub filter_relaxed: bool,
    /// Products eligible for ranking
    pub candidate_count: usize,
    pub results: Vec<SearchResult>,
}

impl SearchOutcome {
    /// Result ids in rank order.
    pub fn ids(&self) -> Vec<String> {
        self.results.iter().map(|r| r.record.id.clone()).collect()
    }
}

/// Hybrid search over an immutable index snapshot.
pub struct HybridSearch {
    snapshot: IndexSnapshot,
    embedder: Arc<dyn Embedder>,
}

impl HybridSearch {
    /// `embedder` must be the one that built `snapshot`.
    pub fn new(snapshot: IndexSnapshot, embedder: Arc<dyn Embedder>) -> Self {
        Self { snapshot, embedder }
    }

    pub fn snapshot(&self) -> &IndexSnapshot {
        &self.snapshot
    }

    /// Rank catalog products for `query`.
    ///
    /// Products are first narrowed by `filter`. If nothing matches, or no
    /// match has a vector in `modalities`, the filter is relaxed to the
    /// whole catalog and the outcome is flagged. Per product the best score
    /// over `modalities` is kept.
    pub async fn search(
        &self,
        query: &str,
        filter: &FilterPredicate,
        k: usize,
        modalities: &[Modality],
    ) -> Result<SearchOutcome> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        let mut modalities: Vec<Modality> = modalities.to_vec();
        modalities.sort();
        modalities.dedup();
        if modalities.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one modality (text, image) must be searched".into(),
            ));
        }
        filter.validate()?;

        let store = self.snapshot.store();
        let mut candidates = if filter.is_empty() {
            None
        } else {
            let matched: HashSet<String> = filter
                .apply(store.records())
                .into_iter()
                .map(|r| r.id.clone())
                .collect();
            if matched.is_empty() {
                warn!(
                    "Filter {} matched no products, searching the full catalog",
                    filter
                );
                None
            } else {
                Some(matched)
            }
        };
        let mut filter_relaxed = !filter.is_empty() && candidates.is_none();
        debug!(
            "Ranking {} candidates over {:?} for query {:?}",
            candidates.as_ref().map_or(store.len(), |c| c.len()),
            modalities,
            query
        );

        let vector = self.embedder.embed(query).await?;
        if vector.len() != self.snapshot.dimension() {
            return Err(Error::DataIntegrity(format!(
                "query embedding has dimension {}, index expects {}",
                vector.len(),
                self.snapshot.dimension()
            )));
        }

        let mut best = self
            .best_scores(&vector, &modalities, candidates.as_ref(), k)
            .await?;
        if best.is_empty() && candidates.is_some() {
            warn!(
                "Filter {} matched only products without {:?} vectors, searching the full catalog",
                filter, modalities
            );
            candidates = None;
            filter_relaxed = true;
            best = self.best_scores(&vector, &modalities, None, k).await?;
        }
        if filter_relaxed {
            metrics::counter!("search_filter_relaxed_total").increment(1);
        }
        let candidate_count = candidates.as_ref().map_or(store.len(), |c| c.len());

        let mut ranked = Vec::with_capacity(best.len());
        for (id, (score, modality)) in best {
            let record = store.get(&id).cloned().ok_or_else(|| {
                Error::DataIntegrity(format!(
                    "{} index references unknown product '{}'",
                    modality, id
                ))
            })?;
            ranked.push((record, score, modality));
        }
        ranked.sort_by(|a, b| rank_order(a.1, &a.0.id, b.1, &b.0.id));
        ranked.truncate(k);

        let results = ranked
            .into_iter()
            .enumerate()
            .map(|(idx, (record, score, modality))| SearchResult {
                record,
                score,
                rank: idx + 1,
                modality,
            })
            .collect();

        Ok(SearchOutcome {
            query: query.to_string(),
            filter: filter.clone(),
            filter_relaxed,
            candidate_count,
            results,
        })
    }

    /// Best score and its modality per product, each modality queried for `k` hits.
    async fn best_scores(
        &self,
        vector: &[f32],
        modalities: &[Modality],
        candidates: Option<&HashSet<String>>,
        k: usize,
    ) -> Result<HashMap<String, (f32, Modality)>> {
        let mut best: HashMap<String, (f32, Modality)> = HashMap::new();
        for &modality in modalities {
            let hits = self
                .snapshot
                .index()
                .query(vector, modality, candidates, k)
                .await?;
            for hit in hits {
                let entry = best.entry(hit.record_id).or_insert((hit.score, modality));
                if hit.score > entry.0 {
                    *entry = (hit.score, modality);
                }
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetadataStore;
    use crate::search::{Comparator, EmbeddingVector, IndexStats, MemoryVectorIndex, VectorIndex};
    use async_trait::async_trait;

    /// Maps known query strings to fixed vectors.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        fn model_name(&self) -> &str {
            "table"
        }

        fn dimension(&self) -> usize {
            3
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| Error::external("embedding", format!("no vector for {:?}", text)))
        }
    }

    fn record(id: &str, category: &str, color: &str, price: f64) -> ProductRecord {
        ProductRecord {
            id: id.to_string(),
            name: id.to_string(),
            category: category.to_string(),
            color: color.to_string(),
            price,
            description: String::new(),
            image_ref: None,
        }
    }

    fn text(id: &str, values: [f32; 3]) -> EmbeddingVector {
        EmbeddingVector {
            record_id: id.to_string(),
            modality: Modality::Text,
            values: values.to_vec(),
        }
    }

    fn image(id: &str, values: [f32; 3]) -> EmbeddingVector {
        EmbeddingVector {
            record_id: id.to_string(),
            modality: Modality::Image,
            values: values.to_vec(),
        }
    }

    async fn engine(vectors: Vec<EmbeddingVector>) -> HybridSearch {
        let store = MetadataStore::from_records(vec![
            record("boots", "footwear", "brown", 150.0),
            record("chair", "furniture", "black", 299.0),
            record("headphones", "electronics", "white", 249.0),
            record("phone", "electronics", "black", 899.0),
            record("sneakers", "footwear", "white", 85.0),
        ])
        .unwrap();
        let mut index = MemoryVectorIndex::new(3);
        index.upsert(vectors).await.unwrap();
        let snapshot = IndexSnapshot::new(
            Arc::new(store),
            Arc::new(index),
            HashMap::new(),
            "table",
            IndexStats::default(),
        );
        let mut table = HashMap::new();
        table.insert("shoes".to_string(), vec![1.0, 0.0, 0.0]);
        table.insert("gadgets".to_string(), vec![0.0, 1.0, 0.0]);
        table.insert("short".to_string(), vec![1.0, 0.0]);
        HybridSearch::new(snapshot, Arc::new(TableEmbedder { table }))
    }

    fn default_vectors() -> Vec<EmbeddingVector> {
        vec![
            text("boots", [0.9, 0.1, 0.0]),
            text("sneakers", [1.0, 0.0, 0.0]),
            text("chair", [0.0, 0.0, 1.0]),
            text("headphones", [0.1, 0.9, 0.0]),
            text("phone", [0.0, 1.0, 0.1]),
            image("chair", [0.95, 0.05, 0.0]),
        ]
    }

    #[tokio::test]
    async fn test_rejects_zero_k_and_missing_modalities() {
        let search = engine(default_vectors()).await;
        let filter = FilterPredicate::default();

        let err = search.search("shoes", &filter, 0, &Modality::ALL).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = search.search("shoes", &filter, 3, &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_malformed_filter_is_rejected_not_relaxed() {
        let search = engine(default_vectors()).await;

        let blank = FilterPredicate::new().with_category("   ");
        let err = search.search("shoes", &blank, 3, &Modality::ALL).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let nan = FilterPredicate::new().with_price(Comparator::Lt, f64::NAN);
        let err = search.search("shoes", &nan, 3, &Modality::ALL).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_filter_without_vectors_in_modality_is_relaxed() {
        let search = engine(vec![
            text("chair", [0.0, 0.0, 1.0]),
            text("phone", [0.0, 1.0, 0.1]),
            image("boots", [1.0, 0.0, 0.0]),
        ])
        .await;
        let filter = FilterPredicate::new().with_category("footwear");

        // Footwear only has an image vector.
        let text_only = search.search("shoes", &filter, 3, &[Modality::Text]).await.unwrap();
        assert!(text_only.filter_relaxed);
        assert_eq!(text_only.candidate_count, 5);
        assert_eq!(text_only.results.len(), 2);

        let both = search.search("shoes", &filter, 3, &Modality::ALL).await.unwrap();
        assert!(!both.filter_relaxed);
        assert_eq!(both.candidate_count, 2);
        assert_eq!(both.ids(), vec!["boots"]);
    }

    #[tokio::test]
    async fn test_filter_restricts_candidates() {
        let search = engine(default_vectors()).await;
        let filter = FilterPredicate::new().with_category("electronics");

        let outcome = search.search("shoes", &filter, 5, &Modality::ALL).await.unwrap();
        assert!(!outcome.filter_relaxed);
        assert_eq!(outcome.candidate_count, 2);
        let ids = outcome.ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id == "headphones" || id == "phone"));
    }

    #[tokio::test]
    async fn test_over_specific_filter_is_relaxed() {
        let search = engine(default_vectors()).await;
        let filter = FilterPredicate::new().with_color("purple");

        let outcome = search.search("shoes", &filter, 3, &Modality::ALL).await.unwrap();
        assert!(outcome.filter_relaxed);
        assert_eq!(outcome.candidate_count, 5);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.filter, filter);

        let unfiltered = search
            .search("shoes", &FilterPredicate::default(), 3, &Modality::ALL)
            .await
            .unwrap();
        assert!(!unfiltered.filter_relaxed);
        assert_eq!(unfiltered.ids(), outcome.ids());
    }

    #[tokio::test]
    async fn test_merges_modalities_by_max_score() {
        let search = engine(default_vectors()).await;
        let filter = FilterPredicate::default();

        // The chair only looks like shoes in its image description.
        let text_only = search.search("shoes", &filter, 5, &[Modality::Text]).await.unwrap();
        let both = search.search("shoes", &filter, 3, &Modality::ALL).await.unwrap();

        assert!(!text_only.ids()[..3].contains(&"chair".to_string()));
        let chair = both.results.iter().find(|r| r.record.id == "chair").unwrap();
        assert_eq!(chair.modality, Modality::Image);
        assert_eq!(both.ids(), vec!["sneakers", "chair", "boots"]);
    }

    #[tokio::test]
    async fn test_results_are_sorted_ranked_and_deterministic() {
        let search = engine(default_vectors()).await;
        let filter = FilterPredicate::default();

        let first = search.search("gadgets", &filter, 5, &Modality::ALL).await.unwrap();
        let second = search.search("gadgets", &filter, 5, &Modality::ALL).await.unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        for pair in first.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                assert!(pair[0].record.id < pair[1].record.id);
            }
        }
        let ranks: Vec<usize> = first.results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=first.results.len()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_ties_break_by_id() {
        let search = engine(vec![
            text("sneakers", [1.0, 0.0, 0.0]),
            text("boots", [1.0, 0.0, 0.0]),
        ])
        .await;
        let outcome = search
            .search("shoes", &FilterPredicate::default(), 2, &[Modality::Text])
            .await
            .unwrap();
        assert_eq!(outcome.ids(), vec!["boots", "sneakers"]);
    }

    #[tokio::test]
    async fn test_empty_modality_does_not_abort_other() {
        let search = engine(vec![text("boots", [1.0, 0.0, 0.0])]).await;
        let outcome = search
            .search("shoes", &FilterPredicate::default(), 3, &[Modality::Image, Modality::Text])
            .await
            .unwrap();
        assert_eq!(outcome.ids(), vec!["boots"]);

        let images = search
            .search("shoes", &FilterPredicate::default(), 3, &[Modality::Image])
            .await
            .unwrap();
        assert!(images.results.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_record_in_index_is_integrity_error() {
        let search = engine(vec![text("ghost", [1.0, 0.0, 0.0])]).await;
        let err = search
            .search("shoes", &FilterPredicate::default(), 3, &[Modality::Text])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_is_integrity_error() {
        let search = engine(default_vectors()).await;
        let err = search
            .search("short", &FilterPredicate::default(), 3, &Modality::ALL)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }
}
