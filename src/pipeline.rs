//! End-to-end retrieval pipeline.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::catalog::MetadataStore;
use crate::config::{IndexBackend, RagConfig};
use crate::error::{Error, Result};
use crate::eval::{EvalCase, Retriever, Strategy};
use crate::indexer::Indexer;
use crate::llm::{Answer, AnswerGenerator, FilterExtractor, OpenAiClient};
use crate::search::{
    CachingEmbedder, Embedder, EmbeddingService, FilterPredicate, FilterSchema, HybridSearch,
    IndexSnapshot, MemoryVectorIndex, Modality, QdrantVectorIndex, SearchOutcome, VectorIndex,
};

/// Multi-modal product search with optional language-model features.
pub struct MultiModalRag {
    engine: HybridSearch,
    extractor: Option<FilterExtractor>,
    answerer: Option<AnswerGenerator>,
    top_k: usize,
    modalities: Vec<Modality>,
}

impl MultiModalRag {
    pub fn new(engine: HybridSearch) -> Self {
        Self {
            engine,
            extractor: None,
            answerer: None,
            top_k: 3,
            modalities: Modality::ALL.to_vec(),
        }
    }

    pub fn with_extractor(mut self, extractor: FilterExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_answerer(mut self, answerer: AnswerGenerator) -> Self {
        self.answerer = Some(answerer);
        self
    }

    /// Result count for [`answer_question`](Self::answer_question) and the
    /// modalities every search ranks over.
    pub fn with_defaults(mut self, top_k: usize, modalities: Vec<Modality>) -> Self {
        self.top_k = top_k;
        self.modalities = modalities;
        self
    }

    pub fn snapshot(&self) -> &IndexSnapshot {
        self.engine.snapshot()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn modalities(&self) -> &[Modality] {
        &self.modalities
    }

    /// Whether filter extraction and answering are available.
    pub fn has_language_model(&self) -> bool {
        self.extractor.is_some()
    }

    /// Semantic search without filters.
    #[instrument(name = "search", skip(self), fields(request_id = %Uuid::new_v4()))]
    pub async fn search(&self, query: &str, k: usize) -> Result<SearchOutcome> {
        self.engine
            .search(query, &FilterPredicate::default(), k, &self.modalities)
            .await
    }

    /// Search restricted by a caller-supplied filter.
    #[instrument(name = "hybrid_search", skip(self, filter), fields(request_id = %Uuid::new_v4(), filter = %filter))]
    pub async fn hybrid_search(
        &self,
        query: &str,
        filter: &FilterPredicate,
        k: usize,
    ) -> Result<SearchOutcome> {
        self.engine.search(query, filter, k, &self.modalities).await
    }

    /// Extract a filter from the query, then run a hybrid search.
    #[instrument(name = "smart_search", skip(self), fields(request_id = %Uuid::new_v4()))]
    pub async fn smart_search(&self, query: &str, k: usize) -> Result<SearchOutcome> {
        let extractor = self.extractor.as_ref().ok_or_else(|| {
            Error::Config("smart search needs a language model (set the API key)".into())
        })?;
        let filter = extractor.extract(query).await;
        info!("Extracted filter: {}", filter);
        self.engine.search(query, &filter, k, &self.modalities).await
    }

    /// Answer a question from the top products of a smart search.
    #[instrument(name = "answer_question", skip(self), fields(request_id = %Uuid::new_v4()))]
    pub async fn answer_question(&self, query: &str) -> Result<Answer> {
        let answerer = self.answerer.as_ref().ok_or_else(|| {
            Error::Config("answering needs a language model (set the API key)".into())
        })?;
        let outcome = self.smart_search(query, self.top_k).await?;
        answerer.answer(query, &outcome, self.snapshot()).await
    }

    /// Evaluation adapter running cases under `strategy`.
    pub fn retriever(&self, strategy: Strategy) -> StrategyRetriever<'_> {
        StrategyRetriever {
            rag: self,
            strategy,
        }
    }
}

/// [`Retriever`] over a [`MultiModalRag`].
pub struct StrategyRetriever<'a> {
    rag: &'a MultiModalRag,
    strategy: Strategy,
}

#[async_trait]
impl Retriever for StrategyRetriever<'_> {
    fn strategy(&self) -> Strategy {
        self.strategy
    }

    async fn retrieve(&self, case: &EvalCase, k: usize) -> Result<SearchOutcome> {
        match self.strategy {
            Strategy::Baseline => self.rag.search(&case.query, k).await,
            Strategy::Hybrid => {
                let filter = case.filters.clone().unwrap_or_default();
                self.rag.hybrid_search(&case.query, &filter, k).await
            }
            Strategy::Smart => self.rag.smart_search(&case.query, k).await,
        }
    }
}

/// Load the catalog, build the index and wire the collaborators named in
/// `config`.
///
/// Without an API key the pipeline still serves baseline and manual-filter
/// searches; images are then indexed by text only.
pub async fn build_from_config(config: &RagConfig) -> Result<MultiModalRag> {
    config.validate()?;
    let store = Arc::new(MetadataStore::load(&config.catalog.metadata_path)?);
    info!(
        "Loaded {} products from {}",
        store.len(),
        config.catalog.metadata_path.display()
    );

    let service: Arc<dyn Embedder> =
        Arc::new(EmbeddingService::with_config((&config.embedding).into())?);
    let query_embedder: Arc<dyn Embedder> = if config.embedding.query_cache_capacity > 0 {
        Arc::new(CachingEmbedder::new(
            service.clone(),
            config.embedding.query_cache_capacity,
        ))
    } else {
        service.clone()
    };

    let index = open_index(config, service.dimension()).await?;

    let api_key = match config.llm.api_key() {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("{}; language-model features disabled", e);
            None
        }
    };
    let timeout = Duration::from_secs(config.llm.timeout_secs.max(1));
    let llm_client = |model: &str,
                      max_tokens: usize,
                      service: &'static str|
     -> Result<Option<OpenAiClient>> {
        api_key
            .as_deref()
            .map(|key| {
                OpenAiClient::new(key, &config.llm.api_base, model, max_tokens, timeout)
                    .map(|client| client.with_service_name(service))
            })
            .transpose()
    };

    let mut indexer = Indexer::new(service).with_concurrency(config.indexing.concurrency);
    if config.indexing.describe_images {
        if let Some(vision) =
            llm_client(&config.llm.vision_model, config.llm.vision_max_tokens, "vision")?
        {
            indexer = indexer.with_vision(Arc::new(vision), &config.catalog.images_dir);
        }
    }
    let snapshot = indexer.build(store, index).await?;

    let engine = HybridSearch::new(snapshot, query_embedder);
    let schema = FilterSchema::from_store(engine.snapshot().store());
    let mut rag = MultiModalRag::new(engine)
        .with_defaults(config.search.top_k, config.search.modalities.clone());

    if let Some(extraction) = llm_client(
        &config.llm.extraction_model,
        config.llm.extraction_max_tokens,
        "filter-extraction",
    )? {
        rag = rag.with_extractor(FilterExtractor::new(Arc::new(extraction), schema));
    }
    if let Some(answers) = llm_client(
        &config.llm.answer_model,
        config.llm.answer_max_tokens,
        "answer",
    )? {
        rag = rag.with_answerer(AnswerGenerator::new(Arc::new(answers)));
    }
    Ok(rag)
}

async fn open_index(config: &RagConfig, dimension: usize) -> Result<Box<dyn VectorIndex>> {
    match config.index.backend {
        IndexBackend::Memory => Ok(Box::new(MemoryVectorIndex::new(dimension))),
        IndexBackend::Qdrant => {
            let api_key = config
                .index
                .qdrant_api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            let mut index = QdrantVectorIndex::connect(
                &config.index.qdrant_url,
                api_key,
                config.index.collection_prefix.clone(),
                dimension,
            )?;
            index.recreate_collections().await?;
            info!("Using Qdrant at {}", config.index.qdrant_url);
            Ok(Box::new(index))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProductRecord;
    use crate::error::Error;
    use crate::search::{Embedding, IndexStats};

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            if text.contains("shoe") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    async fn rag() -> MultiModalRag {
        let store = Arc::new(
            MetadataStore::from_records(vec![
                ProductRecord {
                    id: "shoe".into(),
                    name: "Running shoe".into(),
                    category: "footwear".into(),
                    color: "red".into(),
                    price: 120.0,
                    description: "Light".into(),
                    image_ref: None,
                },
                ProductRecord {
                    id: "lamp".into(),
                    name: "Desk lamp".into(),
                    category: "furniture".into(),
                    color: "black".into(),
                    price: 40.0,
                    description: "Bright".into(),
                    image_ref: None,
                },
            ])
            .unwrap(),
        );
        let snapshot = Indexer::new(Arc::new(AxisEmbedder))
            .build(store, Box::new(MemoryVectorIndex::new(2)))
            .await
            .unwrap();
        assert_eq!(
            snapshot.stats(),
            &IndexStats {
                products: 2,
                text_indexed: 2,
                ..IndexStats::default()
            }
        );
        MultiModalRag::new(HybridSearch::new(snapshot, Arc::new(AxisEmbedder)))
            .with_defaults(1, vec![Modality::Text])
    }

    #[tokio::test]
    async fn test_search_and_hybrid_search() {
        let rag = rag().await;
        let outcome = rag.search("shoe please", 2).await.unwrap();
        assert_eq!(outcome.ids(), vec!["shoe", "lamp"]);

        let filter = FilterPredicate::new().with_category("furniture");
        let outcome = rag.hybrid_search("shoe please", &filter, 2).await.unwrap();
        assert_eq!(outcome.ids(), vec!["lamp"]);
        assert!(!outcome.filter_relaxed);
    }

    #[tokio::test]
    async fn test_smart_search_requires_language_model() {
        let rag = rag().await;
        assert!(!rag.has_language_model());
        assert!(matches!(
            rag.smart_search("red shoes", 1).await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            rag.answer_question("red shoes?").await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_strategy_retriever_uses_manual_filter() {
        let rag = rag().await;
        let case = EvalCase {
            query: "shoe".into(),
            expected_items: vec!["lamp".into()],
            category: "category".into(),
            filters: Some(FilterPredicate::new().with_color("black")),
        };

        let baseline = rag.retriever(Strategy::Baseline).retrieve(&case, 1).await.unwrap();
        assert_eq!(baseline.ids(), vec!["shoe"]);

        let hybrid = rag.retriever(Strategy::Hybrid).retrieve(&case, 1).await.unwrap();
        assert_eq!(hybrid.ids(), vec!["lamp"]);
    }
}
