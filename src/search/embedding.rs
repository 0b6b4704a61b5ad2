//! Text embedding providers.
//!
//! [`EmbeddingService`] runs a local FastEmbed ONNX model. The same instance
//! must embed both the catalog (at index time) and the queries; vectors from
//! different models live in unrelated spaces.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use moka::future::Cache;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{DEFAULT_MODEL, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Dense embedding vector.
pub type Embedding = Vec<f32>;

/// Converts text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded in the index snapshot.
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed several texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Settings for [`EmbeddingService`].
#[derive(Debug, Clone)]
pub struct EmbeddingServiceConfig {
    /// Model name, e.g. "all-MiniLM-L6-v2"
    pub model: String,
    /// Model download cache
    pub cache_dir: Option<PathBuf>,
    /// Show download progress
    pub show_download_progress: bool,
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            cache_dir: None,
            show_download_progress: false,
        }
    }
}

impl From<&EmbeddingConfig> for EmbeddingServiceConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            model: config.model.clone(),
            cache_dir: config.cache_dir.clone(),
            show_download_progress: config.show_download_progress,
        }
    }
}

/// Map a configured model name onto a FastEmbed model and its dimension.
fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    match name.trim().to_lowercase().as_str() {
        "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
            Ok((EmbeddingModel::AllMiniLML6V2, EMBEDDING_DIM))
        }
        "all-minilm-l12-v2" | "sentence-transformers/all-minilm-l12-v2" => {
            Ok((EmbeddingModel::AllMiniLML12V2, EMBEDDING_DIM))
        }
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => {
            Ok((EmbeddingModel::BGESmallENV15, EMBEDDING_DIM))
        }
        other => Err(Error::Config(format!(
            "unsupported embedding model '{}' (expected all-MiniLM-L6-v2, all-MiniLM-L12-v2 or bge-small-en-v1.5)",
            other
        ))),
    }
}

/// Local FastEmbed embedding model.
///
/// Inference is CPU-bound, so every call runs on the blocking thread pool.
pub struct EmbeddingService {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
}

impl EmbeddingService {
    /// Load the default model (downloads ~90MB on first use).
    pub fn new() -> Result<Self> {
        Self::with_config(EmbeddingServiceConfig::default())
    }

    /// Load the configured model.
    pub fn with_config(config: EmbeddingServiceConfig) -> Result<Self> {
        let (model, dimension) = resolve_model(&config.model)?;
        let mut options =
            InitOptions::new(model).with_show_download_progress(config.show_download_progress);
        if let Some(dir) = config.cache_dir {
            options = options.with_cache_dir(dir);
        }

        info!("Loading embedding model {}", config.model);
        let embedding = TextEmbedding::try_new(options).map_err(|e| {
            Error::external("embedding", format!("failed to load '{}': {}", config.model, e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            model_name: config.model,
            dimension,
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        let model = Arc::clone(&self.model);
        let expected = texts.len();
        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| Error::external("embedding", "model lock poisoned"))?;
            guard
                .embed(texts, None)
                .map_err(|e| Error::external("embedding", e))
        })
        .await
        .map_err(|e| Error::external("embedding", e))??;

        if vectors.len() != expected {
            return Err(Error::external(
                "embedding",
                format!("model returned {} vectors for {} inputs", vectors.len(), expected),
            ));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.run(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::external("embedding", "empty model output"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts.to_vec()).await
    }
}

/// Memoizes embeddings of repeated texts (queries in evaluation runs).
pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache<String, Arc<Embedding>>,
}

impl CachingEmbedder {
    /// Wrap an embedder with a cache of `capacity` entries.
    pub fn new(inner: Arc<dyn Embedder>, capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::new(capacity),
        }
    }

    /// Number of cached entries (approximate until pending tasks run).
    pub fn cached_entries(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl Embedder for CachingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        if let Some(hit) = self.cache.get(text).await {
            debug!("embedding cache hit");
            return Ok(hit.as_ref().clone());
        }
        let vector = self.inner.embed(text).await?;
        self.cache
            .insert(text.to_string(), Arc::new(vector.clone()))
            .await;
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.inner.embed_batch(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[test]
    fn test_resolve_known_models() {
        let (_, dim) = resolve_model("all-MiniLM-L6-v2").unwrap();
        assert_eq!(dim, EMBEDDING_DIM);
        assert!(resolve_model("BAAI/bge-small-en-v1.5").is_ok());
    }

    #[test]
    fn test_resolve_unknown_model_is_config_error() {
        assert!(matches!(resolve_model("word2vec"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_caching_embedder_reuses_vectors() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachingEmbedder::new(inner.clone(), 16);

        let first = cached.embed("red shoes").await.unwrap();
        let second = cached.embed("red shoes").await.unwrap();
        let _other = cached.embed("blue chair").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.model_name(), "counting");
    }
}
