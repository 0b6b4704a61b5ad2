//! Pipeline configuration.
//!
//! Loaded from a TOML file (see `mmrag init`). Every section has defaults so a
//! partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::search::{Modality, DEFAULT_MODEL};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Product catalog location
    pub catalog: CatalogConfig,
    /// Embedding model settings
    pub embedding: EmbeddingConfig,
    /// Vector index backend
    pub index: IndexConfig,
    /// Language-model collaborators
    pub llm: LlmConfig,
    /// Query-time defaults
    pub search: SearchConfig,
    /// Index build settings
    pub indexing: IndexingConfig,
    /// Evaluation inputs and outputs
    pub evaluation: EvaluationConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: RagConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.search.top_k == 0 {
            return Err(Error::Config("search.top_k must be at least 1".into()));
        }
        if self.search.modalities.is_empty() {
            return Err(Error::Config(
                "search.modalities must name at least one of text, image".into(),
            ));
        }
        if self.indexing.concurrency == 0 {
            return Err(Error::Config("indexing.concurrency must be at least 1".into()));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(Error::Config("embedding.model must not be empty".into()));
        }
        Ok(())
    }
}

/// Where the product metadata and images live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON metadata file keyed by product id
    pub metadata_path: PathBuf,
    /// Directory that relative image references resolve against
    pub images_dir: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("data/descriptions.json"),
            images_dir: PathBuf::from("images"),
        }
    }
}

/// Embedding model settings.
///
/// One model serves both indexing and querying; vectors from different
/// models are not comparable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name (e.g. "all-MiniLM-L6-v2")
    pub model: String,
    /// Where downloaded model files are cached
    pub cache_dir: Option<PathBuf>,
    /// Show a progress bar while downloading the model
    pub show_download_progress: bool,
    /// Query embedding cache size (0 disables the cache)
    pub query_cache_capacity: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            cache_dir: None,
            show_download_progress: false,
            query_cache_capacity: 1024,
        }
    }
}

/// Vector index backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Brute-force in-process index
    #[default]
    Memory,
    /// Remote Qdrant collections
    Qdrant,
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Which backend to build
    pub backend: IndexBackend,
    /// Qdrant gRPC endpoint
    pub qdrant_url: String,
    /// Environment variable holding the Qdrant API key, if any
    pub qdrant_api_key_env: Option<String>,
    /// Prefix for the per-modality collection names
    pub collection_prefix: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_api_key_env: None,
            collection_prefix: "products".to_string(),
        }
    }
}

/// OpenAI-compatible language-model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API base URL
    pub api_base: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Model used to extract filters from queries
    pub extraction_model: String,
    /// Model used to describe product images
    pub vision_model: String,
    /// Model used to answer questions
    pub answer_model: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Token limit for filter extraction
    pub extraction_max_tokens: usize,
    /// Token limit for image descriptions
    pub vision_max_tokens: usize,
    /// Token limit for answers
    pub answer_max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            extraction_model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o".to_string(),
            answer_model: "gpt-4o".to_string(),
            timeout_secs: 60,
            extraction_max_tokens: 150,
            vision_max_tokens: 200,
            answer_max_tokens: 500,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "environment variable {} is not set",
                    self.api_key_env
                ))
            })
    }
}

/// Query-time defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results per query
    pub top_k: usize,
    /// Modalities searched by default
    pub modalities: Vec<Modality>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            modalities: vec![Modality::Text, Modality::Image],
        }
    }
}

/// Index build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Products processed concurrently
    pub concurrency: usize,
    /// Call the vision model for product images
    pub describe_images: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            describe_images: true,
        }
    }
}

/// Evaluation inputs and outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Labelled query set
    pub cases_path: PathBuf,
    /// Where the JSON report is written
    pub report_path: PathBuf,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            cases_path: PathBuf::from("data/eval_cases.json"),
            report_path: PathBuf::from("eval_results.json"),
        }
    }
}
