//! Multi-modal product retrieval.
//!
//! Products are described by structured metadata and an image. Both are
//! embedded into a shared vector space (the image through a vision-model
//! description) and queried with optional metadata filters, which can be
//! supplied by the caller or extracted from the query by a language model.
//!
//! Main components:
//! - [`catalog`]: product records and the metadata store
//! - [`search`]: embeddings, vector indexes, filters and hybrid ranking
//! - [`llm`]: filter extraction, image description and answer generation
//! - [`indexer`]: builds the immutable index snapshot
//! - [`eval`]: precision/recall evaluation of search strategies
//! - [`pipeline`]: the [`MultiModalRag`] facade wired from [`RagConfig`]

pub mod catalog;
pub mod config;
pub mod error;
pub mod eval;
pub mod indexer;
pub mod llm;
pub mod pipeline;
pub mod search;

pub use catalog::{MetadataStore, ProductRecord};
pub use config::RagConfig;
pub use error::{Error, Result};
pub use eval::{evaluate, load_cases, EvalCase, EvaluationReport, Retriever, Strategy};
pub use indexer::Indexer;
pub use llm::{Answer, AnswerGenerator, FilterExtractor, LanguageModel, OpenAiClient, VisionDescriber};
pub use pipeline::{build_from_config, MultiModalRag};
pub use search::{
    Embedder, EmbeddingService, FilterPredicate, FilterSchema, HybridSearch, IndexSnapshot,
    MemoryVectorIndex, Modality, SearchOutcome, SearchResult, VectorIndex,
};
