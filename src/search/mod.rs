//! Hybrid product search.
//!
//! Combines exact metadata filtering with semantic similarity over two
//! embedding spaces:
//! - FastEmbed for embedding generation (ONNX-based, lightweight)
//! - An in-memory or Qdrant vector index per modality
//! - Structured filters applied before ranking, relaxed when over-specific
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │   Query text    │────▶│ EmbeddingService │
//! └────────┬────────┘     │   (FastEmbed)   │
//!          │              └────────┬────────┘
//!          ▼                       ▼
//! ┌─────────────────┐      ┌──────────────┐
//! │ FilterPredicate │      │  Embedding   │
//! │ (category/color/│      │  [f32; 384]  │
//! │     price)      │      └──────┬───────┘
//! └────────┬────────┘             │
//!          ▼              ┌───────┴────────┐
//! ┌─────────────────┐     ▼                ▼
//! │  MetadataStore  │ ┌──────────┐   ┌──────────┐
//! │  → candidates   │─▶│   Text   │   │  Image   │
//! └─────────────────┘ │  index   │   │  index   │
//!                     └────┬─────┘   └────┬─────┘
//!                          └──────┬───────┘
//!                                 ▼
//!                         ┌──────────────┐
//!                         │ HybridSearch │
//!                         │  max-merge   │
//!                         │   + top-k    │
//!                         └──────────────┘
//! ```

mod embedding;
mod filter;
mod hybrid;
mod index;
mod qdrant;
mod snapshot;

pub use embedding::{
    CachingEmbedder, Embedder, Embedding, EmbeddingService, EmbeddingServiceConfig,
};
pub use filter::{Comparator, FilterIssue, FilterPredicate, FilterSchema, PriceFilter};
pub use hybrid::{HybridSearch, SearchOutcome, SearchResult};
pub use index::{
    cosine_similarity, normalized_score, EmbeddingVector, MemoryVectorIndex, Modality,
    VectorHit, VectorIndex,
};
pub(crate) use index::check_vector;
pub use qdrant::QdrantVectorIndex;
pub use snapshot::{IndexSnapshot, IndexStats};

/// Default embedding model (all-MiniLM-L6-v2 - 384 dimensions, good balance of speed/quality)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding dimension for the default model
pub const EMBEDDING_DIM: usize = 384;
