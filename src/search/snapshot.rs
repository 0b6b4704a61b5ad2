//! Immutable index snapshot shared by search and evaluation.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::VectorIndex;
use crate::catalog::MetadataStore;

/// Counters reported by an index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Products in the catalog
    pub products: usize,
    /// Text vectors committed
    pub text_indexed: usize,
    /// Image-description vectors committed
    pub image_indexed: usize,
    /// Products whose text embedding failed
    pub text_skipped: usize,
    /// Images whose description or embedding failed
    pub images_skipped: usize,
}

/// Metadata store, vector index and image descriptions frozen after indexing.
///
/// Cheap to clone; nothing inside is mutable, so concurrent queries need no
/// locking.
#[derive(Clone)]
pub struct IndexSnapshot {
    store: Arc<MetadataStore>,
    index: Arc<dyn VectorIndex>,
    visual_descriptions: Arc<HashMap<String, String>>,
    embedding_model: String,
    stats: IndexStats,
}

impl IndexSnapshot {
    pub fn new(
        store: Arc<MetadataStore>,
        index: Arc<dyn VectorIndex>,
        visual_descriptions: HashMap<String, String>,
        embedding_model: impl Into<String>,
        stats: IndexStats,
    ) -> Self {
        Self {
            store,
            index,
            visual_descriptions: Arc::new(visual_descriptions),
            embedding_model: embedding_model.into(),
            stats,
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// Vector length of the index.
    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Vision-model description of a product image, if one was indexed.
    pub fn visual_description(&self, record_id: &str) -> Option<&str> {
        self.visual_descriptions.get(record_id).map(String::as_str)
    }

    /// Model that produced the stored vectors.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }
}
