//! Index construction.
//!
//! Embeds every product's text document and, when a vision model is
//! configured, a description of its image. Items are processed concurrently
//! and committed to the vector index in a single exclusive call, after which
//! the index is frozen into an [`IndexSnapshot`].

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{MetadataStore, ProductRecord};
use crate::error::{Error, Result};
use crate::llm::VisionDescriber;
use crate::search::{
    check_vector, Embedder, EmbeddingVector, IndexSnapshot, IndexStats, Modality, VectorIndex,
};

/// Builds an [`IndexSnapshot`] from a catalog.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    vision: Option<Arc<dyn VisionDescriber>>,
    images_dir: PathBuf,
    concurrency: usize,
}

/// Vectors produced for one product.
#[derive(Default)]
struct ItemOutput {
    position: usize,
    text: Option<Vec<f32>>,
    image: Option<(String, Vec<f32>)>,
    text_skipped: bool,
    image_skipped: bool,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            vision: None,
            images_dir: PathBuf::new(),
            concurrency: 4,
        }
    }

    /// Describe product images with `vision`; relative references resolve
    /// against `images_dir`.
    pub fn with_vision(
        mut self,
        vision: Arc<dyn VisionDescriber>,
        images_dir: impl Into<PathBuf>,
    ) -> Self {
        self.vision = Some(vision);
        self.images_dir = images_dir.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Path or URL handed to the vision model.
    pub fn resolve_image(&self, image_ref: &str) -> String {
        if image_ref.starts_with("http://")
            || image_ref.starts_with("https://")
            || Path::new(image_ref).is_absolute()
        {
            return image_ref.to_string();
        }
        self.images_dir.join(image_ref).to_string_lossy().into_owned()
    }

    /// Embed the catalog into `index` and freeze the result.
    ///
    /// Items whose embedding or image description fails are skipped and
    /// counted in [`IndexStats`]. A vector with the wrong dimension aborts
    /// the build.
    pub async fn build(
        &self,
        store: Arc<MetadataStore>,
        mut index: Box<dyn VectorIndex>,
    ) -> Result<IndexSnapshot> {
        let dimension = index.dimension();
        if self.embedder.dimension() != dimension {
            return Err(Error::DataIntegrity(format!(
                "embedder {} produces {} dimensions, index expects {}",
                self.embedder.model_name(),
                self.embedder.dimension(),
                dimension
            )));
        }
        info!(
            "Indexing {} products with {} (concurrency {})",
            store.len(),
            self.embedder.model_name(),
            self.concurrency
        );

        let outputs: Vec<Result<ItemOutput>> = stream::iter(store.records().iter().cloned().enumerate())
            .map(|(position, record)| self.index_record(position, record, dimension))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut items = Vec::with_capacity(outputs.len());
        for output in outputs {
            items.push(output?);
        }
        items.sort_by_key(|item| item.position);

        let mut stats = IndexStats {
            products: store.len(),
            ..IndexStats::default()
        };
        let mut vectors = Vec::new();
        let mut visual_descriptions = HashMap::new();
        for item in items {
            let record_id = &store.records()[item.position].id;
            stats.text_skipped += usize::from(item.text_skipped);
            stats.images_skipped += usize::from(item.image_skipped);
            if let Some(values) = item.text {
                stats.text_indexed += 1;
                vectors.push(EmbeddingVector {
                    record_id: record_id.clone(),
                    modality: Modality::Text,
                    values,
                });
            }
            if let Some((description, values)) = item.image {
                stats.image_indexed += 1;
                visual_descriptions.insert(record_id.clone(), description);
                vectors.push(EmbeddingVector {
                    record_id: record_id.clone(),
                    modality: Modality::Image,
                    values,
                });
            }
        }

        index.upsert(vectors).await?;
        info!(
            "Indexed {} text and {} image vectors ({} text, {} images skipped)",
            stats.text_indexed, stats.image_indexed, stats.text_skipped, stats.images_skipped
        );

        Ok(IndexSnapshot::new(
            store,
            Arc::from(index),
            visual_descriptions,
            self.embedder.model_name(),
            stats,
        ))
    }

    async fn index_record(
        &self,
        position: usize,
        record: Arc<ProductRecord>,
        dimension: usize,
    ) -> Result<ItemOutput> {
        let mut output = ItemOutput {
            position,
            ..ItemOutput::default()
        };

        match self.embedder.embed(&record.text_document()).await {
            Ok(values) => {
                check_vector(&values, dimension, &format!("text vector for '{}'", record.id))?;
                output.text = Some(values);
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping text of '{}': {}", record.id, e);
                metrics::counter!("indexing_items_skipped_total", "modality" => "text")
                    .increment(1);
                output.text_skipped = true;
            }
            Err(e) => return Err(e),
        }

        let (Some(vision), Some(image_ref)) = (&self.vision, &record.image_ref) else {
            return Ok(output);
        };
        match self.describe_and_embed(vision.as_ref(), image_ref).await {
            Ok((description, values)) => {
                check_vector(&values, dimension, &format!("image vector for '{}'", record.id))?;
                debug!("Described image of '{}': {}", record.id, description);
                output.image = Some((description, values));
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping image of '{}': {}", record.id, e);
                metrics::counter!("indexing_items_skipped_total", "modality" => "image")
                    .increment(1);
                output.image_skipped = true;
            }
            Err(e) => return Err(e),
        }
        Ok(output)
    }

    async fn describe_and_embed(
        &self,
        vision: &dyn VisionDescriber,
        image_ref: &str,
    ) -> Result<(String, Vec<f32>)> {
        let description = vision.describe(&self.resolve_image(image_ref)).await?;
        let description = description.trim().to_string();
        if description.is_empty() {
            return Err(Error::external("vision", "empty image description"));
        }
        let values = self.embedder.embed(&description).await?;
        Ok((description, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Embedding, MemoryVectorIndex};
    use async_trait::async_trait;

    /// Three-dimensional embedder keyed on a few words.
    struct KeywordEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            if text.contains("unembeddable") {
                return Err(Error::external("embedding", "model crashed"));
            }
            let text = text.to_lowercase();
            let mut v = vec![0.1; self.dimension];
            if text.contains("shoe") {
                v[0] = 1.0;
            }
            if text.contains("chair") {
                v[1] = 1.0;
            }
            if text.contains("red") {
                v[2] = 1.0;
            }
            Ok(v)
        }
    }

    /// Describes images from their file name; fails for names containing "broken".
    struct FileNameVision;

    #[async_trait]
    impl VisionDescriber for FileNameVision {
        async fn describe(&self, image_ref: &str) -> Result<String> {
            if image_ref.contains("broken") {
                return Err(Error::external("vision", "image unreadable"));
            }
            Ok(format!("A photo of {}", image_ref))
        }
    }

    fn record(id: &str, name: &str, image: Option<&str>) -> ProductRecord {
        ProductRecord {
            id: id.into(),
            name: name.into(),
            category: "misc".into(),
            color: "red".into(),
            price: 10.0,
            description: format!("{} description", name),
            image_ref: image.map(str::to_string),
        }
    }

    fn store() -> Arc<MetadataStore> {
        Arc::new(
            MetadataStore::from_records(vec![
                record("a_shoe", "Running shoe", Some("shoe.jpg")),
                record("b_chair", "Office chair", Some("broken_chair.jpg")),
                record("c_lamp", "unembeddable lamp", None),
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_build_skips_failed_items() {
        let indexer = Indexer::new(Arc::new(KeywordEmbedder { dimension: 3 }))
            .with_vision(Arc::new(FileNameVision), "/catalog/images")
            .with_concurrency(2);

        let snapshot = indexer
            .build(store(), Box::new(MemoryVectorIndex::new(3)))
            .await
            .unwrap();

        assert_eq!(
            snapshot.stats(),
            &IndexStats {
                products: 3,
                text_indexed: 2,
                image_indexed: 1,
                text_skipped: 1,
                images_skipped: 1,
            }
        );
        assert_eq!(snapshot.index().count(Modality::Text).await.unwrap(), 2);
        assert_eq!(snapshot.index().count(Modality::Image).await.unwrap(), 1);
        assert_eq!(
            snapshot.visual_description("a_shoe"),
            Some("A photo of /catalog/images/shoe.jpg")
        );
        assert_eq!(snapshot.visual_description("b_chair"), None);
        assert_eq!(snapshot.embedding_model(), "keyword");
    }

    #[tokio::test]
    async fn test_build_without_vision_indexes_text_only() {
        let indexer = Indexer::new(Arc::new(KeywordEmbedder { dimension: 3 }));
        let snapshot = indexer
            .build(store(), Box::new(MemoryVectorIndex::new(3)))
            .await
            .unwrap();
        assert_eq!(snapshot.stats().text_indexed, 2);
        assert_eq!(snapshot.stats().image_indexed, 0);
        assert_eq!(snapshot.stats().images_skipped, 0);
        assert_eq!(snapshot.index().count(Modality::Image).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_aborts() {
        let indexer = Indexer::new(Arc::new(KeywordEmbedder { dimension: 4 }));
        let err = indexer
            .build(store(), Box::new(MemoryVectorIndex::new(3)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }

    #[test]
    fn test_resolve_image() {
        let indexer = Indexer::new(Arc::new(KeywordEmbedder { dimension: 3 }))
            .with_vision(Arc::new(FileNameVision), "images");
        assert_eq!(indexer.resolve_image("shoe.jpg"), "images/shoe.jpg");
        assert_eq!(indexer.resolve_image("/abs/shoe.jpg"), "/abs/shoe.jpg");
        assert_eq!(
            indexer.resolve_image("https://cdn.example.com/shoe.jpg"),
            "https://cdn.example.com/shoe.jpg"
        );
    }
}
