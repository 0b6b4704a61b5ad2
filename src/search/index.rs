//! Vector index abstraction and the in-memory backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};

/// Embedding space a vector belongs to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Product text metadata
    Text,
    /// Vision-model description of the product image
    Image,
}

impl Modality {
    /// Both modalities, in merge order.
    pub const ALL: [Modality; 2] = [Modality::Text, Modality::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An embedding tied to one product and one modality.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub record_id: String,
    pub modality: Modality,
    pub values: Vec<f32>,
}

/// A nearest-neighbour match with its similarity normalized to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub record_id: String,
    pub score: f32,
}

/// Nearest-neighbour storage with one logical collection per modality.
///
/// `upsert` takes `&mut self`: an index is filled once by the indexer and is
/// then shared immutably behind an `Arc`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Vector length accepted by this index.
    fn dimension(&self) -> usize;

    /// Insert or replace vectors.
    async fn upsert(&mut self, vectors: Vec<EmbeddingVector>) -> Result<()>;

    /// Top `k` hits for `vector` within `modality`.
    ///
    /// When `candidates` is given only those record ids are considered.
    /// Hits are ordered by score descending, then record id ascending.
    async fn query(
        &self,
        vector: &[f32],
        modality: Modality,
        candidates: Option<&HashSet<String>>,
        k: usize,
    ) -> Result<Vec<VectorHit>>;

    /// Number of vectors stored for `modality`.
    async fn count(&self, modality: Modality) -> Result<usize>;
}

/// Cosine similarity in [-1, 1]; 0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Map cosine similarity from [-1, 1] onto [0, 1].
pub fn normalized_score(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Orders hits by score descending, ties by id ascending.
pub(crate) fn rank_order(a_score: f32, a_id: &str, b_score: f32, b_id: &str) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_id.cmp(b_id))
}

pub(crate) fn check_vector(vector: &[f32], dimension: usize, what: &str) -> Result<()> {
    if vector.len() != dimension {
        return Err(Error::DataIntegrity(format!(
            "{} has dimension {}, index expects {}",
            what,
            vector.len(),
            dimension
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::DataIntegrity(format!(
            "{} contains non-finite values",
            what
        )));
    }
    Ok(())
}

/// Brute-force in-memory index.
///
/// Exact and deterministic; fine for catalogs of a few thousand products.
#[derive(Debug)]
pub struct MemoryVectorIndex {
    dimension: usize,
    collections: HashMap<Modality, BTreeMap<String, Vec<f32>>>,
}

impl MemoryVectorIndex {
    /// Create an empty index for vectors of length `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            collections: HashMap::new(),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&mut self, vectors: Vec<EmbeddingVector>) -> Result<()> {
        for vector in &vectors {
            check_vector(
                &vector.values,
                self.dimension,
                &format!("{} vector for '{}'", vector.modality, vector.record_id),
            )?;
        }
        for vector in vectors {
            self.collections
                .entry(vector.modality)
                .or_default()
                .insert(vector.record_id, vector.values);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        modality: Modality,
        candidates: Option<&HashSet<String>>,
        k: usize,
    ) -> Result<Vec<VectorHit>> {
        check_vector(vector, self.dimension, "query vector")?;
        let Some(collection) = self.collections.get(&modality) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<VectorHit> = collection
            .iter()
            .filter(|(id, _)| candidates.map_or(true, |set| set.contains(*id)))
            .map(|(id, values)| VectorHit {
                record_id: id.clone(),
                score: normalized_score(cosine_similarity(vector, values)),
            })
            .collect();
        hits.sort_by(|a, b| rank_order(a.score, &a.record_id, b.score, &b.record_id));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self, modality: Modality) -> Result<usize> {
        Ok(self.collections.get(&modality).map_or(0, |c| c.len()))
    }
}
