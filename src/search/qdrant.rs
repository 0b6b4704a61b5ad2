//! Qdrant-backed vector index.
//!
//! One collection per modality (`{prefix}_text`, `{prefix}_image`), cosine
//! distance. The product id travels in the `record_id` payload field so
//! candidate restriction becomes a keyword-match filter.

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashSet;
use tracing::{debug, info};

use super::index::{check_vector, normalized_score, rank_order};
use super::{EmbeddingVector, Modality, VectorHit, VectorIndex};
use crate::error::{Error, Result};

const RECORD_ID_FIELD: &str = "record_id";

fn qdrant_error(err: impl ToString) -> Error {
    Error::external("qdrant", err)
}

/// Vector index stored in a Qdrant server.
pub struct QdrantVectorIndex {
    client: Qdrant,
    prefix: String,
    dimension: usize,
    next_point_id: u64,
}

impl QdrantVectorIndex {
    /// Connect to a Qdrant server (gRPC endpoint, e.g. `http://localhost:6334`).
    pub fn connect(
        url: &str,
        api_key: Option<String>,
        prefix: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder.build().map_err(qdrant_error)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            dimension,
            next_point_id: 0,
        })
    }

    fn collection(&self, modality: Modality) -> String {
        format!("{}_{}", self.prefix, modality)
    }

    /// Drop and recreate both collections so a rebuild starts empty.
    pub async fn recreate_collections(&mut self) -> Result<()> {
        for modality in Modality::ALL {
            let name = self.collection(modality);
            if self
                .client
                .collection_exists(name.clone())
                .await
                .map_err(qdrant_error)?
            {
                info!("Dropping existing Qdrant collection {}", name);
                self.client
                    .delete_collection(name.clone())
                    .await
                    .map_err(qdrant_error)?;
            }
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(name.clone()).vectors_config(
                        VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(qdrant_error)?;
            debug!("Created Qdrant collection {}", name);
        }
        self.next_point_id = 0;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&mut self, vectors: Vec<EmbeddingVector>) -> Result<()> {
        for modality in Modality::ALL {
            let mut points = Vec::new();
            for vector in vectors.iter().filter(|v| v.modality == modality) {
                check_vector(
                    &vector.values,
                    self.dimension,
                    &format!("{} vector for '{}'", modality, vector.record_id),
                )?;
                let mut payload = Payload::new();
                payload.insert(RECORD_ID_FIELD, vector.record_id.clone());
                points.push(PointStruct::new(
                    self.next_point_id,
                    vector.values.clone(),
                    payload,
                ));
                self.next_point_id += 1;
            }
            if points.is_empty() {
                continue;
            }
            let count = points.len();
            self.client
                .upsert_points(UpsertPointsBuilder::new(self.collection(modality), points).wait(true))
                .await
                .map_err(qdrant_error)?;
            debug!("Upserted {} {} vectors into Qdrant", count, modality);
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
        let mut request =
            SearchPointsBuilder::new(self.collection(modality), vector.to_vec(), k as u64)
                .with_payload(true);
        if let Some(ids) = candidates {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let mut ids: Vec<String> = ids.iter().cloned().collect();
            ids.sort();
            request = request.filter(Filter::must([Condition::matches(RECORD_ID_FIELD, ids)]));
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(qdrant_error)?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let record_id = match point
                .payload
                .get(RECORD_ID_FIELD)
                .and_then(|value| value.kind.as_ref())
            {
                Some(Kind::StringValue(id)) => id.clone(),
                _ => {
                    return Err(Error::DataIntegrity(format!(
                        "Qdrant point in {} has no {} payload",
                        self.collection(modality),
                        RECORD_ID_FIELD
                    )))
                }
            };
            hits.push(VectorHit {
                record_id,
                score: normalized_score(point.score),
            });
        }
        hits.sort_by(|a, b| rank_order(a.score, &a.record_id, b.score, &b.record_id));
        Ok(hits)
    }

    async fn count(&self, modality: Modality) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection(modality)).exact(true))
            .await
            .map_err(qdrant_error)?;
        Ok(response.result.map_or(0, |r| r.count as usize))
    }
}
