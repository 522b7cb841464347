use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::DistanceType;

use arrow_array::{Float32Array, Int64Array, StringArray};

use ragdb_core::traits::VectorRetriever;
use ragdb_core::types::ScoredResult;
use ragdb_core::{Error, Result};

use crate::table::storage;
use crate::LanceVectorIndex;

struct Hit {
    id: String,
    ordinal: i64,
    similarity: f32,
}

impl LanceVectorIndex {
    /// Top-`k` chunks by cosine similarity, highest first; equal similarity
    /// falls back to insertion order. Hits at or below
    /// `min_similarity` are dropped.
    pub async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<ScoredResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if query_embedding.len() != self.dim {
            return Err(Error::Storage(format!(
                "query vector has {} dimensions, index expects {}",
                query_embedding.len(),
                self.dim
            )));
        }
        // Over-fetch so ties straddling the cut are resolved by ordinal.
        let fetch = k.saturating_mul(2);
        let mut stream = self
            .table
            .vector_search(query_embedding.to_vec())
            .map_err(storage("vector query"))?
            .distance_type(DistanceType::Cosine)
            .nprobes(self.settings.nprobes)
            .select(Select::columns(&["id", "ordinal"]))
            .limit(fetch)
            .execute()
            .await
            .map_err(storage("vector query"))?;

        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(storage("vector query"))? {
            let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let ordinals = batch.column_by_name("ordinal").and_then(|c| c.as_any().downcast_ref::<Int64Array>());
            let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            let (Some(ids), Some(ordinals), Some(distances)) = (ids, ordinals, distances) else {
                return Err(Error::Storage("vector query returned unexpected columns".into()));
            };
            for i in 0..batch.num_rows() {
                let similarity = 1.0 - distances.value(i);
                if similarity.is_nan() || similarity <= self.settings.min_similarity {
                    continue;
                }
                hits.push(Hit { id: ids.value(i).to_string(), ordinal: ordinals.value(i), similarity });
            }
        }

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then(a.ordinal.cmp(&b.ordinal)));
        hits.truncate(k);
        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(i, h)| ScoredResult { chunk_id: h.id, score: h.similarity, rank: i + 1 })
            .collect())
    }
}

#[async_trait]
impl VectorRetriever for LanceVectorIndex {
    async fn search_vec(&self, query_embedding: &[f32], k: usize) -> Result<Vec<ScoredResult>> {
        self.search(query_embedding, k).await
    }
}
