use ragdb_core::types::Chunk;
use ragdb_core::{Error, Result};

use crate::schema::chunks_to_record_batch;
use crate::LanceVectorIndex;

const WRITE_BATCH: usize = 1000;

impl LanceVectorIndex {
    /// Append chunks with their embeddings. Ordinals continue from the
    /// current row count. Once the table reaches `ann_min_rows` an IVF_PQ
    /// index is (re)built.
    pub async fn index(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(Error::Ingestion(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        if let Some((chunk, v)) = chunks.iter().zip(embeddings).find(|(_, v)| v.len() != self.dim) {
            return Err(Error::Ingestion(format!(
                "embedding for chunk {} has {} dimensions, expected {}",
                chunk.id,
                v.len(),
                self.dim
            )));
        }
        if chunks.is_empty() {
            return Ok(());
        }

        let mut ordinal = self.count_rows().await?;
        for (batch_chunks, batch_vecs) in chunks.chunks(WRITE_BATCH).zip(embeddings.chunks(WRITE_BATCH)) {
            let batch = chunks_to_record_batch(batch_chunks, batch_vecs, ordinal, self.dim)?;
            crate::table::append(&self.table, batch).await?;
            ordinal += batch_chunks.len();
            tracing::debug!(rows = ordinal, "appended vector batch");
        }

        if ordinal >= self.settings.ann_min_rows {
            self.build_ann_index(ordinal).await?;
        }
        tracing::info!(rows = ordinal, table = %self.settings.table_name, "vector store written");
        Ok(())
    }
}
