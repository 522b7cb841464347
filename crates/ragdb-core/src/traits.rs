use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{Passage, ScoredResult};

/// Produces fixed-dimension vectors for text. Implementations must return
/// vectors of `dim()` floats for a given `embedder_id()`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hashing:d1024`).
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::provider("provider returned no embedding", false))
    }
}

pub trait LexicalRetriever: Send + Sync {
    fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredResult>>;
}

#[async_trait]
pub trait VectorRetriever: Send + Sync {
    async fn search_vec(&self, query_embedding: &[f32], k: usize) -> Result<Vec<ScoredResult>>;
}

/// Consumer of retrieved context. The language-model call itself lives
/// outside this workspace.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, query: &str, passages: &[Passage]) -> Result<String>;
}
