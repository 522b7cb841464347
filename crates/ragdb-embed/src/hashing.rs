use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use twox_hash::XxHash64;

use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::Result;

/// Feature-hashing embedder.
///
/// Each lowercased alphanumeric token lands in one of `dim` buckets with a
/// non-negative weight derived from its hash, and the vector is L2-normalized.
/// The result is a bag of words: token order does not matter. Texts with no
/// shared tokens have cosine similarity 0 (barring bucket collisions).
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
    id: String,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, id: format!("hashing:xxh64:d{dim}") }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let weight = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += 0.5 + weight * 0.5;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

    #[test]
    fn case_and_punctuation_do_not_matter() {
        let e = HashingEmbedder::new(256);
        assert_eq!(e.embed_text("Statistics!"), e.embed_text("statistics"));
    }

    #[test]
    fn token_order_does_not_matter() {
        let e = HashingEmbedder::new(4096);
        let a = e.embed_text("statistics background required");
        let b = e.embed_text("required background statistics");
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-6));
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let e = HashingEmbedder::new(4096);
        let q = e.embed_text("statistics experience");
        let a = e.embed_text("requires a statistics background");
        let b = e.embed_text("tuition is due each quarter");
        assert!(cosine(&q, &a) > cosine(&q, &b));
        assert!(e.embed_text("").iter().all(|x| *x == 0.0));
    }
}
