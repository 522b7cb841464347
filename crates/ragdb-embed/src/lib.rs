//! Embedding providers.
//!
//! `HashingEmbedder` is deterministic and offline; `OpenAiEmbedder` calls an
//! OpenAI-compatible `/v1/embeddings` endpoint. Setting
//! `APP_USE_FAKE_EMBEDDINGS=1` forces the hashing embedder regardless of
//! configuration, which keeps tests and local runs off the network.

use std::sync::Arc;

use ragdb_core::config::{EmbeddingSettings, ProviderKind};
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::Result;

pub mod hashing;
pub mod openai;
pub mod retry;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;
pub use retry::RetryPolicy;

/// Dimension used by the hashing embedder when it replaces a remote provider.
pub const FAKE_EMBEDDING_DIM: usize = 1024;

fn fake_embeddings_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    if fake_embeddings_forced() {
        let dim = if settings.provider == ProviderKind::Hashing { settings.dim } else { FAKE_EMBEDDING_DIM };
        tracing::info!(dim, "APP_USE_FAKE_EMBEDDINGS set; using hashing embedder");
        return Ok(Arc::new(HashingEmbedder::new(dim)));
    }
    match settings.provider {
        ProviderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(settings.dim))),
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::from_settings(settings)?)),
    }
}
