//! Layered configuration loader and path helpers.
//!
//! Uses Figment to merge typed defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nested keys, e.g. `APP_RETRIEVAL__K=10`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Extract and validate the full typed settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub store: StoreSettings,
    pub chunking: ChunkingSettings,
    pub lexical: LexicalSettings,
    pub vector: VectorSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.lexical.validate()?;
        self.embedding.validate()?;
        self.retrieval.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// JSON / JSONL file or directory of `.txt` files.
    pub corpus_path: String,
    /// Root under which one directory per corpus version is kept.
    pub index_dir: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { corpus_path: "data/corpus.json".to_string(), index_dir: "data/indexes".to_string() }
    }
}

impl DataSettings {
    pub fn corpus_path(&self, base: &Path) -> PathBuf { resolve_with_base(base, &self.corpus_path) }
    pub fn index_dir(&self, base: &Path) -> PathBuf { resolve_with_base(base, &self.index_dir) }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Explicit corpus version. When unset the version is derived from the
    /// corpus content, the chunker settings and the embedder id.
    pub corpus_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self { Self { max_chars: 512, overlap_chars: 100 } }
}

impl ChunkingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(Error::InvalidConfig("chunking.max_chars must be > 0".into()));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(Error::InvalidConfig(format!(
                "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalSettings {
    pub k1: f32,
    pub b: f32,
    /// Drop common English stop words at index and query time. Changes match
    /// semantics, so it is off unless asked for.
    pub stop_words: bool,
}

impl Default for LexicalSettings {
    fn default() -> Self { Self { k1: 1.5, b: 0.75, stop_words: false } }
}

impl LexicalSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(Error::InvalidConfig(format!("lexical.k1 must be >= 0, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::InvalidConfig(format!("lexical.b must be within [0, 1], got {}", self.b)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSettings {
    pub table_name: String,
    /// Hits at or below this cosine similarity are dropped.
    pub min_similarity: f32,
    /// Row count at which an IVF_PQ index is trained; below it search is exact.
    pub ann_min_rows: usize,
    pub nprobes: usize,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self { table_name: "chunks".to_string(), min_similarity: 0.0, ann_min_rows: 100_000, nprobes: 20 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Hashing,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub dim: usize,
    pub endpoint: String,
    /// Name of the env var holding the API key; the key itself never lives in
    /// config files.
    pub api_key_env: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            dim: 1536,
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 64,
            concurrency: 4,
            max_retries: 5,
            initial_backoff_ms: 500,
            request_timeout_secs: 60,
        }
    }
}

impl EmbeddingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be > 0".into()));
        }
        if self.batch_size == 0 || self.concurrency == 0 {
            return Err(Error::InvalidConfig("embedding.batch_size and embedding.concurrency must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Passages handed downstream per query.
    pub k: usize,
    /// Depth requested from each sub-retriever.
    pub k_candidates: usize,
    pub rank_constant: f64,
    /// Weights are used as given; they are never normalized.
    pub lexical_weight: f64,
    pub vector_weight: f64,
    pub deadline_ms: Option<u64>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k: 20,
            k_candidates: 20,
            rank_constant: 60.0,
            lexical_weight: 0.5,
            vector_weight: 0.5,
            deadline_ms: None,
        }
    }
}

impl RetrievalSettings {
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [("lexical_weight", self.lexical_weight), ("vector_weight", self.vector_weight)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidConfig(format!("retrieval.{name} must be a finite value >= 0, got {w}")));
            }
        }
        if !self.rank_constant.is_finite() || self.rank_constant < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "retrieval.rank_constant must be >= 0, got {}",
                self.rank_constant
            )));
        }
        let sum = self.lexical_weight + self.vector_weight;
        if sum == 0.0 {
            return Err(Error::InvalidConfig("at least one retrieval weight must be > 0".into()));
        }
        if (sum - 1.0).abs() > 0.25 {
            tracing::warn!(
                lexical = self.lexical_weight,
                vector = self.vector_weight,
                "fusion weights sum to {sum:.3}; weights are not normalized"
            );
        }
        Ok(())
    }
}

/// Expand `${VAR}`/`$VAR` and a leading `~` in a configured path. The result
/// is not canonicalized.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Expand `p`, then join it onto `base` unless it is already absolute.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
