//! On-disk layout of a built corpus version and the checks run when it is
//! opened.
//!
//! ```text
//! <index_dir>/<corpus_version>/
//!     manifest.json
//!     lexical.json
//!     vectors/        (LanceDB)
//! ```
//!
//! Both stores are written into a staging directory and renamed into place
//! together, so a version directory either holds a complete pair or does not
//! exist.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ragdb_core::config::VectorSettings;
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::types::ChunkId;
use ragdb_core::{Error, Result};
use ragdb_text::Bm25Index;
use ragdb_vector::LanceVectorIndex;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const LEXICAL_FILE: &str = "lexical.json";
pub const VECTOR_DIR: &str = "vectors";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    index_dir: PathBuf,
    corpus_version: String,
}

impl StoreLayout {
    pub fn new(index_dir: impl Into<PathBuf>, corpus_version: impl Into<String>) -> Self {
        Self { index_dir: index_dir.into(), corpus_version: corpus_version.into() }
    }

    pub fn corpus_version(&self) -> &str { &self.corpus_version }
    pub fn index_dir(&self) -> &Path { &self.index_dir }
    pub fn version_dir(&self) -> PathBuf { self.index_dir.join(&self.corpus_version) }
    pub fn staging_dir(&self) -> PathBuf { self.index_dir.join(format!(".staging-{}", self.corpus_version)) }
    pub(crate) fn retired_dir(&self) -> PathBuf { self.index_dir.join(format!(".retired-{}", self.corpus_version)) }

    pub fn manifest_path(&self) -> PathBuf { self.version_dir().join(MANIFEST_FILE) }
    pub fn lexical_path(&self) -> PathBuf { self.version_dir().join(LEXICAL_FILE) }
    pub fn vector_dir(&self) -> PathBuf { self.version_dir().join(VECTOR_DIR) }

    /// A committed version always has a manifest.
    pub fn exists(&self) -> bool { self.manifest_path().is_file() }

    /// Manifests of every committed version under `index_dir`, newest first.
    /// Unreadable manifests are skipped with a warning.
    pub fn list(index_dir: &Path) -> Result<Vec<StoreManifest>> {
        if !index_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut manifests = Vec::new();
        for entry in fs::read_dir(index_dir)? {
            let path = entry?.path().join(MANIFEST_FILE);
            if !path.is_file() {
                continue;
            }
            match StoreManifest::load(&path) {
                Ok(m) => manifests.push(m),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable manifest"),
            }
        }
        manifests.sort_by(|a, b| b.built_at.cmp(&a.built_at));
        Ok(manifests)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub corpus_version: String,
    pub embedder_id: String,
    pub dim: usize,
    pub chunk_count: usize,
    pub chunk_digest: String,
    pub built_at: DateTime<Utc>,
    /// Version name was derived from the corpus rather than configured.
    /// Derived versions are retired once a newer one is committed.
    #[serde(default)]
    pub derived: bool,
}

impl StoreManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| Error::IndexCorruption(format!("manifest {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::IndexCorruption(format!("manifest {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

/// blake3 over the ordered chunk ids, each length-prefixed.
pub fn chunk_digest(ids: &[ChunkId]) -> String {
    let mut hasher = blake3::Hasher::new();
    for id in ids {
        hasher.update(&(id.len() as u64).to_le_bytes());
        hasher.update(id.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// The opened lexical and vector stores of one corpus version. Owned by the
/// caller and shared by reference; nothing global.
pub struct IndexPair {
    pub lexical: Arc<Bm25Index>,
    pub vector: Arc<LanceVectorIndex>,
    pub manifest: StoreManifest,
}

impl IndexPair {
    pub fn chunk_count(&self) -> usize { self.manifest.chunk_count }
}

/// Open a committed version and verify that both stores agree with each
/// other, with the manifest, and with `embedder`. Any disagreement is
/// reported as corruption; nothing is repaired.
pub async fn open_indexes(
    layout: &StoreLayout,
    embedder: &dyn EmbeddingProvider,
    vector_settings: &VectorSettings,
) -> Result<IndexPair> {
    if !layout.version_dir().is_dir() {
        return Err(Error::NotFound(format!("corpus version {} under {}", layout.corpus_version(), layout.index_dir().display())));
    }
    let manifest = StoreManifest::load(&layout.manifest_path())?;
    if manifest.corpus_version != layout.corpus_version() {
        return Err(Error::IndexCorruption(format!(
            "manifest is for corpus version {}, expected {}",
            manifest.corpus_version,
            layout.corpus_version()
        )));
    }
    if manifest.embedder_id != embedder.embedder_id() || manifest.dim != embedder.dim() {
        return Err(Error::IndexCorruption(format!(
            "store was built with {} (d={}), current provider is {} (d={})",
            manifest.embedder_id,
            manifest.dim,
            embedder.embedder_id(),
            embedder.dim()
        )));
    }

    let lexical = Bm25Index::load(&layout.lexical_path())?;
    let vector = LanceVectorIndex::open(&layout.vector_dir(), manifest.dim, vector_settings.clone()).await?;

    let lexical_ids = lexical.chunk_ids();
    let vector_ids = vector.chunk_ids().await?;
    if lexical_ids != vector_ids {
        return Err(Error::IndexCorruption(format!(
            "lexical store has {} chunks, vector store has {}; chunk sets differ",
            lexical_ids.len(),
            vector_ids.len()
        )));
    }
    if lexical_ids.len() != manifest.chunk_count || chunk_digest(&lexical_ids) != manifest.chunk_digest {
        return Err(Error::IndexCorruption("chunk set does not match the manifest digest".into()));
    }

    tracing::info!(
        corpus_version = %manifest.corpus_version,
        chunks = manifest.chunk_count,
        embedder = %manifest.embedder_id,
        "opened stores"
    );
    Ok(IndexPair { lexical: Arc::new(lexical), vector: Arc::new(vector), manifest })
}
