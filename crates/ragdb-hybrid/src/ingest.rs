//! Batch ingestion: documents → chunks → embeddings → both stores.
//!
//! The pair is built in a staging directory and renamed into place only after
//! every step succeeded. A failed build leaves the previous state untouched.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};

use ragdb_core::chunker::Chunker;
use ragdb_core::config::Settings;
use ragdb_core::corpus::corpus_digest;
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::types::{Chunk, Document};
use ragdb_core::{Error, Result};
use ragdb_embed::RetryPolicy;
use ragdb_text::Bm25Index;
use ragdb_vector::LanceVectorIndex;

use crate::store::{chunk_digest, open_indexes, IndexPair, StoreLayout, StoreManifest, LEXICAL_FILE, MANIFEST_FILE, VECTOR_DIR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    /// Load the existing stores for this corpus version when present.
    #[default]
    Reuse,
    /// Rebuild even if the stores exist.
    ForceRebuild,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub corpus_version: String,
    pub documents: usize,
    pub chunks: usize,
    /// True when existing stores were reused and nothing was built.
    pub skipped: bool,
}

pub struct IngestionPipeline {
    index_dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: Settings,
    chunker: Chunker,
    retry: RetryPolicy,
    progress: ProgressBar,
}

impl IngestionPipeline {
    pub fn new(index_dir: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingProvider>, settings: &Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            index_dir: index_dir.into(),
            chunker: Chunker::new(settings.chunking)?,
            retry: RetryPolicy::from_settings(&settings.embedding),
            settings: settings.clone(),
            embedder,
            progress: ProgressBar::hidden(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Report embedding progress on `bar`. The pipeline sets its length and
    /// style.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    fn pinned_version(&self) -> Option<&str> {
        self.settings.store.corpus_version.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    /// Configured `store.corpus_version`, else a digest of the corpus, the
    /// chunking and lexical settings, and the embedder id.
    pub fn corpus_version(&self, documents: &[Document]) -> String {
        if let Some(v) = self.pinned_version() {
            return v.to_string();
        }
        let chunking = self.settings.chunking;
        let lexical = self.settings.lexical;
        let mut hasher = blake3::Hasher::new();
        hasher.update(corpus_digest(documents).as_bytes());
        hasher.update(&(chunking.max_chars as u64).to_le_bytes());
        hasher.update(&(chunking.overlap_chars as u64).to_le_bytes());
        hasher.update(&lexical.k1.to_le_bytes());
        hasher.update(&lexical.b.to_le_bytes());
        hasher.update(&[u8::from(lexical.stop_words)]);
        hasher.update(self.embedder.embedder_id().as_bytes());
        let hex = hasher.finalize().to_hex();
        format!("v-{}", &hex.as_str()[..16])
    }

    pub fn layout(&self, documents: &[Document]) -> StoreLayout {
        StoreLayout::new(&self.index_dir, self.corpus_version(documents))
    }

    pub async fn ingest(&self, documents: &[Document], mode: IngestMode) -> Result<(IngestReport, IndexPair)> {
        let layout = self.layout(documents);
        if mode == IngestMode::Reuse && layout.exists() {
            let pair = open_indexes(&layout, self.embedder.as_ref(), &self.settings.vector).await?;
            if pair.chunk_count() > 0 {
                tracing::info!(corpus_version = %layout.corpus_version(), "stores present; skipping ingestion");
                let report = IngestReport {
                    corpus_version: layout.corpus_version().to_string(),
                    documents: documents.len(),
                    chunks: pair.chunk_count(),
                    skipped: true,
                };
                return Ok((report, pair));
            }
        }

        tracing::info!(corpus_version = %layout.corpus_version(), documents = documents.len(), ?mode, "building stores");
        let chunks = self.chunk_all(documents)?;
        let embeddings = self.embed_all(&chunks).await?;

        let staging = layout.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        let built = self.write_stores(&layout, &staging, &chunks, &embeddings).await;
        let committed = built.and_then(|()| commit(&layout, &staging));
        if let Err(e) = committed {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::warn!(path = %staging.display(), error = %cleanup, "failed to remove staging directory");
            }
            return Err(e);
        }

        let pair = open_indexes(&layout, self.embedder.as_ref(), &self.settings.vector).await?;
        retire_superseded(&layout);
        let report = IngestReport {
            corpus_version: layout.corpus_version().to_string(),
            documents: documents.len(),
            chunks: chunks.len(),
            skipped: false,
        };
        tracing::info!(corpus_version = %report.corpus_version, chunks = report.chunks, "ingestion complete");
        Ok((report, pair))
    }

    fn chunk_all(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        let mut seen = HashSet::new();
        let mut chunks = Vec::new();
        for doc in documents {
            for chunk in self.chunker.split(doc)? {
                if seen.insert(chunk.id.clone()) {
                    chunks.push(chunk);
                }
            }
        }
        if chunks.is_empty() {
            return Err(Error::Ingestion("corpus produced no chunks".into()));
        }
        tracing::debug!(chunks = chunks.len(), "chunked corpus");
        Ok(chunks)
    }

    /// Embed every chunk in order. Batches run with bounded concurrency and
    /// each is retried on its own.
    async fn embed_all(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(Chunk::searchable_text).collect();
        let batch_size = self.settings.embedding.batch_size;
        let concurrency = self.settings.embedding.concurrency;
        let batches: Vec<&[String]> = texts.chunks(batch_size).collect();

        let pb = &self.progress;
        pb.set_length(batches.len() as u64);
        pb.set_position(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message("embedding");

        let embedder = self.embedder.as_ref();
        let retry = &self.retry;
        let results: Vec<Vec<Vec<f32>>> = futures::stream::iter(batches.into_iter().map(|batch| {
            retry.run("embed batch", move || embedder.embed_batch(batch))
        }))
        .buffered(concurrency)
        .inspect_ok(|_| pb.inc(1))
        .try_collect()
        .await?;
        pb.finish_and_clear();

        let embeddings: Vec<Vec<f32>> = results.into_iter().flatten().collect();
        if embeddings.len() != chunks.len() {
            return Err(Error::provider(
                format!("expected {} embeddings, provider returned {}", chunks.len(), embeddings.len()),
                false,
            ));
        }
        Ok(embeddings)
    }

    async fn write_stores(&self, layout: &StoreLayout, staging: &Path, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        let lexical = Bm25Index::from_chunks(self.settings.lexical, chunks);
        lexical.save(&staging.join(LEXICAL_FILE))?;

        {
            let vector =
                LanceVectorIndex::create(&staging.join(VECTOR_DIR), self.embedder.dim(), self.settings.vector.clone()).await?;
            vector.index(chunks, embeddings).await?;
        }

        let ids = lexical.chunk_ids();
        let manifest = StoreManifest {
            corpus_version: layout.corpus_version().to_string(),
            embedder_id: self.embedder.embedder_id().to_string(),
            dim: self.embedder.dim(),
            chunk_count: ids.len(),
            chunk_digest: chunk_digest(&ids),
            built_at: Utc::now(),
            derived: self.pinned_version().is_none(),
        };
        manifest.save(&staging.join(MANIFEST_FILE))
    }
}

/// Remove derived versions other than the one just committed. Configured
/// versions are kept until removed by hand. Failures only warn.
fn retire_superseded(layout: &StoreLayout) {
    let manifests = match StoreLayout::list(layout.index_dir()) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "could not list stores to retire");
            return;
        }
    };
    let retirable = |m: &StoreManifest| {
        m.derived
            && m.corpus_version != layout.corpus_version()
            && matches!(Path::new(&m.corpus_version).components().collect::<Vec<_>>()[..], [Component::Normal(_)])
    };
    for old in manifests.into_iter().filter(|m| retirable(m)) {
        let dir = layout.index_dir().join(&old.corpus_version);
        match fs::remove_dir_all(&dir) {
            Ok(()) => tracing::info!(corpus_version = %old.corpus_version, "retired superseded store"),
            Err(e) => tracing::warn!(path = %dir.display(), error = %e, "failed to retire superseded store"),
        }
    }
}

/// Swap the staging directory into the version slot. An existing version is
/// moved aside first and removed once the new one is in place.
fn commit(layout: &StoreLayout, staging: &Path) -> Result<()> {
    let target = layout.version_dir();
    let retired = layout.retired_dir();
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    let had_previous = target.exists();
    if had_previous {
        fs::rename(&target, &retired)?;
    }
    if let Err(e) = fs::rename(staging, &target) {
        if had_previous {
            fs::rename(&retired, &target)?;
        }
        return Err(e.into());
    }
    if had_previous {
        if let Err(e) = fs::remove_dir_all(&retired) {
            tracing::warn!(path = %retired.display(), error = %e, "failed to remove retired store");
        }
    }
    Ok(())
}
