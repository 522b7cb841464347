//! Domain types shared by the lexical and vector engines.

use serde::{Deserialize, Serialize};

pub type ChunkId = String;

/// A raw unit of scraped source content.
///
/// Documents are immutable once ingested and are the source of truth for
/// chunk provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

impl Document {
    pub fn new(
        url: impl Into<String>,
        section: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self { url: url.into(), section: section.into(), title: title.into(), text: text.into() }
    }
}

/// A contiguous slice of a document's text that is independently indexed.
///
/// - `id`: stable identity derived from the document and the start offset
/// - `start`/`end`: character offsets of `content` within the document text
///
/// Embeddings are not carried on the chunk; ingestion keeps them in a vector
/// parallel to the chunk list until they are written to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub source_url: String,
    pub section: String,
    pub title: String,
    pub content: String,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    /// Text handed to both indexes: the content prefixed with the section and
    /// title lines when those are present.
    pub fn searchable_text(&self) -> String {
        let mut header = String::new();
        if !self.section.trim().is_empty() {
            header.push_str("Section: ");
            header.push_str(self.section.trim());
            header.push('\n');
        }
        if !self.title.trim().is_empty() {
            header.push_str("Title: ");
            header.push_str(self.title.trim());
            header.push('\n');
        }
        if header.is_empty() {
            return self.content.clone();
        }
        header.push_str("Content: ");
        header.push_str(&self.content);
        header
    }

    pub fn char_len(&self) -> usize { self.content.chars().count() }
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Lexical,
    Vector,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexical => f.write_str("lexical"),
            Self::Vector => f.write_str("vector"),
        }
    }
}

/// One hit from a single retriever. `rank` is 1-based; `score` is
/// engine-specific but higher is always better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub rank: usize,
}

/// One entry of the fused ranking. Only the order is a public contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub chunk_id: ChunkId,
    pub fused_score: f64,
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// A retrieved passage with provenance, ready for answer generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub rank: usize,
    pub chunk_id: ChunkId,
    pub content: String,
    pub source_url: String,
    pub section: String,
    pub title: String,
    pub fused_score: f64,
}

impl Passage {
    pub fn from_chunk(rank: usize, chunk: &Chunk, fused_score: f64) -> Self {
        Self {
            rank,
            chunk_id: chunk.id.clone(),
            content: chunk.content.clone(),
            source_url: chunk.source_url.clone(),
            section: chunk.section.clone(),
            title: chunk.title.clone(),
            fused_score,
        }
    }
}

/// Why a sub-retriever did not contribute to a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradeReason {
    Failed(String),
    DeadlineElapsed,
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "failed: {msg}"),
            Self::DeadlineElapsed => f.write_str("deadline elapsed"),
        }
    }
}

/// Non-fatal retrieval-quality warning attached to a query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalWarning {
    Degraded { source: SourceKind, reason: DegradeReason },
}

impl std::fmt::Display for RetrievalWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Degraded { source, reason } => {
                write!(f, "retrieval degraded: {source} retriever {reason}")
            }
        }
    }
}
