//! BM25 posting store.
//!
//! Postings are keyed by term and point at chunk ordinals (insertion order).
//! Ordinals double as the tie-break, so equal scores always rank the chunk
//! indexed first.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use ragdb_core::config::LexicalSettings;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::LexicalRetriever;
use ragdb_core::types::{Chunk, ChunkId, ScoredResult};

use crate::analyzer::Analyzer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Posting {
    ordinal: u32,
    tf: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Bm25Index {
    params: LexicalSettings,
    chunks: Vec<Chunk>,
    doc_lengths: Vec<u32>,
    total_length: u64,
    postings: BTreeMap<String, Vec<Posting>>,
    #[serde(skip)]
    by_id: HashMap<ChunkId, u32>,
    #[serde(skip)]
    analyzer: Analyzer,
}

impl Bm25Index {
    pub fn new(params: LexicalSettings) -> Self {
        Self {
            params,
            chunks: Vec::new(),
            doc_lengths: Vec::new(),
            total_length: 0,
            postings: BTreeMap::new(),
            by_id: HashMap::new(),
            analyzer: Analyzer::new(params.stop_words),
        }
    }

    pub fn from_chunks(params: LexicalSettings, chunks: &[Chunk]) -> Self {
        let mut index = Self::new(params);
        index.add(chunks);
        index
    }

    /// Append chunks; ids already present are skipped. Returns the number added.
    pub fn add(&mut self, chunks: &[Chunk]) -> usize {
        let mut added = 0usize;
        for chunk in chunks {
            if self.by_id.contains_key(&chunk.id) {
                tracing::debug!(chunk_id = %chunk.id, "skipping duplicate chunk");
                continue;
            }
            let ordinal = self.chunks.len() as u32;
            let tokens = self.analyzer.tokens(&chunk.searchable_text());
            let mut term_freqs: BTreeMap<String, u32> = BTreeMap::new();
            for token in &tokens {
                *term_freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for (term, tf) in term_freqs {
                self.postings.entry(term).or_default().push(Posting { ordinal, tf });
            }
            self.doc_lengths.push(tokens.len() as u32);
            self.total_length += tokens.len() as u64;
            self.by_id.insert(chunk.id.clone(), ordinal);
            self.chunks.push(chunk.clone());
            added += 1;
        }
        added
    }

    pub fn len(&self) -> usize { self.chunks.len() }
    pub fn is_empty(&self) -> bool { self.chunks.is_empty() }
    pub fn params(&self) -> &LexicalSettings { &self.params }
    pub fn vocabulary_size(&self) -> usize { self.postings.len() }

    /// Chunks in insertion order.
    pub fn chunks(&self) -> &[Chunk] { &self.chunks }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.by_id.get(id).map(|&ordinal| &self.chunks[ordinal as usize])
    }

    pub fn chunk_ids(&self) -> Vec<ChunkId> { self.chunks.iter().map(|c| c.id.clone()).collect() }

    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredResult> {
        if k == 0 || self.chunks.is_empty() {
            return Vec::new();
        }
        let mut terms = self.analyzer.tokens(query);
        terms.sort();
        terms.dedup();

        let n = self.chunks.len() as f64;
        let avg_len = (self.total_length as f64 / n).max(1.0);
        let k1 = f64::from(self.params.k1);
        let b = f64::from(self.params.b);

        let mut scores: HashMap<u32, f64> = HashMap::new();
        for term in &terms {
            let Some(postings) = self.postings.get(term) else { continue };
            let df = postings.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for p in postings {
                let tf = f64::from(p.tf);
                let len = f64::from(self.doc_lengths[p.ordinal as usize]);
                let norm = k1 * (1.0 - b + b * len / avg_len);
                *scores.entry(p.ordinal).or_insert(0.0) += idf * tf * (k1 + 1.0) / (tf + norm);
            }
        }

        let mut ranked: Vec<(u32, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
            .into_iter()
            .enumerate()
            .map(|(i, (ordinal, score))| ScoredResult {
                chunk_id: self.chunks[ordinal as usize].id.clone(),
                score: score as f32,
                rank: i + 1,
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        tracing::debug!(path = %path.display(), chunks = self.len(), terms = self.vocabulary_size(), "saved lexical store");
        Ok(())
    }

    /// Load a persisted store. Anything unreadable or internally inconsistent
    /// is reported as corruption.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::IndexCorruption(format!("lexical store {}: {e}", path.display())))?;
        let mut index: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::IndexCorruption(format!("lexical store {}: {e}", path.display())))?;
        index.analyzer = Analyzer::new(index.params.stop_words);
        index.rebuild_id_map()?;
        Ok(index)
    }

    fn rebuild_id_map(&mut self) -> Result<()> {
        if self.doc_lengths.len() != self.chunks.len() {
            return Err(Error::IndexCorruption(format!(
                "lexical store has {} chunks but {} length entries",
                self.chunks.len(),
                self.doc_lengths.len()
            )));
        }
        let n = self.chunks.len() as u32;
        if self.postings.values().flatten().any(|p| p.ordinal >= n) {
            return Err(Error::IndexCorruption("lexical posting points past the chunk catalog".into()));
        }
        self.by_id.clear();
        for (ordinal, chunk) in self.chunks.iter().enumerate() {
            if self.by_id.insert(chunk.id.clone(), ordinal as u32).is_some() {
                return Err(Error::IndexCorruption(format!("duplicate chunk id {} in lexical store", chunk.id)));
            }
        }
        Ok(())
    }
}

impl LexicalRetriever for Bm25Index {
    fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredResult>> { Ok(Bm25Index::search(self, query, k)) }
}
