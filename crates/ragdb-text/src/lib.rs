//! ragdb-text
//!
//! Lexical retrieval: tantivy text analysis feeding a BM25 posting store that
//! persists as a single JSON artifact.

pub mod analyzer;
pub mod bm25;

pub use analyzer::Analyzer;
pub use bm25::Bm25Index;
