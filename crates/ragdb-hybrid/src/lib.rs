//! ragdb-hybrid
//!
//! Ties the lexical and vector stores together: ingestion builds both from
//! one chunk set, the ensemble retriever queries both and fuses the rankings,
//! and the query pipeline turns fused ids into passages.

pub mod ensemble;
pub mod fusion;
pub mod ingest;
pub mod query;
pub mod store;

pub use ensemble::{EnsembleRetriever, Retrieval};
pub use ingest::{IngestMode, IngestReport, IngestionPipeline};
pub use query::{build_prompt, AnswerContext, QueryPipeline};
pub use store::{open_indexes, IndexPair, StoreLayout, StoreManifest};
