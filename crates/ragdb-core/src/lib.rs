//! ragdb-core
//!
//! Shared domain types, error taxonomy, configuration and the chunker used by
//! the lexical and vector engines.

pub mod chunker;
pub mod config;
pub mod corpus;
pub mod error;
pub mod traits;
pub mod types;

pub use chunker::Chunker;
pub use config::{Config, Settings};
pub use error::{Error, Result};
