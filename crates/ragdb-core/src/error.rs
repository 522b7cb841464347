use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed document or chunking failure.
    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    /// Embedding provider call failed. Retryable errors are retried with
    /// backoff during ingestion.
    #[error("Embedding provider error: {message}")]
    Provider { message: String, retryable: bool },

    /// Persisted store unreadable, or the lexical and vector chunk sets
    /// disagree. Requires a rebuild.
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    /// Neither retriever produced a ranking.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider { message: message.into(), retryable }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
