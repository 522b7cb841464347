//! Ensemble retrieval: lexical and vector search run concurrently and their
//! rankings are fused. A side that errors or misses the deadline is dropped
//! with a warning; the query only fails when neither side answers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use ragdb_core::config::RetrievalSettings;
use ragdb_core::traits::{EmbeddingProvider, LexicalRetriever, VectorRetriever};
use ragdb_core::types::{DegradeReason, FusedResult, RetrievalWarning, ScoredResult, SourceKind};
use ragdb_core::{Error, Result};

use crate::fusion::{fuse, RankedList};

/// Fused results plus any degradation warnings for this query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    pub results: Vec<FusedResult>,
    pub warnings: Vec<RetrievalWarning>,
}

impl Retrieval {
    pub fn is_degraded(&self) -> bool { !self.warnings.is_empty() }
}

pub struct EnsembleRetriever {
    lexical: Arc<dyn LexicalRetriever>,
    vector: Arc<dyn VectorRetriever>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: RetrievalSettings,
}

type SideOutcome = std::result::Result<Vec<ScoredResult>, DegradeReason>;

async fn bounded<F>(fut: F, deadline: Option<Instant>) -> SideOutcome
where
    F: Future<Output = Result<Vec<ScoredResult>>>,
{
    let res = match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.map_err(|_| DegradeReason::DeadlineElapsed)?,
        None => fut.await,
    };
    res.map_err(|e| DegradeReason::Failed(e.to_string()))
}

impl EnsembleRetriever {
    /// Fails with `InvalidConfig` for negative, non-finite or all-zero
    /// weights; a misconfigured side is never silently dropped.
    pub fn new(
        lexical: Arc<dyn LexicalRetriever>,
        vector: Arc<dyn VectorRetriever>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self { lexical, vector, embedder, settings })
    }

    pub fn settings(&self) -> &RetrievalSettings { &self.settings }

    /// Retrieve the top `k` fused results. `retrieval.deadline_ms`, when set,
    /// bounds the whole query.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Retrieval> {
        let deadline = self.settings.deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        self.run(query, k, deadline).await
    }

    /// Like [`retrieve`](Self::retrieve) with an explicit deadline. Whatever
    /// finished by then is fused; the rest is reported as degraded.
    pub async fn retrieve_with_deadline(&self, query: &str, k: usize, deadline: Instant) -> Result<Retrieval> {
        self.run(query, k, Some(deadline)).await
    }

    async fn run(&self, query: &str, k: usize, deadline: Option<Instant>) -> Result<Retrieval> {
        let depth = self.settings.k_candidates.max(k);
        let use_lexical = self.settings.lexical_weight > 0.0;
        let use_vector = self.settings.vector_weight > 0.0;

        let lexical = async {
            if !use_lexical {
                return None;
            }
            let index = Arc::clone(&self.lexical);
            let q = query.to_string();
            let task = async move {
                tokio::task::spawn_blocking(move || index.search(&q, depth))
                    .await
                    .map_err(|e| Error::Storage(format!("lexical search task: {e}")))?
            };
            Some(bounded(task, deadline).await)
        };
        let vector = async {
            if !use_vector {
                return None;
            }
            let task = async {
                let embedding = self.embedder.embed(query).await?;
                self.vector.search_vec(&embedding, depth).await
            };
            Some(bounded(task, deadline).await)
        };
        let (lexical, vector) = tokio::join!(lexical, vector);

        let mut warnings = Vec::new();
        let mut failures = Vec::new();
        let mut settle = |source: SourceKind, outcome: Option<SideOutcome>| -> Option<Vec<ScoredResult>> {
            match outcome? {
                Ok(hits) => Some(hits),
                Err(reason) => {
                    tracing::warn!(%source, %reason, "retriever degraded; continuing with the other side");
                    failures.push(format!("{source} {reason}"));
                    warnings.push(RetrievalWarning::Degraded { source, reason });
                    None
                }
            }
        };
        let lexical = settle(SourceKind::Lexical, lexical);
        let vector = settle(SourceKind::Vector, vector);

        if lexical.is_none() && vector.is_none() {
            return Err(Error::RetrievalUnavailable(failures.join("; ")));
        }

        let mut lists = Vec::with_capacity(2);
        if let Some(hits) = &lexical {
            lists.push(RankedList::new(SourceKind::Lexical, self.settings.lexical_weight, hits));
        }
        if let Some(hits) = &vector {
            lists.push(RankedList::new(SourceKind::Vector, self.settings.vector_weight, hits));
        }
        let results = fuse(&lists, self.settings.rank_constant, k);
        tracing::debug!(
            query,
            lexical = lexical.as_ref().map(Vec::len),
            vector = vector.as_ref().map(Vec::len),
            fused = results.len(),
            "ensemble retrieval"
        );
        Ok(Retrieval { results, warnings })
    }
}
