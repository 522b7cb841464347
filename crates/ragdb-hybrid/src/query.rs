//! Query pipeline: fused retrieval flattened into passages with provenance,
//! plus the prompt handed to an external answer generator.

use std::fmt::Write as _;
use std::sync::Arc;

use ragdb_core::config::RetrievalSettings;
use ragdb_core::traits::{AnswerGenerator, EmbeddingProvider};
use ragdb_core::types::{Passage, RetrievalWarning};
use ragdb_core::{Error, Result};
use ragdb_text::Bm25Index;

use crate::ensemble::EnsembleRetriever;
use crate::store::IndexPair;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerContext {
    pub passages: Vec<Passage>,
    pub warnings: Vec<RetrievalWarning>,
}

pub struct QueryPipeline<'a> {
    retriever: EnsembleRetriever,
    catalog: &'a Bm25Index,
    k: usize,
}

impl<'a> QueryPipeline<'a> {
    /// `catalog` resolves fused chunk ids back to their content.
    pub fn new(retriever: EnsembleRetriever, catalog: &'a Bm25Index, k: usize) -> Self {
        Self { retriever, catalog, k }
    }

    pub fn from_indexes(
        indexes: &'a IndexPair,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: &RetrievalSettings,
    ) -> Result<Self> {
        let retriever = EnsembleRetriever::new(
            indexes.lexical.clone(),
            indexes.vector.clone(),
            embedder,
            settings.clone(),
        )?;
        Ok(Self::new(retriever, &indexes.lexical, settings.k))
    }

    pub fn retriever(&self) -> &EnsembleRetriever { &self.retriever }

    pub async fn answer_context(&self, query: &str) -> Result<AnswerContext> {
        if query.trim().is_empty() {
            return Ok(AnswerContext::default());
        }
        let retrieval = self.retriever.retrieve(query, self.k).await?;
        let passages = retrieval
            .results
            .iter()
            .enumerate()
            .map(|(i, fused)| {
                let chunk = self.catalog.chunk(&fused.chunk_id).ok_or_else(|| {
                    Error::IndexCorruption(format!("retrieved chunk {} is missing from the catalog", fused.chunk_id))
                })?;
                Ok(Passage::from_chunk(i + 1, chunk, fused.fused_score))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AnswerContext { passages, warnings: retrieval.warnings })
    }

    /// Retrieve context for `query` and hand it to `generator`.
    pub async fn answer(&self, query: &str, generator: &dyn AnswerGenerator) -> Result<(String, AnswerContext)> {
        let context = self.answer_context(query).await?;
        let answer = generator.generate(query, &context.passages).await?;
        Ok((answer, context))
    }
}

/// Render the answer-generation prompt: instructions, the question, then the
/// numbered passages with their provenance.
pub fn build_prompt(query: &str, passages: &[Passage]) -> String {
    let mut prompt = String::from(
        "You are an information assistant for the program described in the context below. \
         Answer the question based solely on the retrieved information. \
         If the context does not contain the answer, say that you do not know.\n\n",
    );
    let _ = writeln!(prompt, "Question: {}\n", query.trim());
    prompt.push_str("Context:\n");
    if passages.is_empty() {
        prompt.push_str("(no relevant passages were retrieved)\n");
    }
    for p in passages {
        let mut provenance = vec![p.source_url.as_str()];
        if !p.section.is_empty() {
            provenance.push(&p.section);
        }
        if !p.title.is_empty() {
            provenance.push(&p.title);
        }
        let _ = writeln!(prompt, "[{}] ({})\n{}\n", p.rank, provenance.join(" | "), p.content.trim());
    }
    prompt.push_str("Answer:");
    prompt
}
