use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use ragdb_core::chunker::Chunker;
use ragdb_core::config::{LexicalSettings, ProviderKind, RetrievalSettings, Settings};
use ragdb_core::traits::{AnswerGenerator, EmbeddingProvider, LexicalRetriever, VectorRetriever};
use ragdb_core::types::{DegradeReason, Document, Passage, RetrievalWarning, ScoredResult, SourceKind};
use ragdb_core::{Error, Result};
use ragdb_embed::{HashingEmbedder, RetryPolicy};
use ragdb_hybrid::{
    build_prompt, open_indexes, EnsembleRetriever, IngestMode, IngestionPipeline, QueryPipeline, StoreLayout,
    StoreManifest,
};
use ragdb_text::Bm25Index;

const DIM: usize = 4096;

fn settings() -> Settings {
    let mut s = Settings::default();
    s.embedding.provider = ProviderKind::Hashing;
    s.embedding.dim = DIM;
    s.embedding.batch_size = 2;
    s.embedding.concurrency = 2;
    s
}

fn corpus() -> Vec<Document> {
    vec![
        Document::new("https://example.edu/a", "Admissions", "Prerequisites", "The program requires a statistics background."),
        Document::new("https://example.edu/b", "Tuition", "Costs", "Tuition is due each quarter."),
        Document::new("https://example.edu/c", "Curriculum", "Electives", "Electives include deep learning and causal inference."),
    ]
}

fn embedder() -> Arc<dyn EmbeddingProvider> { Arc::new(HashingEmbedder::new(DIM)) }

fn fast_retry() -> RetryPolicy {
    RetryPolicy { max_retries: 2, initial_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(2) }
}

fn lexical_index() -> Arc<Bm25Index> {
    let chunker = Chunker::default();
    let chunks: Vec<_> = corpus().iter().flat_map(|d| chunker.split(d).expect("split")).collect();
    Arc::new(Bm25Index::from_chunks(LexicalSettings::default(), &chunks))
}

struct BrokenVector;

#[async_trait]
impl VectorRetriever for BrokenVector {
    async fn search_vec(&self, _query: &[f32], _k: usize) -> Result<Vec<ScoredResult>> {
        Err(Error::Storage("vector store offline".into()))
    }
}

struct StalledVector;

#[async_trait]
impl VectorRetriever for StalledVector {
    async fn search_vec(&self, _query: &[f32], _k: usize) -> Result<Vec<ScoredResult>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

struct GhostVector;

#[async_trait]
impl VectorRetriever for GhostVector {
    async fn search_vec(&self, _query: &[f32], _k: usize) -> Result<Vec<ScoredResult>> {
        Ok(vec![ScoredResult { chunk_id: "ghost".into(), score: 0.9, rank: 1 }])
    }
}

struct SlowLexical;

impl LexicalRetriever for SlowLexical {
    fn search(&self, _query: &str, _k: usize) -> Result<Vec<ScoredResult>> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(Vec::new())
    }
}

struct DownEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    fn embedder_id(&self) -> &str { "down:d8" }
    fn dim(&self) -> usize { 8 }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::provider("503 Service Unavailable", true))
    }
}

struct EchoGenerator;

#[async_trait]
impl AnswerGenerator for EchoGenerator {
    async fn generate(&self, query: &str, passages: &[Passage]) -> Result<String> {
        Ok(build_prompt(query, passages))
    }
}

#[tokio::test]
async fn statistics_question_ranks_doc_a_first() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = IngestionPipeline::new(tmp.path(), embedder(), &settings()).expect("pipeline");
    let (report, pair) = pipeline.ingest(&corpus(), IngestMode::Reuse).await.expect("ingest");
    assert!(!report.skipped);
    assert_eq!((report.documents, report.chunks), (3, 3));

    let query = QueryPipeline::from_indexes(&pair, embedder(), &settings().retrieval).expect("query pipeline");
    let ctx = query.answer_context("Does the program need statistics experience?").await.expect("query");
    assert!(ctx.warnings.is_empty());
    assert!(!ctx.passages.is_empty());
    let top = &ctx.passages[0];
    assert_eq!(top.rank, 1);
    assert_eq!(top.source_url, "https://example.edu/a");
    assert_eq!(top.section, "Admissions");
    assert_eq!(top.content, "The program requires a statistics background.");

    let (answer, _) = query.answer("Does the program need statistics experience?", &EchoGenerator).await.expect("answer");
    assert!(answer.contains("[1] (https://example.edu/a | Admissions | Prerequisites)"));
}

#[tokio::test]
async fn absent_term_returns_nothing() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = IngestionPipeline::new(tmp.path(), embedder(), &settings()).expect("pipeline");
    let (_, pair) = pipeline.ingest(&corpus(), IngestMode::Reuse).await.expect("ingest");
    let query = QueryPipeline::from_indexes(&pair, embedder(), &settings().retrieval).expect("query pipeline");

    let ctx = query.answer_context("zebra").await.expect("query");
    assert!(ctx.passages.is_empty(), "{:?}", ctx.passages);
    assert!(ctx.warnings.is_empty());
    assert!(query.answer_context("   ").await.expect("blank").passages.is_empty());
}

#[tokio::test]
async fn reopened_stores_give_identical_results() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = IngestionPipeline::new(tmp.path(), embedder(), &settings()).expect("pipeline");
    let queries = ["statistics background", "tuition quarter", "deep learning electives", "program"];

    let mut before = Vec::new();
    let layout = {
        let (_, pair) = pipeline.ingest(&corpus(), IngestMode::Reuse).await.expect("ingest");
        let query = QueryPipeline::from_indexes(&pair, embedder(), &settings().retrieval).expect("query pipeline");
        for q in queries {
            before.push(query.answer_context(q).await.expect("query"));
        }
        pipeline.layout(&corpus())
    };

    let embedder = embedder();
    let pair = open_indexes(&layout, embedder.as_ref(), &settings().vector).await.expect("reopen");
    let query = QueryPipeline::from_indexes(&pair, embedder.clone(), &settings().retrieval).expect("query pipeline");
    for (q, expected) in queries.iter().zip(&before) {
        let got = query.answer_context(q).await.expect("query");
        assert_eq!(&got, expected, "query '{q}'");
    }
}

#[tokio::test]
async fn second_ingest_skips_and_force_rebuilds() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = IngestionPipeline::new(tmp.path(), embedder(), &settings()).expect("pipeline");
    let (first, _) = pipeline.ingest(&corpus(), IngestMode::Reuse).await.expect("first");
    let (second, pair) = pipeline.ingest(&corpus(), IngestMode::Reuse).await.expect("second");
    assert!(!first.skipped);
    assert!(second.skipped);
    assert_eq!(first.corpus_version, second.corpus_version);
    assert_eq!(pair.chunk_count(), 3);
    drop(pair);

    let (forced, pair) = pipeline.ingest(&corpus(), IngestMode::ForceRebuild).await.expect("forced");
    assert!(!forced.skipped);
    assert_eq!(forced.corpus_version, first.corpus_version);
    assert_eq!(pair.lexical.len(), 3);

    let entries: Vec<_> = fs::read_dir(tmp.path()).expect("read_dir").map(|e| e.expect("entry").file_name()).collect();
    assert_eq!(entries.len(), 1, "only the committed version remains: {entries:?}");
}

#[tokio::test]
async fn corpus_change_yields_new_version() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = IngestionPipeline::new(tmp.path(), embedder(), &settings()).expect("pipeline");
    let mut docs = corpus();
    let v1 = pipeline.corpus_version(&docs);
    docs.push(Document::new("https://example.edu/d", "", "", "Office hours are on Fridays."));
    assert_ne!(v1, pipeline.corpus_version(&docs));

    let mut pinned = settings();
    pinned.store.corpus_version = Some("2024-fall".into());
    let pinned = IngestionPipeline::new(tmp.path(), embedder(), &pinned).expect("pipeline");
    assert_eq!(pinned.corpus_version(&docs), "2024-fall");
}

#[tokio::test]
async fn superseded_derived_versions_are_retired() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = IngestionPipeline::new(tmp.path(), embedder(), &settings()).expect("pipeline");
    let (first, pair) = pipeline.ingest(&corpus(), IngestMode::Reuse).await.expect("first");
    drop(pair);

    let mut docs = corpus();
    docs.push(Document::new("https://example.edu/d", "", "", "Office hours are on Fridays."));
    let (second, pair) = pipeline.ingest(&docs, IngestMode::Reuse).await.expect("second");
    drop(pair);
    assert_ne!(first.corpus_version, second.corpus_version);
    assert!(!tmp.path().join(&first.corpus_version).exists(), "older derived version retired");
    assert!(pipeline.layout(&docs).exists());

    // Configured versions replace derived ones but are never retired themselves.
    let mut pinned = settings();
    pinned.store.corpus_version = Some("2024-fall".into());
    let pinned = IngestionPipeline::new(tmp.path(), embedder(), &pinned).expect("pipeline");
    let (_, pair) = pinned.ingest(&docs, IngestMode::Reuse).await.expect("pinned");
    drop(pair);
    assert!(!tmp.path().join(&second.corpus_version).exists());

    let (third, _) = pipeline.ingest(&corpus(), IngestMode::Reuse).await.expect("third");
    let mut versions: Vec<_> = StoreLayout::list(tmp.path())
        .expect("list")
        .into_iter()
        .map(|m| m.corpus_version)
        .collect();
    versions.sort();
    let mut expected = vec!["2024-fall".to_string(), third.corpus_version];
    expected.sort();
    assert_eq!(versions, expected);
}

#[tokio::test]
async fn provider_failure_commits_nothing() {
    let tmp = TempDir::new().expect("tmp");
    let down = Arc::new(DownEmbedder { calls: AtomicUsize::new(0) });
    let pipeline = IngestionPipeline::new(tmp.path(), down.clone(), &settings())
        .expect("pipeline")
        .with_retry_policy(fast_retry());
    let layout = pipeline.layout(&corpus());

    let err = pipeline.ingest(&corpus(), IngestMode::Reuse).await.err().expect("must fail");
    assert!(matches!(err, Error::Provider { .. }), "{err}");
    assert!(down.calls.load(Ordering::SeqCst) >= 3, "retried before giving up");
    assert!(!layout.version_dir().exists());
    assert!(!layout.staging_dir().exists());
}

#[tokio::test]
async fn malformed_document_is_rejected() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = IngestionPipeline::new(tmp.path(), embedder(), &settings()).expect("pipeline");
    let mut docs = corpus();
    docs.push(Document::new("", "x", "y", "orphan text"));
    let err = pipeline.ingest(&docs, IngestMode::Reuse).await.err().expect("must fail");
    assert!(matches!(err, Error::Ingestion(_)), "{err}");
}

#[tokio::test]
async fn tampered_stores_raise_corruption() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = IngestionPipeline::new(tmp.path(), embedder(), &settings()).expect("pipeline");
    let (_, pair) = pipeline.ingest(&corpus(), IngestMode::Reuse).await.expect("ingest");
    drop(pair);
    let layout = pipeline.layout(&corpus());

    let mut manifest = StoreManifest::load(&layout.manifest_path()).expect("manifest");
    manifest.chunk_digest = "0".repeat(64);
    manifest.save(&layout.manifest_path()).expect("save");
    let err = open_indexes(&layout, embedder().as_ref(), &settings().vector).await.err().expect("digest");
    assert!(matches!(err, Error::IndexCorruption(_)), "{err}");
    let err = pipeline.ingest(&corpus(), IngestMode::Reuse).await.err().expect("reuse refuses");
    assert!(matches!(err, Error::IndexCorruption(_)), "{err}");

    // A store built by a different embedder is never silently reused.
    let other: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(64));
    let err = open_indexes(&layout, other.as_ref(), &settings().vector).await.err().expect("embedder");
    assert!(matches!(err, Error::IndexCorruption(_)), "{err}");

    fs::write(layout.lexical_path(), b"[]").expect("truncate");
    let err = open_indexes(&layout, embedder().as_ref(), &settings().vector).await.err().expect("lexical");
    assert!(matches!(err, Error::IndexCorruption(_)), "{err}");

    // Forcing a rebuild recovers.
    let (report, _) = pipeline.ingest(&corpus(), IngestMode::ForceRebuild).await.expect("rebuild");
    assert!(!report.skipped);
}

#[tokio::test]
async fn vector_failure_degrades_to_lexical() {
    let lexical = lexical_index();
    let retriever = EnsembleRetriever::new(lexical.clone(), Arc::new(BrokenVector), embedder(), RetrievalSettings::default())
        .expect("retriever");
    let retrieval = retriever.retrieve("statistics background", 5).await.expect("degraded, not failed");

    assert!(retrieval.is_degraded());
    assert!(matches!(
        retrieval.warnings.as_slice(),
        [RetrievalWarning::Degraded { source: SourceKind::Vector, reason: DegradeReason::Failed(_) }]
    ));
    let lexical_ids: Vec<_> = lexical.search("statistics background", 5).into_iter().map(|h| h.chunk_id).collect();
    let fused_ids: Vec<_> = retrieval.results.iter().map(|r| r.chunk_id.clone()).collect();
    assert_eq!(fused_ids, lexical_ids);
    assert!(retrieval.results.iter().all(|r| r.vector_rank.is_none()));
}

#[tokio::test]
async fn query_embedding_failure_degrades_to_lexical() {
    let lexical = lexical_index();
    let down = Arc::new(DownEmbedder { calls: AtomicUsize::new(0) });
    let retriever = EnsembleRetriever::new(lexical.clone(), Arc::new(GhostVector), down.clone(), RetrievalSettings::default())
        .expect("retriever");
    let retrieval = retriever.retrieve("tuition quarter", 5).await.expect("degraded, not failed");

    match retrieval.warnings.as_slice() {
        [RetrievalWarning::Degraded { source: SourceKind::Vector, reason: DegradeReason::Failed(msg) }] => {
            assert!(msg.contains("503"), "{msg}");
        }
        other => panic!("unexpected warnings: {other:?}"),
    }
    assert_eq!(down.calls.load(Ordering::SeqCst), 1, "query embedding is not retried");
    let lexical_ids: Vec<_> = lexical.search("tuition quarter", 5).into_iter().map(|h| h.chunk_id).collect();
    let fused_ids: Vec<_> = retrieval.results.iter().map(|r| r.chunk_id.clone()).collect();
    assert!(!fused_ids.is_empty());
    assert_eq!(fused_ids, lexical_ids);
}

#[test]
fn misconfigured_weights_are_rejected_by_the_retriever() {
    let cases = [(-1.0, 1.0), (f64::NAN, 0.5), (0.5, f64::INFINITY), (0.0, 0.0)];
    for (lexical_weight, vector_weight) in cases {
        let settings = RetrievalSettings { lexical_weight, vector_weight, ..RetrievalSettings::default() };
        let err = EnsembleRetriever::new(lexical_index(), Arc::new(BrokenVector), embedder(), settings)
            .err()
            .expect("invalid weights");
        assert!(matches!(err, Error::InvalidConfig(_)), "({lexical_weight}, {vector_weight}): {err}");
    }
}

#[tokio::test]
async fn misconfigured_weights_are_rejected_by_the_query_pipeline() {
    let tmp = TempDir::new().expect("tmp");
    let pipeline = IngestionPipeline::new(tmp.path(), embedder(), &settings()).expect("pipeline");
    let (_, pair) = pipeline.ingest(&corpus(), IngestMode::Reuse).await.expect("ingest");
    let retrieval = RetrievalSettings { lexical_weight: -0.5, ..RetrievalSettings::default() };
    let err = QueryPipeline::from_indexes(&pair, embedder(), &retrieval).err().expect("invalid weights");
    assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
}

#[tokio::test]
async fn stalled_side_misses_deadline() {
    let retriever = EnsembleRetriever::new(lexical_index(), Arc::new(StalledVector), embedder(), RetrievalSettings::default())
        .expect("retriever");
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    let retrieval = retriever.retrieve_with_deadline("tuition", 5, deadline).await.expect("lexical side answers");

    assert_eq!(
        retrieval.warnings,
        vec![RetrievalWarning::Degraded { source: SourceKind::Vector, reason: DegradeReason::DeadlineElapsed }]
    );
    assert!(!retrieval.results.is_empty());
    assert!(retrieval.results[0].lexical_rank.is_some());
}

#[tokio::test]
async fn both_sides_failing_is_unavailable() {
    let retriever =
        EnsembleRetriever::new(Arc::new(SlowLexical), Arc::new(StalledVector), embedder(), RetrievalSettings::default())
            .expect("retriever");
    let deadline = tokio::time::Instant::now() + Duration::from_millis(50);
    let err = retriever.retrieve_with_deadline("tuition", 5, deadline).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable(_)), "{err}");

    let retriever =
        EnsembleRetriever::new(Arc::new(SlowLexical), Arc::new(BrokenVector), embedder(), RetrievalSettings::default())
            .expect("retriever");
    let retrieval = retriever.retrieve("tuition", 5).await.expect("lexical answered with nothing");
    assert!(retrieval.results.is_empty());
    assert_eq!(retrieval.warnings.len(), 1);
}

#[tokio::test]
async fn fused_id_missing_from_catalog_is_corruption() {
    let lexical = lexical_index();
    let settings = RetrievalSettings { lexical_weight: 0.0, vector_weight: 1.0, ..RetrievalSettings::default() };
    let retriever = EnsembleRetriever::new(lexical.clone(), Arc::new(GhostVector), embedder(), settings).expect("retriever");
    let query = QueryPipeline::new(retriever, &lexical, 5);
    let err = query.answer_context("anything").await.unwrap_err();
    assert!(matches!(err, Error::IndexCorruption(_)), "{err}");
}
