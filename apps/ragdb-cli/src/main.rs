//! `ragdb`: build and query the hybrid retrieval stores.
//!
//! Usage:
//!   ragdb ingest [--force]          # build stores for the configured corpus
//!   ragdb query "<question>"        # ranked passages with provenance
//!   ragdb prompt "<question>"       # the prompt an answer generator would receive
//!   ragdb status                    # committed corpus versions

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use tracing_subscriber::EnvFilter;

use ragdb_core::config::{Config, Settings};
use ragdb_core::corpus::load_documents;
use ragdb_embed::get_default_embedder;
use ragdb_hybrid::{build_prompt, IndexPair, IngestMode, IngestionPipeline, QueryPipeline, StoreLayout};

#[derive(Parser)]
#[command(name = "ragdb", version, about = "Hybrid BM25 + vector retrieval over a scraped corpus")]
struct Cli {
    /// Directory that relative data paths are resolved against
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Override `data.corpus_path`
    #[arg(long)]
    corpus: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and index the corpus
    Ingest {
        /// Rebuild even if stores for this corpus version exist
        #[arg(long)]
        force: bool,
    },
    /// Retrieve passages for a question
    Query {
        query: String,
        /// Number of passages (defaults to `retrieval.k`)
        #[arg(short, long)]
        k: Option<usize>,
        /// Print passages as JSON
        #[arg(long)]
        json: bool,
    },
    /// Render the answer-generation prompt for a question
    Prompt { query: String },
    /// List committed corpus versions
    Status,
}

struct App {
    settings: Settings,
    base_dir: PathBuf,
    corpus: Option<String>,
}

impl App {
    fn index_dir(&self) -> PathBuf { self.settings.data.index_dir(&self.base_dir) }

    fn corpus_path(&self) -> PathBuf {
        match &self.corpus {
            Some(p) => ragdb_core::config::resolve_with_base(&self.base_dir, p),
            None => self.settings.data.corpus_path(&self.base_dir),
        }
    }

    /// Load the stores for the current corpus, building them when missing.
    async fn open(&self, mode: IngestMode, progress: ProgressBar) -> Result<(IndexPair, bool)> {
        let corpus = self.corpus_path();
        let documents = load_documents(&corpus).with_context(|| format!("loading corpus {}", corpus.display()))?;
        let embedder = get_default_embedder(&self.settings.embedding)?;
        let pipeline = IngestionPipeline::new(self.index_dir(), embedder, &self.settings)?.with_progress(progress);
        let (report, pair) = pipeline.ingest(&documents, mode).await?;
        if report.skipped {
            tracing::info!(corpus_version = %report.corpus_version, chunks = report.chunks, "using existing stores");
        } else {
            println!(
                "Indexed {} documents into {} chunks (corpus version {})",
                report.documents, report.chunks, report.corpus_version
            );
        }
        Ok((pair, report.skipped))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "info,ragdb_cli=debug,ragdb_core=debug,ragdb_text=debug,ragdb_embed=debug,ragdb_vector=debug,ragdb_hybrid=debug"
    } else {
        "info,lance=warn,lancedb=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = Config::load()?.settings()?;
    let app = App { settings, base_dir: cli.base_dir, corpus: cli.corpus };

    match cli.command {
        Command::Ingest { force } => {
            let mode = if force { IngestMode::ForceRebuild } else { IngestMode::Reuse };
            let (pair, skipped) = app.open(mode, ProgressBar::new(0)).await?;
            if skipped {
                println!(
                    "Stores for corpus version {} already exist ({} chunks); use --force to rebuild",
                    pair.manifest.corpus_version, pair.manifest.chunk_count
                );
            }
        }
        Command::Query { query, k, json } => {
            let (pair, _) = app.open(IngestMode::Reuse, ProgressBar::hidden()).await?;
            let mut retrieval = app.settings.retrieval.clone();
            if let Some(k) = k {
                retrieval.k = k;
            }
            let embedder = get_default_embedder(&app.settings.embedding)?;
            let pipeline = QueryPipeline::from_indexes(&pair, embedder, &retrieval)?;
            let ctx = pipeline.answer_context(&query).await?;
            for w in &ctx.warnings {
                eprintln!("warning: {w}");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&ctx.passages)?);
            } else if ctx.passages.is_empty() {
                println!("No passages matched.");
            } else {
                for p in &ctx.passages {
                    println!("#{} [{:.5}] {} | {} | {}", p.rank, p.fused_score, p.source_url, p.section, p.title);
                    println!("    {}", p.content.replace('\n', "\n    "));
                }
            }
        }
        Command::Prompt { query } => {
            let (pair, _) = app.open(IngestMode::Reuse, ProgressBar::hidden()).await?;
            let embedder = get_default_embedder(&app.settings.embedding)?;
            let pipeline = QueryPipeline::from_indexes(&pair, embedder, &app.settings.retrieval)?;
            let ctx = pipeline.answer_context(&query).await?;
            for w in &ctx.warnings {
                eprintln!("warning: {w}");
            }
            println!("{}", build_prompt(&query, &ctx.passages));
        }
        Command::Status => {
            let index_dir = app.index_dir();
            let manifests = StoreLayout::list(&index_dir)?;
            if manifests.is_empty() {
                println!("No stores under {}", index_dir.display());
            }
            for m in manifests {
                println!(
                    "{}  chunks={}  embedder={}  dim={}  built={}",
                    m.corpus_version,
                    m.chunk_count,
                    m.embedder_id,
                    m.dim,
                    m.built_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
    }
    Ok(())
}
