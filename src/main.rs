//! # Page RAG CLI (`page-rag`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `page-rag init` | Create the SQLite database and run schema migrations |
//! | `page-rag serve` | Start the HTTP API server |
//! | `page-rag embed pending` | Index pages with missing or stale embeddings |
//! | `page-rag embed rebuild` | Delete and regenerate all embeddings |
//! | `page-rag search "<query>"` | Print the nearest chunks with distances |
//! | `page-rag ask "<question>"` | Answer one question through the RAG pipeline |
//!
//! Every setting can be given as a flag or an environment variable, e.g.
//! `OLLAMA_HOST=http://gpu-box:11434 page-rag serve`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use page_rag::config::{self, ConfigArgs};
use page_rag::embedding::{Embedder, OllamaEmbedder};
use page_rag::generation::{Generator, OllamaGenerator};
use page_rag::indexer::{self, IndexSettings};
use page_rag::prompt::PromptRenderer;
use page_rag::rag::RagPipeline;
use page_rag::retrieve::RetrieveParams;
use page_rag::{db, logging, migrate, server};

/// Page store with a retrieval-augmented chat endpoint backed by Ollama.
#[derive(Parser)]
#[command(name = "page-rag", version, about)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    Serve,

    /// Manage the embedding index.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Print the chunks nearest to a query.
    Search {
        query: String,

        /// Maximum number of chunks (defaults to RETRIEVAL_LIMIT).
        #[arg(long)]
        limit: Option<usize>,

        /// Keep only chunks with cosine distance below this value.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Answer a question from the indexed pages.
    Ask { question: String },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Index pages that have no chunks or whose content changed.
    Pending,
    /// Delete every chunk and re-index all pages.
    Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    logging::init(&cfg.logging.level, &cfg.logging.dir)
        .context("Failed to initialize logging")?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Embed { action } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            let embedder = OllamaEmbedder::new(&cfg.ollama)?;
            let settings = IndexSettings::from_config(&cfg);

            if let EmbedAction::Rebuild = action {
                let removed = indexer::clear_index(&pool).await?;
                println!("Removed {} chunks.", removed);
            }

            let report = indexer::index_pending(&pool, &embedder, &settings).await?;
            println!(
                "Indexed {} pages ({} chunks), {} without text, {} failed.",
                report.pages, report.chunks, report.empty, report.failed
            );
            if report.failed > 0 {
                anyhow::bail!(
                    "{} pages failed to index; run `page-rag embed pending` once the embedding backend is reachable",
                    report.failed
                );
            }
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            let embedder = OllamaEmbedder::new(&cfg.ollama)?;

            let mut params = RetrieveParams::new(limit.unwrap_or(cfg.retrieval.limit));
            params.similarity_threshold = threshold.or(cfg.retrieval.similarity_threshold);

            let results =
                page_rag::retrieve::retrieve(&pool, &embedder, &query, params).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (rank, r) in results.iter().enumerate() {
                println!(
                    "{}. [{:.4}] page {} chunk {}",
                    rank + 1,
                    r.distance,
                    r.chunk.page_id,
                    r.chunk.chunk_seq
                );
                println!("   {}", r.chunk.chunk.replace('\n', " "));
            }
        }
        Commands::Ask { question } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            let prompts = Arc::new(PromptRenderer::load(&cfg.prompts.templates_dir)?);
            let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&cfg.ollama)?);
            let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(&cfg.ollama)?);

            let rag = RagPipeline::new(pool, embedder, generator, prompts, &cfg);
            let answer = rag.answer(&question).await?;
            println!("{}", answer);
        }
    }

    Ok(())
}
