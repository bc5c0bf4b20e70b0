//! # lexrag CLI
//!
//! Composes the library for local use: load a corpus, answer a question,
//! inspect chunking, or summarize the metrics log.
//!
//! ```bash
//! lexrag --config ./config/lexrag.toml ask "What is input tax credit?"
//! lexrag --config ./config/lexrag.toml chunk ./corpus/cgst_act.txt
//! lexrag --config ./config/lexrag.toml metrics
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lexrag::chunk::Chunker;
use lexrag::config::{load_config, Config};
use lexrag::embedding::create_provider;
use lexrag::ingest::{ingest_documents, load_corpus};
use lexrag::metrics::{load_records, MetricsSummary};
use lexrag::models::RawDocument;
use lexrag::pipeline::{AnswerOptions, Pipeline};
use lexrag::store::memory::InMemoryVectorStore;

#[derive(Parser)]
#[command(
    name = "lexrag",
    about = "Hybrid retrieval-augmented answering over legal and financial documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lexrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the configured corpus and answer one question.
    Ask {
        question: String,

        /// Score in the background instead of before printing.
        #[arg(long)]
        background: bool,

        /// Number of results to retrieve.
        #[arg(long)]
        k: Option<usize>,

        /// Minimum final score for a result to be used as context.
        #[arg(long)]
        min_similarity: Option<f64>,
    },

    /// Chunk a single file and print the chunks.
    Chunk {
        path: PathBuf,

        /// Document label used in the context header.
        #[arg(long)]
        name: Option<String>,
    },

    /// Summarize the metrics log.
    Metrics {
        /// Log to read instead of the configured one.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "config not found, using defaults");
        Config::default()
    };

    match cli.command {
        Commands::Ask {
            question,
            background,
            k,
            min_similarity,
        } => {
            let mut opts = AnswerOptions::from_config(&config);
            if let Some(k) = k {
                opts.k = k;
            }
            if let Some(min) = min_similarity {
                opts.min_similarity = min;
            }
            ask(&config, &question, opts, background || config.scoring.background).await
        }
        Commands::Chunk { path, name } => chunk_file(&config, &path, name),
        Commands::Metrics { path } => {
            let path = path.unwrap_or_else(|| config.metrics.path.clone());
            let records = load_records(&path)?;
            println!("lexrag metrics: {}", path.display());
            println!();
            print!("{}", MetricsSummary::from_records(&records));
            Ok(())
        }
    }
}

async fn ask(config: &Config, question: &str, opts: AnswerOptions, background: bool) -> Result<()> {
    let Some(corpus) = config.corpus.as_ref() else {
        bail!("[corpus] section is required for `ask`");
    };
    if !config.embedding.is_enabled() {
        bail!("an embedding provider is required for `ask`");
    }

    let provider = create_provider(&config.embedding)?;
    info!(model = provider.model_name(), dims = provider.dims(), "embedding provider ready");
    let store = Arc::new(InMemoryVectorStore::new(provider));
    let chunker = Chunker::new(&config.chunking);
    let docs = load_corpus(corpus)?;
    ingest_documents(store.as_ref(), &chunker, &docs).await?;

    let pipeline = Pipeline::from_config(config, store).await?;
    info!(
        indexed = pipeline.retriever().indexed_chunks(),
        metrics = ?pipeline.metrics().path(),
        "pipeline ready"
    );
    let envelope = if background {
        pipeline.answer_async(question, &opts).await
    } else {
        pipeline.answer(question, &opts).await
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    pipeline.wait_for_background().await;
    Ok(())
}

fn chunk_file(config: &Config, path: &std::path::Path, name: Option<String>) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let name = name.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    });
    let doc = RawDocument {
        id: path.display().to_string(),
        text,
        name,
        doc_type: "document".to_string(),
    };
    let chunker = Chunker::new(&config.chunking);
    let mut count = 0;
    for chunk in chunker.chunks(&doc) {
        count += 1;
        println!(
            "--- {} [{}..{}) section={} chars={}",
            chunk.id,
            chunk.start,
            chunk.end,
            chunk.section.as_deref().unwrap_or("-"),
            chunk.enriched_text.chars().count()
        );
        println!("{}", chunk.enriched_text);
    }
    println!("--- {} chunk(s)", count);
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
