//! lawqa CLI - Command-line interface for Vietnamese legal retrieval.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lawqa_core::{Fragment, LawQaConfig, VectorStore};
use lawqa_lexical::load_or_build;
use lawqa_query::RetrievalSettings;
use lawqa_server::{IngestParams, LawQaServer, QuestionParams, ToolResult};
use lawqa_store::SqliteStore;

/// lawqa - Hybrid retrieval over Vietnamese road traffic law
#[derive(Parser)]
#[command(name = "lawqa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/lawqa/config.toml, then ./lawqa.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and an empty lexical index
    Init,

    /// Index fragment files (JSON arrays) into the store
    Index {
        /// Fragment files or directories of them
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Clear the store first
        #[arg(long)]
        reset: bool,

        /// Recursively process directories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Print the legal context retrieved for a question
    Search {
        /// Question in Vietnamese
        question: String,

        /// Number of fragments
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Reload the corpus snapshot and its lexical index
    Refresh,

    /// Show statistics
    Stats,
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> lawqa_core::Result<LawQaConfig> {
    match path {
        Some(path) => LawQaConfig::load(path),
        None => LawQaConfig::load_default(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    debug!(
        "Using store {:?} and lexical index {:?}",
        config.store.path, config.lexical.index_path
    );

    match cli.command {
        Commands::Init => {
            init(&config).await?;
        }
        Commands::Index {
            paths,
            reset,
            recursive,
        } => {
            let files = collect_files(&paths, recursive)?;
            debug!("Collected {} fragment file(s)", files.len());
            if files.is_empty() {
                println!("No fragment files found.");
                return Ok(());
            }

            let server = LawQaServer::open(config).await?;
            println!("Indexing {} file(s)...", files.len());
            report(server.ingest_file(IngestParams { paths: files, reset }).await);
        }
        Commands::Search { question, top_k } => {
            let server = LawQaServer::open(config).await?;
            report(
                server
                    .retrieve(QuestionParams {
                        question,
                        k: top_k,
                    })
                    .await,
            );
        }
        Commands::Refresh => {
            let server = LawQaServer::open(config).await?;
            report(server.refresh().await);
        }
        Commands::Stats => {
            let server = LawQaServer::open(config).await?;
            report(server.stats().await);
        }
    }

    Ok(())
}

fn report(result: ToolResult) {
    if result.success {
        println!("{}", result.message);
    } else {
        eprintln!("Error: {}", result.message);
        std::process::exit(1);
    }
}

/// Create the store and persist the lexical index of its current corpus.
///
/// Needs no model files, so it works before any model is downloaded.
async fn init(config: &LawQaConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let store = SqliteStore::open(
        &config.store.path,
        config.embedding.dimension,
        config.store.busy_timeout_ms,
    )?;
    let corpus = store.fetch_all().await?;

    let settings = RetrievalSettings::from_config(config)?;
    let refs: Vec<&Fragment> = corpus.iter().collect();
    let (index, origin) = load_or_build(
        &config.lexical.index_path,
        &refs,
        settings.segmenter,
        settings.bm25,
    )?;

    println!("Initialized store at: {}", config.store.path.display());
    println!(
        "Lexical index at: {} ({} fragments, {:?})",
        config.lexical.index_path.display(),
        index.len(),
        origin
    );
    Ok(())
}

fn collect_files(paths: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<_, _>>()?;
            entries.sort();

            for entry in entries {
                if entry.is_file() && is_fragment_file(&entry) {
                    files.push(entry);
                } else if entry.is_dir() && recursive {
                    files.extend(collect_files(&[entry], recursive)?);
                }
            }
        } else {
            // Let the indexer report the missing path.
            files.push(path.clone());
        }
    }

    Ok(files)
}

fn is_fragment_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}
