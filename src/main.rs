//! # docvec CLI
//!
//! The `docvec` binary drives the retrieval core: it initializes the
//! database, manages collections, queues files for ingestion, and answers
//! similarity queries.
//!
//! ## Usage
//!
//! ```bash
//! docvec --config ./config/docvec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docvec init` | Create the SQLite database and run schema migrations |
//! | `docvec collection create <name>` | Create a vector collection |
//! | `docvec collection list` | List collections |
//! | `docvec collection stats <id>` | Vector count, dimension, memory estimate |
//! | `docvec collection delete <id>` | Drop a collection and its vectors |
//! | `docvec collection reindex <id>` | Rebuild backend structures |
//! | `docvec ingest <paths...> --collection <id>` | Queue files for ingestion |
//! | `docvec search "<text>" --collection <id>` | Nearest-neighbour search |
//! | `docvec analyze <path>` | Extract and analyze a file without storing it |
//! | `docvec get <id>` | Show a stored document and its chunks |
//! | `docvec stats` | Database overview |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to adjust.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docvec::config;
use docvec::ingest_cmd::IngestArgs;
use docvec::progress::ProgressMode;
use docvec::{collections, db, get, ingest_cmd, search, stats};

/// docvec: turn documents into vectors and search them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "docvec",
    about = "docvec: document ingestion, embedding, and vector search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docvec.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent.
    Init,

    /// Manage vector collections.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Queue files for ingestion into a collection and wait for them.
    Ingest {
        /// Files to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Target collection id.
        #[arg(long)]
        collection: String,

        /// Declared document type (e.g. `pdf`, `html`, `plain-text`).
        /// Guessed from each file's extension when omitted.
        #[arg(long = "type")]
        file_type: Option<String>,

        /// Words per chunk (overrides config).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Words shared by consecutive chunks (overrides config).
        #[arg(long)]
        overlap: Option<usize>,

        /// Namespace recorded on every vector.
        #[arg(long)]
        namespace: Option<String>,

        /// Progress output on stderr: `human`, `json`, or `off`.
        /// Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search a collection by text.
    Search {
        /// The query text.
        text: String,

        /// Collection id.
        #[arg(long)]
        collection: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        top_k: usize,

        /// Exact-match metadata filter, `key=value`. Repeatable.
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        /// Only match vectors in this namespace.
        #[arg(long)]
        namespace: Option<String>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract and analyze a file without storing anything.
    Analyze {
        path: PathBuf,

        /// Declared document type; guessed from the extension when omitted.
        #[arg(long = "type")]
        file_type: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show a stored document, its statistics, and its chunks.
    Get {
        /// Document id.
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum CollectionAction {
    /// Create a collection and print its id.
    Create {
        name: String,

        /// Vector dimension; defaults to the configured model's.
        #[arg(long)]
        dims: Option<usize>,

        /// `cosine`, `euclidean`, `dot-product`, or `manhattan`.
        #[arg(long, default_value = "cosine")]
        metric: String,
    },
    /// List collections.
    List,
    /// Show collection statistics.
    Stats { id: String },
    /// Delete a collection and all its vectors.
    Delete { id: String },
    /// Rebuild backend index structures.
    Reindex { id: String },
}

/// Parse a `key=value` pair for `--filter` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let cli = Cli::parse();

    // Commands that don't require a config file
    if let Commands::Analyze {
        path,
        file_type,
        json,
    } = &cli.command
    {
        let cfg = config::load_config(&cli.config).unwrap_or_else(|_| config::Config::minimal());
        ingest_cmd::run_analyze(&cfg, path, file_type.clone(), *json).await?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::open(&cfg).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Collection { action } => match action {
            CollectionAction::Create { name, dims, metric } => {
                collections::run_create(&cfg, &name, dims, &metric).await?;
            }
            CollectionAction::List => collections::run_list(&cfg).await?,
            CollectionAction::Stats { id } => collections::run_stats(&cfg, &id).await?,
            CollectionAction::Delete { id } => collections::run_delete(&cfg, &id).await?,
            CollectionAction::Reindex { id } => collections::run_reindex(&cfg, &id).await?,
        },
        Commands::Ingest {
            paths,
            collection,
            file_type,
            chunk_size,
            overlap,
            namespace,
            progress,
        } => {
            let mode = match progress {
                Some(p) => ProgressMode::parse(&p)?,
                None => ProgressMode::default_for_tty(),
            };
            let args = IngestArgs {
                file_type,
                chunk_size,
                overlap,
                namespace,
            };
            ingest_cmd::run_ingest(&cfg, &paths, &collection, args, mode).await?;
        }
        Commands::Search {
            text,
            collection,
            top_k,
            filters,
            namespace,
            json,
        } => {
            search::run_search(&cfg, &text, &collection, top_k, filters, namespace, json).await?;
        }
        Commands::Analyze { .. } => {
            // Handled above (before config loading)
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
