//! # malcode-search CLI (`mcs`)
//!
//! ## Usage
//!
//! ```bash
//! mcs --config ./config/mcs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mcs init` | Create the corpus table and index for the configured match mode |
//! | `mcs load <file.jsonl>` | Ingest extraction output into the corpus table |
//! | `mcs search <code>...` | Match code against the corpus and print the results |
//! | `mcs serve` | Start the HTTP retrieval service |
//!
//! ## Examples
//!
//! ```bash
//! mcs init
//! mcs load ./out/samples.jsonl
//! mcs search "import os; os.system(cmd)" --mode containment
//! mcs search "$(cat dropper.py)" --mode vector --top-k 3 --certainty 0.85
//! mcs serve
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use malcode_search::{config, ingest, migrate, search, server};

/// Retrieval of catalogued malicious-code snippets by containment, content
/// hash, or embedding similarity.
#[derive(Parser)]
#[command(
    name = "mcs",
    about = "malcode-search: retrieve catalogued malicious-code snippets",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mcs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the corpus schema.
    ///
    /// Creates the SQLite database file, the corpus table, and the index on
    /// the lookup column for `[db].match_mode`. Idempotent.
    Init,

    /// Ingest samples from a JSONL file.
    Load {
        /// One JSON object per line (`file_name`, `title`, `code`, `describe`).
        file: PathBuf,

        /// Parse and report without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the corpus for one or more code samples.
    Search {
        /// Code to match. Each argument is one query.
        #[arg(required = true)]
        queries: Vec<String>,

        /// Matching strategy; defaults to `[db].match_mode`.
        #[arg(long, value_enum)]
        mode: Option<SearchMode>,

        /// Neighbours per query (vector mode).
        #[arg(long)]
        top_k: Option<usize>,

        /// Certainty floor in [0, 1] (vector mode).
        #[arg(long)]
        certainty: Option<f64>,
    },

    /// Start the HTTP retrieval service on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchMode {
    Containment,
    Hash,
    Vector,
}

impl SearchMode {
    fn as_str(self) -> &'static str {
        match self {
            SearchMode::Containment => "containment",
            SearchMode::Hash => "hash",
            SearchMode::Vector => "vector",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!(
                "Database initialized successfully ({} mode, table {}).",
                cfg.db.match_mode.as_str(),
                cfg.db.table
            );
        }
        Commands::Load { file, dry_run } => {
            ingest::load_jsonl(&cfg, &file, dry_run).await?;
        }
        Commands::Search {
            queries,
            mode,
            top_k,
            certainty,
        } => {
            if let Some(c) = certainty {
                if !(0.0..=1.0).contains(&c) {
                    anyhow::bail!("--certainty must be between 0 and 1, got {}", c);
                }
            }
            if top_k == Some(0) {
                anyhow::bail!("--top-k must be at least 1");
            }
            search::run_search(&cfg, &queries, mode.map(SearchMode::as_str), top_k, certainty)
                .await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
