//! # Holocaust Answer Engine CLI (`hae`)
//!
//! ## Usage
//!
//! ```bash
//! hae --config ./config/hae.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hae serve` | Start the HTTP API |
//! | `hae ingest` | Index the transcript corpus |
//! | `hae retrieve "<query>"` | Print the parent documents for a query |
//! | `hae ask "<question>"` | Run one agent turn in the terminal |
//! | `hae history --user <id>` | List or print stored conversations |
//! | `hae summarize "<transcript>"...` | Summarize transcripts |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use answer_engine::{commands, config, ingest, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Holocaust Answer Engine: retrieval-augmented answers over survivor testimonies.
#[derive(Parser)]
#[command(
    name = "hae",
    about = "Holocaust Answer Engine: retrieval-augmented answers over survivor testimonies",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/hae.toml`. See `config/hae.example.toml`.
    #[arg(long, global = true, default_value = "./config/hae.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Scan, clean, embed, and index the corpus under `[ingest].root`.
    ///
    /// Re-running replaces the segments of files already indexed.
    Ingest {
        /// Show document and segment counts without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the parent documents retrieved for a query.
    Retrieve {
        query: String,

        /// Number of nearest child segments to match (defaults to `[retrieval].broad_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Ask the agent one question; the answer streams to stdout.
    Ask {
        question: String,

        #[arg(long)]
        user: String,

        #[arg(long)]
        conversation: String,
    },

    /// List a user's conversations, or print one with `--conversation`.
    History {
        #[arg(long)]
        user: String,

        #[arg(long)]
        conversation: Option<String>,
    },

    /// Summarize one or more transcripts, one line each.
    Summarize {
        #[arg(required = true)]
        histories: Vec<String>,
    },
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
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { dry_run, limit } => {
            ingest::run_ingest(&cfg, dry_run, limit).await?;
        }
        Commands::Retrieve { query, k } => {
            commands::run_retrieve(&cfg, &query, k).await?;
        }
        Commands::Ask {
            question,
            user,
            conversation,
        } => {
            commands::run_ask(&cfg, &question, &user, &conversation).await?;
        }
        Commands::History { user, conversation } => {
            commands::run_history(&cfg, &user, conversation.as_deref()).await?;
        }
        Commands::Summarize { histories } => {
            commands::run_summarize(&cfg, &histories).await?;
        }
    }

    Ok(())
}
