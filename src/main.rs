//! # docsim CLI
//!
//! ## Usage
//!
//! ```bash
//! docsim --config ./config/docsim.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsim init` | Create the SQLite database, run migrations, create the storage root |
//! | `docsim check <file>` | Evaluate a file against stored documents without storing it |
//! | `docsim submit <path>` | Evaluate and store a file, or every matching file under a directory |
//! | `docsim similar <id>` | List documents similar to a stored one |
//! | `docsim delete <id>` | Soft-delete a document |
//! | `docsim restore <id>` | Restore a soft-deleted document |
//! | `docsim reindex <id>` | Re-chunk and re-embed a document |
//! | `docsim embed pending [id]` | Embed chunks that have no vector yet |
//! | `docsim get <id>` | Print a document and its chunks |
//! | `docsim stats` | Database summary |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `docsim=info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docsim::ingest::SubmitOptions;
use docsim::{config, db, embed_cmd, get, ingest, manage, migrate, stats};
use tracing_subscriber::EnvFilter;

/// docsim: duplicate and near-duplicate detection for submitted documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "docsim",
    about = "docsim: duplicate and near-duplicate detection for submitted documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsim.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and storage directory.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Evaluate a file without storing it.
    ///
    /// Runs the binary-hash, text-hash and vector checks and prints the
    /// outcome. Never restores deleted documents.
    Check {
        file: PathBuf,

        /// Candidate score threshold, overriding `[similarity].threshold`.
        #[arg(long)]
        threshold: Option<f64>,

        /// Stop after the hash checks.
        #[arg(long)]
        skip_embeddings: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Evaluate and store a file or a directory of files.
    ///
    /// Novel files are stored and indexed. Exact duplicates are skipped;
    /// near-duplicates are flagged and skipped unless `--force` is given.
    Submit {
        path: PathBuf,

        /// Collection (course, class, ...) to file new documents under.
        #[arg(long)]
        collection: Option<String>,

        /// Restore a deleted document instead of reporting it as a duplicate.
        #[arg(long)]
        auto_restore: bool,

        /// Store near-duplicates instead of only flagging them.
        #[arg(long)]
        force: bool,

        /// Candidate score threshold, overriding `[similarity].threshold`.
        #[arg(long)]
        threshold: Option<f64>,

        /// Skip the vector check and store chunks without embeddings.
        #[arg(long)]
        skip_embeddings: bool,

        /// Print the results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List documents similar to a stored document.
    Similar {
        id: String,

        #[arg(long)]
        threshold: Option<f64>,

        /// Maximum number of documents to list.
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Soft-delete a document: status, chunks and stored file.
    Delete { id: String },

    /// Restore a soft-deleted document.
    Restore { id: String },

    /// Re-chunk and re-embed a document, replacing its chunks.
    Reindex { id: String },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Print a document and its chunks.
    Get { id: String },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that have no vector yet.
    ///
    /// Without an id, every non-deleted document is processed.
    Pending { id: Option<String> },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docsim=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            std::fs::create_dir_all(&cfg.storage.root).with_context(|| {
                format!("Failed to create {}", cfg.storage.root.display())
            })?;
            println!("Database initialized successfully.");
        }
        Commands::Check {
            file,
            threshold,
            skip_embeddings,
            json,
        } => {
            let overrides = SubmitOptions {
                threshold,
                skip_embeddings,
                ..SubmitOptions::default()
            };
            ingest::run_check(&cfg, &file, &overrides, json).await?;
        }
        Commands::Submit {
            path,
            collection,
            auto_restore,
            force,
            threshold,
            skip_embeddings,
            json,
        } => {
            let overrides = SubmitOptions {
                collection,
                auto_restore,
                force,
                threshold,
                skip_embeddings,
            };
            ingest::run_submit(&cfg, &path, &overrides, json).await?;
        }
        Commands::Similar {
            id,
            threshold,
            limit,
            json,
        } => {
            manage::run_similar(&cfg, &id, threshold, limit, json).await?;
        }
        Commands::Delete { id } => {
            manage::run_delete(&cfg, &id).await?;
        }
        Commands::Restore { id } => {
            manage::run_restore(&cfg, &id).await?;
        }
        Commands::Reindex { id } => {
            manage::run_reindex(&cfg, &id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { id } => {
                embed_cmd::run_embed_pending(&cfg, id.as_deref()).await?;
            }
        },
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
