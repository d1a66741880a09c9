//! # codesync CLI
//!
//! The `codesync` binary drives the sync engine for one codebase root at a
//! time.
//!
//! ## Usage
//!
//! ```bash
//! codesync --config ./config/codesync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codesync sync <root>` | Bring the index of `<root>` up to date |
//! | `codesync plan <root>` | Show added, modified and removed files without syncing |
//! | `codesync status <root>` | Print the sync status as JSON |
//! | `codesync clear <root>` | Drop the collection and snapshot of `<root>` |
//! | `codesync search <root> "<query>"` | Similarity search over indexed chunks |

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codesync::config;
use codesync::orchestrator::{SyncOptions, SyncOrchestrator, SyncReport};
use codesync::progress::ProgressMode;
use codesync::store::Filter;

/// Incremental sync of a source-code tree into a vector store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "codesync",
    about = "Incremental sync of a source-code tree into a vector store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/codesync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a codebase, processing only what changed since the last sync.
    ///
    /// Ctrl-C cancels the run after the current batch; the next sync
    /// resumes from the files already committed.
    Sync {
        root: PathBuf,

        /// Drop the existing index first and re-embed everything.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr. Defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show what a sync would do, without changing anything.
    Plan {
        root: PathBuf,
    },

    /// Print the sync status of a codebase as JSON.
    Status {
        root: PathBuf,
    },

    /// Drop the collection and snapshot of a codebase.
    Clear {
        root: PathBuf,
    },

    /// Search indexed chunks by similarity.
    Search {
        root: PathBuf,

        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Only return chunks under this directory.
        #[arg(long)]
        path_prefix: Option<String>,

        /// Only return chunks from files with this extension.
        #[arg(long)]
        ext: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("codesync={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging.level);

    let orchestrator = SyncOrchestrator::from_config(&cfg).await?;

    match cli.command {
        Commands::Sync {
            root,
            force,
            progress,
            json,
        } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            let options = SyncOptions {
                force,
                progress: Arc::from(mode.reporter()),
            };
            let handle = orchestrator.start_sync(&root, options)?;
            let token = handle.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling after the current batch...");
                    token.cancel();
                }
            });
            let report = handle.wait().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Plan { root } => {
            let plan = orchestrator.plan(&root).await?;
            if plan.is_empty() {
                println!("Index is up to date.");
            }
            for path in &plan.added {
                println!("+ {}", path);
            }
            for path in &plan.modified {
                println!("~ {}", path);
            }
            for path in &plan.removed {
                println!("- {}", path);
            }
        }
        Commands::Status { root } => {
            let status = orchestrator.get_sync_status(&root).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Clear { root } => {
            if orchestrator.clear_index(&root).await? {
                println!("Index cleared.");
            } else {
                println!("Nothing to clear.");
            }
        }
        Commands::Search {
            root,
            query,
            limit,
            path_prefix,
            ext,
        } => {
            let mut filters = Vec::new();
            if let Some(prefix) = path_prefix {
                filters.push(Filter::PathPrefix(prefix));
            }
            if let Some(ext) = ext {
                filters.push(Filter::FileExtension(ext));
            }
            let filter = (!filters.is_empty()).then(|| Filter::And(filters));
            let hits = orchestrator
                .search(&root, &query, limit, filter.as_ref())
                .await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {}:{}-{}",
                    i + 1,
                    hit.score,
                    hit.metadata.relative_path,
                    hit.metadata.start_line,
                    hit.metadata.end_line.saturating_sub(1)
                );
            }
        }
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "Planned: +{} ~{} -{}",
        report.plan.added, report.plan.modified, report.plan.removed
    );
    println!(
        "Processed {} files: {} chunks written, {} deleted",
        report.processed, report.chunks_written, report.chunks_deleted
    );
    println!(
        "Index: {} files, {} chunks (generation {})",
        report.files, report.chunks, report.generation
    );
    if report.cancelled {
        println!("Cancelled; run sync again to resume.");
    }
    if !report.failures.is_empty() {
        println!("{} failures:", report.failures.len());
        for failure in &report.failures {
            println!("  {}: {}", failure.relative_path, failure.message);
        }
    }
}
