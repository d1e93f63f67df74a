// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! kwharvest CLI - rate-limited keyword harvesting from the command line.
//!
//! # Examples
//!
//! ```bash
//! # Register a seed and queue it for a related-keyword fetch
//! kwharvest seed "camping chair" --collect
//!
//! # Process jobs until Ctrl-C
//! kwharvest run
//!
//! # Queue document counts for everything fetched so far
//! kwharvest collect docs --limit 200
//!
//! # Cheapest well-searched keywords first, as JSON
//! kwharvest keywords --cafe ..100 --sort cafe:asc,volume:desc --format json
//!
//! # Inspect queue and credentials
//! kwharvest status --format json --pretty
//!
//! # Re-enable a credential disabled after a 401
//! kwharvest keys enable 3
//! ```

mod commands;
mod context;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use kwharvest_core::JobKind;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{collect, enqueue, keys, keywords, run, seed, status};

// ============================================================================
// CLI Definition
// ============================================================================

/// kwharvest CLI - keyword harvesting over rate-limited APIs.
#[derive(Parser)]
#[command(name = "kwharvest")]
#[command(about = "Rate-limited keyword harvesting with a durable job queue")]
#[command(long_about = r#"
kwharvest expands seed keywords into related keywords and counts the
documents published for each of them, spreading calls over a pool of
API credentials without exceeding their rate limits or daily quotas.

Pipeline:
  seed -> queued -> (fetch_related) -> fetched_rel -> (count_docs) -> counted_docs

Examples:
  kwharvest seed "camping chair"    # Register a seed keyword
  kwharvest collect related         # Queue related-keyword jobs
  kwharvest run                     # Process jobs until Ctrl-C
  kwharvest keywords -Q tent        # Harvested keywords with their counts
  kwharvest status                  # Queue and credential overview
"#)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the user config directory).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json).
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Verbose output (show debug info).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Quiet mode (no logging).
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Sync credentials and process jobs until interrupted.
    Run,

    /// Register a seed keyword.
    Seed(seed::SeedArgs),

    /// Queue jobs for keywords waiting in the pipeline.
    #[command(visible_alias = "c")]
    Collect(collect::CollectArgs),

    /// Queue jobs for explicit keyword ids.
    Enqueue(enqueue::EnqueueArgs),

    /// List harvested keywords with their latest document counts.
    #[command(visible_alias = "k")]
    Keywords(keywords::KeywordsArgs),

    /// Show queue, credential and provider state.
    #[command(visible_alias = "s")]
    Status,

    /// Manage API credentials.
    Keys(keys::KeysArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Job kind as typed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Related-keyword expansion.
    Related,
    /// Document counting.
    Docs,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Related => JobKind::FetchRelated,
            KindArg::Docs => JobKind::CountDocs,
        }
    }
}

// ============================================================================
// Logging Setup
// ============================================================================

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let default_filter = if verbose {
        "kwharvest=debug,info"
    } else {
        "kwharvest=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Run => run::run(&cli).await,
        Commands::Seed(args) => seed::run(args, &cli).await,
        Commands::Collect(args) => collect::run(args, &cli).await,
        Commands::Enqueue(args) => enqueue::run(args, &cli).await,
        Commands::Keywords(args) => keywords::run(args, &cli).await,
        Commands::Status => status::run(&cli).await,
        Commands::Keys(args) => keys::run(args, &cli).await,
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {e:#}");
            }
            std::process::ExitCode::FAILURE
        }
    }
}
