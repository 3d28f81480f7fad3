//! Pushshift Ingest - resumable submission loader

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pushshift_common::logging::{init_logging, LogConfig, LogLevel};
use pushshift_ingest::{archive::validate_month, IngestConfig, PgSink, Pipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "pushshift-ingest")]
#[command(author, version, about = "Load Pushshift submission dumps into PostgreSQL")]
struct Cli {
    /// Configuration file (defaults to ./pushshift.toml when present)
    #[arg(short, long, global = true, env = "PUSHSHIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download, verify and load every archive not yet checkpointed
    Run {
        /// First month to process, YYYY-MM
        #[arg(short, long)]
        since: Option<String>,
    },

    /// Show the archives a run would visit and their checkpoint status
    List {
        /// First month to list, YYYY-MM
        #[arg(short, long)]
        since: Option<String>,
    },

    /// Create the submissions table without ingesting
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(&log_config(cli.verbose)?)?;

    let config = IngestConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    info!(
        subreddit = %config.subreddit,
        data_dir = %config.data_dir.display(),
        ledger = %config.checkpoint_file.display(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Migrate => {
            let sink = PgSink::connect(&config.database).await?;
            sink.migrate().await?;
        },
        Command::List { since } => {
            let since = resolve_since(since, &config)?;
            // Listing never touches the database
            let sink = PgSink::connect_lazy(&config.database)?;
            let pipeline = Pipeline::new(config, Arc::new(sink))?;

            for planned in pipeline.plan(since.as_deref()).await? {
                let status = if planned.checkpointed { "done" } else { "pending" };
                println!("{:<8} {}", status, planned.name);
            }
        },
        Command::Run { since } => {
            let since = resolve_since(since, &config)?;
            let sink = PgSink::connect(&config.database).await?;
            sink.migrate().await?;
            info!("Database ready");

            let pipeline = Pipeline::new(config, Arc::new(sink))?;
            let summary = match pipeline.run(since.as_deref()).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(error = %e, "Run aborted");
                    return Err(e.into());
                },
            };

            info!(
                completed = summary.completed,
                skipped = summary.skipped,
                abandoned = summary.abandoned.len(),
                inserted = summary.inserted,
                "Ingestion complete"
            );
        },
    }

    Ok(())
}

/// `LOG_*` variables apply first; `-v` always wins over `LOG_LEVEL`
fn log_config(verbose: bool) -> Result<LogConfig> {
    let mut config = LogConfig::builder()
        .log_file_prefix("pushshift-ingest")
        .filter_directives("sqlx=warn")
        .build()
        .with_env_overrides()?;

    if verbose {
        config.level = LogLevel::Debug;
    }
    Ok(config)
}

/// `--since` wins over `default_since` from configuration
fn resolve_since(flag: Option<String>, config: &IngestConfig) -> Result<Option<String>> {
    let since = flag.or_else(|| config.default_since.clone());
    if let Some(month) = &since {
        validate_month(month)?;
    }
    Ok(since)
}
