//! Pushshift Ingest Library
//!
//! Resumable ingestion of the monthly Reddit submission dumps published on
//! Pushshift into a relational table.
//!
//! # Pipeline
//!
//! - **Catalog**: remote HTML index, format preference and chronological order
//! - **Download**: streamed to local storage with a progress bar
//! - **Verify**: SHA-256 against the published manifest
//! - **Decompress**: external `bzcat` / `xzcat` / `zstd` piped through a bounded channel
//! - **Load**: JSON lines filtered by subreddit, one transaction per archive
//! - **Checkpoint**: append-only ledger of committed archives
//!
//! # Example
//!
//! ```no_run
//! use pushshift_ingest::{IngestConfig, PgSink, Pipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load(None)?;
//!     let sink = PgSink::connect(&config.database).await?;
//!     sink.migrate().await?;
//!
//!     let pipeline = Pipeline::new(config, Arc::new(sink))?;
//!     let summary = pipeline.run(Some("2015-06")).await?;
//!     println!("{} archives loaded", summary.completed);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod archive;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod decompress;
pub mod download;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod sink;
pub mod verify;

pub use archive::{ArchiveFormat, ArchiveName};
pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use pipeline::{ArchiveOutcome, ArchiveState, Pipeline, RunSummary};
pub use sink::{PgSink, SubmissionSink};
