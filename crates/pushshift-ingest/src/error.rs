//! Error types for archive ingestion
//!
//! Only catalog-level failures and a missing resume point stop a run. Every
//! other variant abandons the current archive, which stays out of the
//! checkpoint ledger and is retried on the next invocation.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Remote index or checksum manifest unreachable or unparseable
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// The requested `since` month is not in the remote catalog
    #[error("Resume point {0} not found in remote catalog")]
    ResumePointNotFound(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: reqwest::StatusCode },

    #[error("Checksum mismatch for {archive}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        archive: String,
        expected: String,
        actual: String,
    },

    #[error("No published checksum for {0}")]
    ChecksumUnavailable(String),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Could not parse record at line {line}: {reason}")]
    RecordParse { line: u64, reason: String },

    #[error("Sink error: {0}")]
    SinkConnection(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Checkpoint ledger error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] pushshift_common::CommonError),
}

impl IngestError {
    /// Whether this error halts the whole run rather than a single archive
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            IngestError::Catalog(_)
                | IngestError::ResumePointNotFound(_)
                | IngestError::Config(_)
                | IngestError::Migration(_)
        )
    }
}

impl From<figment::Error> for IngestError {
    fn from(err: figment::Error) -> Self {
        IngestError::Config(err.to_string())
    }
}
