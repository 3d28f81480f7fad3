//! Pushshift Common Library
//!
//! Shared utilities for the Pushshift ingestion workspace.
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Checksums**: streaming SHA-256 over files and readers
//! - **Logging**: `tracing` subscriber configuration and initialisation
//!
//! # Example
//!
//! ```no_run
//! use pushshift_common::checksum::sha256_file;
//!
//! fn print_digest(path: &str) -> pushshift_common::Result<()> {
//!     let digest = sha256_file(path)?;
//!     tracing::info!(%digest, "archive digest");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
