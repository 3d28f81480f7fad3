//! Checkpoint ledger of fully processed archives
//!
//! A plain text file, one archive name per line, only ever appended to. A name
//! is written strictly after that archive's load transaction committed, so
//! presence in the ledger means the rows are durable in the sink.
//!
//! The file is re-read on every membership test. Operators may edit it between
//! (or during) runs to force an archive to be processed again.

use crate::error::{IngestError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every ledger entry in append order. A missing file is an empty ledger.
    pub async fn entries(&self) -> Result<Vec<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(IngestError::Checkpoint(format!(
                "reading {} failed: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Snapshot of the ledger for bulk lookups
    pub async fn snapshot(&self) -> Result<HashSet<String>> {
        Ok(self.entries().await?.into_iter().collect())
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.entries().await?.iter().any(|entry| entry == name))
    }

    /// Durably record `name` as processed.
    ///
    /// Must only be called once the archive's rows are committed.
    pub async fn append(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains('\n') {
            return Err(IngestError::Checkpoint(format!("invalid ledger entry {:?}", name)));
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                IngestError::Checkpoint(format!("opening {} failed: {}", self.path.display(), e))
            })?;

        // One write per entry so a crash cannot interleave partial names
        file.write_all(format!("{}\n", name).as_bytes()).await?;
        file.sync_all().await?;

        debug!(archive = %name, ledger = %self.path.display(), "Checkpoint appended");
        Ok(())
    }
}
