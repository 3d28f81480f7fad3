//! Sequential ingestion driver
//!
//! Every archive walks the same states:
//!
//! ```text
//! Pending -> Downloading -> Verifying -> Loading -> Checkpointed -> Cleaned
//!               \______________\____________\______> Abandoned
//! ```
//!
//! Archives are handled one at a time in catalog order. The ledger entry is
//! written only after the archive's transaction committed, and the local copy
//! is deleted whether the archive completed or was abandoned.

use crate::archive::{validate_month, ArchiveName};
use crate::catalog::CatalogClient;
use crate::checkpoint::CheckpointStore;
use crate::config::IngestConfig;
use crate::decompress::open_stream;
use crate::download::{remove_if_exists, Downloader};
use crate::error::Result;
use crate::loader::{LoadStats, RecordLoader};
use crate::sink::SubmissionSink;
use crate::verify::{verify, ChecksumManifest};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Position of one archive in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Pending,
    Downloading,
    Verifying,
    Loading,
    Checkpointed,
    Cleaned,
    Abandoned,
}

impl fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveState::Pending => "pending",
            ArchiveState::Downloading => "downloading",
            ArchiveState::Verifying => "verifying",
            ArchiveState::Loading => "loading",
            ArchiveState::Checkpointed => "checkpointed",
            ArchiveState::Cleaned => "cleaned",
            ArchiveState::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// How a single archive ended
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveOutcome {
    /// Already in the ledger
    Skipped,
    Completed(LoadStats),
    /// Left out of the ledger; retried next run
    Abandoned { failed_in: ArchiveState, reason: String },
}

/// Totals for one invocation of [`Pipeline::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub abandoned: Vec<String>,
    pub matched: u64,
    pub inserted: u64,
}

impl RunSummary {
    fn record(&mut self, name: &ArchiveName, outcome: &ArchiveOutcome) {
        match outcome {
            ArchiveOutcome::Skipped => self.skipped += 1,
            ArchiveOutcome::Completed(stats) => {
                self.completed += 1;
                self.matched += stats.matched;
                self.inserted += stats.inserted;
            },
            ArchiveOutcome::Abandoned { .. } => self.abandoned.push(name.to_string()),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

/// A catalog candidate and whether the ledger already holds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArchive {
    pub name: ArchiveName,
    pub checkpointed: bool,
}

/// Wires the catalog, downloader, verifier, loader and ledger together
pub struct Pipeline {
    config: IngestConfig,
    catalog: CatalogClient,
    downloader: Downloader,
    checkpoints: CheckpointStore,
    loader: RecordLoader,
    sink: Arc<dyn SubmissionSink>,
}

impl Pipeline {
    pub fn new(config: IngestConfig, sink: Arc<dyn SubmissionSink>) -> Result<Self> {
        config.validate()?;
        let client = config.http_client()?;

        Ok(Self {
            catalog: CatalogClient::new(&config, client.clone()),
            downloader: Downloader::new(&config, client),
            checkpoints: CheckpointStore::new(&config.checkpoint_file),
            loader: RecordLoader::new(config.subreddit.clone()),
            sink,
            config,
        })
    }

    /// Candidates in processing order, without downloading anything
    pub async fn plan(&self, since: Option<&str>) -> Result<Vec<PlannedArchive>> {
        if let Some(since) = since {
            validate_month(since)?;
        }

        let candidates = self.catalog.list_candidates(since).await?;
        let done = self.checkpoints.snapshot().await?;

        Ok(candidates
            .into_iter()
            .map(|name| PlannedArchive {
                checkpointed: done.contains(&name.to_string()),
                name,
            })
            .collect())
    }

    /// Process every candidate archive from `since` onwards.
    ///
    /// Fails only when the catalog or checksum manifest cannot be obtained or
    /// `since` is not published. Per-archive failures are logged, counted in
    /// the summary and left for the next run.
    pub async fn run(&self, since: Option<&str>) -> Result<RunSummary> {
        if let Some(since) = since {
            validate_month(since)?;
        }

        let started = Instant::now();
        let candidates = self.catalog.list_candidates(since).await?;
        let manifest = self.catalog.fetch_checksums().await?;

        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        let mut summary = RunSummary::default();
        for name in &candidates {
            let span = info_span!("archive", archive = %name);
            let outcome = self.process_archive(name, &manifest).instrument(span).await;
            summary.record(name, &outcome);
        }

        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            abandoned = summary.abandoned.len(),
            inserted = summary.inserted,
            elapsed_secs = started.elapsed().as_secs(),
            "Run finished"
        );
        if !summary.is_clean() {
            warn!(archives = ?summary.abandoned, "Some archives were abandoned and will be retried next run");
        }

        Ok(summary)
    }

    /// Drive one archive to a terminal state. Never fails the run.
    pub async fn process_archive(&self, name: &ArchiveName, manifest: &ChecksumManifest) -> ArchiveOutcome {
        let archive = name.to_string();

        match self.checkpoints.contains(&archive).await {
            Ok(true) => {
                info!("Already processed, skipping");
                return ArchiveOutcome::Skipped;
            },
            Ok(false) => {},
            Err(e) => {
                error!(error = %e, "Could not consult checkpoint ledger");
                return ArchiveOutcome::Abandoned {
                    failed_in: ArchiveState::Pending,
                    reason: e.to_string(),
                };
            },
        }

        let local_path = self.config.data_dir.join(&archive);
        let mut state = ArchiveState::Pending;

        match self.ingest(name, manifest, &mut state).await {
            Ok(stats) => ArchiveOutcome::Completed(stats),
            Err(e) => {
                error!(state = %state, error = %e, "Abandoning archive {}", archive);
                let failed_in = state;
                self.cleanup(&local_path).await;
                transition(&mut state, ArchiveState::Abandoned);
                ArchiveOutcome::Abandoned {
                    failed_in,
                    reason: e.to_string(),
                }
            },
        }
    }

    async fn ingest(
        &self,
        name: &ArchiveName,
        manifest: &ChecksumManifest,
        state: &mut ArchiveState,
    ) -> Result<LoadStats> {
        let archive = name.to_string();

        transition(state, ArchiveState::Downloading);
        let (path, bytes) = self.downloader.download(name, &self.config.data_dir).await?;

        transition(state, ArchiveState::Verifying);
        verify(&path, manifest).await?;
        debug!(bytes, "Archive verified");

        transition(state, ArchiveState::Loading);
        info!("Processing file {}", archive);
        let stream = open_stream(&path, &self.config.decompressors)?;
        let stats = self.loader.load(stream, self.sink.as_ref()).await?;

        transition(state, ArchiveState::Checkpointed);
        if let Err(e) = self.checkpoints.append(&archive).await {
            // Rows are committed; a reload next run only finds duplicates
            error!(error = %e, "Loaded archive could not be checkpointed");
        }

        info!(
            matched = stats.matched,
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            parse_errors = stats.parse_errors,
            "{} submissions in {}: {}",
            self.config.subreddit,
            archive,
            stats.matched
        );

        self.cleanup(&path).await;
        transition(state, ArchiveState::Cleaned);

        Ok(stats)
    }

    async fn cleanup(&self, path: &Path) {
        if let Err(e) = remove_if_exists(path).await {
            warn!(path = %path.display(), error = %e, "Could not delete local archive");
        }
    }
}

fn transition(state: &mut ArchiveState, next: ArchiveState) {
    debug!(from = %state, to = %next, "Archive state change");
    *state = next;
}
