//! Shared fixtures for the ingestion integration tests
//!
//! - [`MemorySink`]: in-memory [`SubmissionSink`] with transaction semantics
//! - [`RemoteDirectory`]: a wiremock server publishing an index page, a
//!   checksum manifest and archive files
//! - [`LogCapture`]: collects formatted `tracing` output for assertions
//!
//! Archives are plain JSON lines; tests configure `cat` as the decompressor
//! for every extension.

#![allow(dead_code)]

use async_trait::async_trait;
use pushshift_ingest::config::{DecompressorConfig, IngestConfig};
use pushshift_ingest::error::{IngestError, Result};
use pushshift_ingest::sink::{InsertOutcome, SinkTransaction, SubmissionRow, SubmissionSink};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SUBREDDIT: &str = "GameDeals";

// ============================================================================
// In-memory sink
// ============================================================================

#[derive(Default)]
struct MemoryState {
    rows: Vec<SubmissionRow>,
    begun: usize,
    commits: usize,
    fail_begin: bool,
    after_commit: Option<Box<dyn FnOnce() + Send>>,
}

/// Rows become visible in [`MemorySink::rows`] only after commit.
///
/// Titles containing NUL are rejected the way PostgreSQL rejects them in
/// `TEXT` columns.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every `begin` fails like an unreachable database
    pub fn unavailable() -> Self {
        let sink = Self::default();
        sink.state.lock().unwrap().fail_begin = true;
        sink
    }

    pub fn rows(&self) -> Vec<SubmissionRow> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.rows().into_iter().map(|r| r.submission_id).collect()
    }

    pub fn transactions_begun(&self) -> usize {
        self.state.lock().unwrap().begun
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    /// Run `hook` once, right after the next successful commit
    pub fn on_next_commit(&self, hook: impl FnOnce() + Send + 'static) {
        self.state.lock().unwrap().after_commit = Some(Box::new(hook));
    }
}

#[async_trait]
impl SubmissionSink for MemorySink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_begin {
            return Err(IngestError::SinkConnection(sqlx::Error::PoolTimedOut));
        }
        state.begun += 1;
        let existing = state.rows.iter().map(|r| r.submission_id.clone()).collect();

        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            existing,
            pending: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    existing: HashSet<String>,
    pending: Vec<SubmissionRow>,
}

#[async_trait]
impl SinkTransaction for MemoryTransaction {
    async fn insert(&mut self, row: &SubmissionRow) -> Result<InsertOutcome> {
        if row.title.contains('\0') {
            return Ok(InsertOutcome::Rejected("invalid byte sequence 0x00".to_string()));
        }
        if !self.existing.insert(row.submission_id.clone()) {
            return Ok(InsertOutcome::Duplicate);
        }
        self.pending.push(row.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let hook = {
            let mut state = this.state.lock().unwrap();
            state.rows.extend(this.pending);
            state.commits += 1;
            state.after_commit.take()
        };
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }
}

// ============================================================================
// Archive content
// ============================================================================

pub fn submission(subreddit: &str, id: &str, title: &str, created_utc: i64) -> String {
    serde_json::json!({
        "subreddit": subreddit,
        "id": id,
        "title": title,
        "created_utc": created_utc,
        "score": 1,
    })
    .to_string()
}

/// Join lines into newline-terminated archive content
pub fn archive_body(lines: &[String]) -> Vec<u8> {
    let mut body = String::new();
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    body.into_bytes()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn index_html(files: &[&str]) -> String {
    let rows: String = files
        .iter()
        .map(|f| {
            format!(
                r#"<tr class="file"><td><a href="{f}">{f}</a></td><td>1.2 GB</td><td>2019-01-01</td></tr>"#
            )
        })
        .collect();

    format!(
        r#"<html><body><table>
<tr><th>Name</th><th>Size</th><th>Date</th></tr>
<tr class="parent"><td><a href="../">Parent directory</a></td></tr>
{rows}
</table></body></html>"#
    )
}

// ============================================================================
// Remote directory
// ============================================================================

pub struct RemoteArchive {
    pub name: String,
    pub body: Vec<u8>,
    /// Digest published in the manifest; `None` leaves the file out of it
    pub published_sha256: Option<String>,
}

impl RemoteArchive {
    pub fn new(name: &str, lines: &[String]) -> Self {
        let body = archive_body(lines);
        Self {
            name: name.to_string(),
            published_sha256: Some(sha256_hex(&body)),
            body,
        }
    }

    pub fn with_published_sha256(mut self, digest: Option<&str>) -> Self {
        self.published_sha256 = digest.map(str::to_string);
        self
    }
}

/// Mock archive host plus a scratch directory for downloads and the ledger
pub struct RemoteDirectory {
    pub server: MockServer,
    pub scratch: TempDir,
}

impl RemoteDirectory {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    /// Publish the index, manifest and bodies of `archives`
    pub async fn publish(&self, archives: &[RemoteArchive]) {
        let names: Vec<&str> = archives.iter().map(|a| a.name.as_str()).collect();
        self.publish_index(&names).await;

        let manifest: String = archives
            .iter()
            .filter_map(|a| {
                a.published_sha256
                    .as_ref()
                    .map(|digest| format!("{}  {}\n", digest, a.name))
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/sha256sums.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(manifest))
            .mount(&self.server)
            .await;

        for archive in archives {
            Mock::given(method("GET"))
                .and(path(format!("/{}", archive.name)))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.body.clone()))
                .mount(&self.server)
                .await;
        }
    }

    pub async fn publish_index(&self, files: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index_html(files)))
            .mount(&self.server)
            .await;
    }

    pub fn config(&self) -> IngestConfig {
        IngestConfig {
            data_dir: self.data_dir(),
            checkpoint_file: self.ledger_path(),
            subreddit: SUBREDDIT.to_string(),
            base_url: self.server.uri(),
            show_progress: false,
            decompressors: DecompressorConfig::uniform(&["cat"]),
            ..IngestConfig::default()
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.scratch.path().join("data")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.scratch.path().join("already_processed.txt")
    }

    pub fn ledger(&self) -> Vec<String> {
        std::fs::read_to_string(self.ledger_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Number of GET requests received for `file_name`
    pub async fn requests_for(&self, file_name: &str) -> usize {
        let wanted = format!("/{}", file_name);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == wanted)
            .count()
    }

    /// Files left behind in the data directory
    pub fn leftover_files(&self) -> Vec<String> {
        match std::fs::read_dir(self.data_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

// ============================================================================
// Log capture
// ============================================================================

/// Shared buffer usable as a `tracing_subscriber` writer
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Capture plain-text events emitted on this thread until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
