//! Record filtering and loading
//!
//! Decompressed archives are newline-delimited JSON, one submission per line.
//! Each line is handled on its own: a line that does not parse is logged and
//! skipped, while a failure of the stream or of the sink transaction abandons
//! the whole archive without committing.

use crate::error::{IngestError, Result};
use crate::sink::{InsertOutcome, SinkTransaction, SubmissionRow, SubmissionSink};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// Characters of an offending line repeated in warnings
const LINE_EXCERPT: usize = 200;

/// Only the field needed to decide whether a line is interesting.
///
/// Any JSON type is accepted; a non-string `subreddit` simply never matches.
#[derive(Deserialize)]
struct CategoryField {
    #[serde(default)]
    subreddit: Option<Value>,
}

impl CategoryField {
    fn category(&self) -> Option<&str> {
        self.subreddit.as_ref().and_then(Value::as_str)
    }
}

/// Submission fields carried into the sink
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionRecord {
    pub id: String,
    pub title: String,
    pub subreddit: String,
    #[serde(default)]
    pub created_utc: Option<EpochSeconds>,
}

/// `created_utc` as published: integer, float or numeric string depending on the dump year
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EpochSeconds {
    Int(i64),
    Float(f64),
    Text(String),
}

impl EpochSeconds {
    pub fn as_secs(&self) -> Option<i64> {
        match self {
            EpochSeconds::Int(secs) => Some(*secs),
            EpochSeconds::Float(secs) if secs.is_finite() => Some(secs.trunc() as i64),
            EpochSeconds::Float(_) => None,
            EpochSeconds::Text(text) => {
                let text = text.trim();
                text.parse::<i64>()
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            },
        }
    }
}

impl SubmissionRecord {
    /// Sink row; a missing `created_utc` becomes the Unix epoch
    pub fn to_row(&self) -> std::result::Result<SubmissionRow, String> {
        let secs = match &self.created_utc {
            None => 0,
            Some(value) => value
                .as_secs()
                .ok_or_else(|| format!("unusable created_utc {:?}", value))?,
        };
        let created_utc: DateTime<Utc> = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| format!("created_utc {} out of range", secs))?;

        Ok(SubmissionRow {
            created_utc,
            submission_id: self.id.clone(),
            title: self.title.clone(),
        })
    }
}

/// Per-archive counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub lines: u64,
    pub matched: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub parse_errors: u64,
}

enum LineOutcome {
    Ignored,
    Stored(InsertOutcome),
}

/// Filters decoded lines by subreddit and loads the matches
pub struct RecordLoader {
    target_category: String,
}

impl RecordLoader {
    pub fn new(target_category: impl Into<String>) -> Self {
        Self {
            target_category: target_category.into(),
        }
    }

    pub fn target_category(&self) -> &str {
        &self.target_category
    }

    /// Load every matching line of `reader` inside one sink transaction.
    ///
    /// The transaction commits only after the stream reached a clean end.
    pub async fn load<R>(&self, mut reader: R, sink: &dyn SubmissionSink) -> Result<LoadStats>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut tx = sink.begin().await?;
        let mut stats = LoadStats::default();
        let mut buf = Vec::with_capacity(4096);

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            stats.lines += 1;

            let line = trim_line(&buf);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match self.process_line(line, stats.lines, tx.as_mut()).await {
                Ok(LineOutcome::Ignored) => {},
                Ok(LineOutcome::Stored(outcome)) => {
                    stats.matched += 1;
                    match outcome {
                        InsertOutcome::Inserted => stats.inserted += 1,
                        InsertOutcome::Duplicate => {
                            stats.duplicates += 1;
                            debug!(line = stats.lines, "Submission already present");
                        },
                        InsertOutcome::Rejected(reason) => {
                            stats.rejected += 1;
                            warn!(line = stats.lines, reason = %reason, "Sink rejected submission");
                        },
                    }
                },
                Err(IngestError::RecordParse { line: line_no, reason }) => {
                    stats.parse_errors += 1;
                    warn!(
                        line = line_no,
                        reason = %reason,
                        content = %excerpt(line),
                        "Could not process line"
                    );
                },
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;
        Ok(stats)
    }

    async fn process_line(
        &self,
        line: &[u8],
        line_no: u64,
        tx: &mut dyn SinkTransaction,
    ) -> Result<LineOutcome> {
        let parse_error = |reason: String| IngestError::RecordParse {
            line: line_no,
            reason,
        };

        let field: CategoryField =
            serde_json::from_slice(line).map_err(|e| parse_error(e.to_string()))?;

        if field.category() != Some(self.target_category.as_str()) {
            return Ok(LineOutcome::Ignored);
        }

        let record: SubmissionRecord =
            serde_json::from_slice(line).map_err(|e| parse_error(e.to_string()))?;
        let row = record.to_row().map_err(parse_error)?;

        Ok(LineOutcome::Stored(tx.insert(&row).await?))
    }
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

fn excerpt(line: &[u8]) -> String {
    String::from_utf8_lossy(line).chars().take(LINE_EXCERPT).collect()
}
