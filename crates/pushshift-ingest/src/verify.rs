//! Integrity verification of downloaded archives

use crate::error::{IngestError, Result};
use pushshift_common::checksum::verify_file_sha256;
use pushshift_common::CommonError;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, error};

/// Expected digests keyed by the exact remote file name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: HashMap<String, String>,
}

impl ChecksumManifest {
    /// Parse `<hex-hash>  <filename>` lines. Blank or malformed lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();

        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match line.split_once("  ") {
                Some((hash, file)) if !hash.is_empty() && !file.trim().is_empty() => {
                    entries.insert(file.trim().to_string(), hash.to_string());
                },
                _ => debug!(line = %line, "Skipping malformed checksum line"),
            }
        }

        Self { entries }
    }

    pub fn get(&self, file_name: &str) -> Option<&str> {
        self.entries.get(file_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for ChecksumManifest {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Check a local archive against the manifest entry for its file name.
///
/// Returns `Ok(())` only on an exact, case-sensitive digest match. A file
/// absent from the manifest cannot be trusted and yields
/// [`IngestError::ChecksumUnavailable`].
pub async fn verify(local_path: &Path, expected: &ChecksumManifest) -> Result<()> {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let Some(expected_hash) = expected.get(&file_name).map(str::to_string) else {
        error!(archive = %file_name, "No published checksum, refusing to trust download");
        return Err(IngestError::ChecksumUnavailable(file_name));
    };

    let path = local_path.to_path_buf();
    let expected_for_task = expected_hash.clone();
    let outcome = tokio::task::spawn_blocking(move || verify_file_sha256(path, &expected_for_task))
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(e)))?;

    match outcome {
        Ok(()) => {
            debug!(archive = %file_name, sha256 = %expected_hash, "Checksum verified");
            Ok(())
        },
        Err(CommonError::ChecksumMismatch { actual, .. }) => Err(IngestError::IntegrityMismatch {
            archive: file_name,
            expected: expected_hash,
            actual,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Boolean form of [`verify`]: false on mismatch, missing entry or unreadable file.
pub async fn matches(local_path: &Path, expected: &ChecksumManifest) -> bool {
    match verify(local_path, expected).await {
        Ok(()) => true,
        Err(e) => {
            error!(path = %local_path.display(), error = %e, "Integrity check failed");
            false
        },
    }
}
