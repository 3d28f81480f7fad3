//! Archive downloads
//!
//! Bodies are streamed chunk by chunk into the destination file; a 6 GB
//! archive never sits in memory. There is no internal retry: a failed
//! download abandons the archive and the next run tries again.

use crate::archive::ArchiveName;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Fetches archives from the remote directory into local storage
pub struct Downloader {
    client: Client,
    base_url: String,
    show_progress: bool,
}

impl Downloader {
    pub fn new(config: &IngestConfig, client: Client) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            show_progress: config.show_progress,
        }
    }

    /// Download `name` into `destination_dir`, replacing any stale partial file.
    ///
    /// Returns the local path and the number of bytes written.
    pub async fn download(&self, name: &ArchiveName, destination_dir: &Path) -> Result<(PathBuf, u64)> {
        let url = format!("{}/{}", self.base_url, name);
        let output_path = destination_dir.join(name.to_string());

        info!(archive = %name, url = %url, "Downloading archive");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(IngestError::HttpStatus {
                url,
                status: response.status(),
            });
        }

        let total_size = response.content_length().unwrap_or(0);
        let pb = self.progress_bar(total_size, name);

        let mut file = tokio::fs::File::create(&output_path).await?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }

        file.flush().await?;
        file.sync_all().await?;

        pb.finish_and_clear();
        debug!(archive = %name, bytes = downloaded, expected = total_size, "Download finished");

        Ok((output_path, downloaded))
    }

    fn progress_bar(&self, total_size: u64, name: &ArchiveName) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(total_size);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!("Downloading {}", name));
        pb
    }
}

/// Delete a local archive if it is still present
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path).await? {
        tokio::fs::remove_file(path).await?;
        debug!(path = %path.display(), "Removed local archive");
    }
    Ok(())
}
