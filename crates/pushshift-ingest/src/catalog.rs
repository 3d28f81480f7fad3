//! Remote catalog discovery
//!
//! The remote directory publishes an HTML index whose table rows with class
//! `file` link to the monthly archives, plus a `sha256sums.txt` manifest.
//! The same month can be published in several formats; [`select_candidates`]
//! decides which copy to fetch and orders the result chronologically.

use crate::archive::{month_token, ArchiveFormat, ArchiveName};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::verify::ChecksumManifest;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Archive stems available in each format, in index order
pub type AvailableArchives = BTreeMap<ArchiveFormat, Vec<String>>;

/// Client for the remote index page and checksum manifest
pub struct CatalogClient {
    client: Client,
    index_url: String,
    checksum_url: String,
}

impl CatalogClient {
    pub fn new(config: &IngestConfig, client: Client) -> Self {
        Self {
            client,
            index_url: config.index_url(),
            checksum_url: config.remote_url(&config.checksum_file),
        }
    }

    /// Archives to process, oldest first, optionally starting at `since`
    pub async fn list_candidates(&self, since: Option<&str>) -> Result<Vec<ArchiveName>> {
        info!(url = %self.index_url, "Fetching remote archive index");

        let html = self.fetch_text(&self.index_url).await?;
        let available = parse_index(&html)?;
        let candidates = select_candidates(&available, since)?;

        info!(
            count = candidates.len(),
            since = since.unwrap_or("-"),
            "Resolved {} candidate archives",
            candidates.len()
        );

        Ok(candidates)
    }

    /// Expected SHA-256 digest per archive file name
    pub async fn fetch_checksums(&self) -> Result<ChecksumManifest> {
        info!(url = %self.checksum_url, "Fetching checksum manifest");

        let text = self.fetch_text(&self.checksum_url).await?;
        let manifest = ChecksumManifest::parse(&text);

        if manifest.is_empty() {
            warn!("Checksum manifest is empty; every archive will fail verification");
        }

        Ok(manifest)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Catalog(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(IngestError::Catalog(format!(
                "GET {} returned HTTP {}",
                url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| IngestError::Catalog(format!("reading {} failed: {}", url, e)))
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| IngestError::Catalog(format!("bad selector '{}': {}", css, e)))
}

/// Parse the index page into the stems available per format.
///
/// Only the first cell's link of each `tr.file` row is considered. Files
/// with an extension other than bz2/xz/zst, or without a month token, are
/// skipped.
pub fn parse_index(html: &str) -> Result<AvailableArchives> {
    let document = Html::parse_document(html);
    let table_selector = selector("table")?;
    let row_selector = selector("tr.file")?;
    let cell_selector = selector("td")?;
    let link_selector = selector("a")?;

    let table = document
        .select(&table_selector)
        .next()
        .ok_or_else(|| IngestError::Catalog("index page has no file table".to_string()))?;

    let mut available = AvailableArchives::new();

    for row in table.select(&row_selector) {
        let Some(link) = row
            .select(&cell_selector)
            .next()
            .and_then(|cell| cell.select(&link_selector).next())
        else {
            continue;
        };

        let file: String = link.text().collect::<String>().trim().to_string();

        match file.parse::<ArchiveName>() {
            Ok(name) => available
                .entry(name.format())
                .or_default()
                .push(name.stem().to_string()),
            Err(e) => debug!(file = %file, error = %e, "Skipping index entry"),
        }
    }

    Ok(available)
}

fn stems_of(available: &AvailableArchives, format: ArchiveFormat) -> &[String] {
    available.get(&format).map(Vec::as_slice).unwrap_or(&[])
}

/// Apply the format preference and ordering rules.
///
/// - a `bz2` archive is dropped when the same month is published as `xz`
/// - every `xz` and `zst` archive is kept
/// - the result is ordered by month token, ties keeping bz2, xz, zst order
/// - with `since`, the list starts at the first archive of that month
pub fn select_candidates(available: &AvailableArchives, since: Option<&str>) -> Result<Vec<ArchiveName>> {
    let stems = |format| stems_of(available, format);

    let xz_months: HashSet<&str> = stems(ArchiveFormat::Xz)
        .iter()
        .map(|stem| month_token(stem))
        .collect();

    let bz2 = stems(ArchiveFormat::Bz2)
        .iter()
        .filter(|stem| !xz_months.contains(month_token(stem)))
        .map(|stem| (stem, ArchiveFormat::Bz2));
    let xz = stems(ArchiveFormat::Xz).iter().map(|stem| (stem, ArchiveFormat::Xz));
    let zst = stems(ArchiveFormat::Zst).iter().map(|stem| (stem, ArchiveFormat::Zst));

    let mut candidates = bz2
        .chain(xz)
        .chain(zst)
        .map(|(stem, format)| ArchiveName::new(stem.clone(), format))
        .collect::<Result<Vec<_>>>()?;

    // Stable, so same-month ties keep the chain order above
    candidates.sort_by(|a, b| a.month().cmp(b.month()));

    match since {
        None => Ok(candidates),
        Some(month) => {
            let start = candidates
                .iter()
                .position(|name| name.month() == month)
                .ok_or_else(|| IngestError::ResumePointNotFound(month.to_string()))?;
            Ok(candidates.split_off(start))
        },
    }
}
