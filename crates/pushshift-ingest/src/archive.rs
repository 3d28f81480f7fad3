//! Archive naming
//!
//! Remote archives are named `<prefix>_<YYYY-MM>.<ext>`. The `YYYY-MM` token
//! is the only ordering key: it sorts chronologically under plain lexical
//! comparison, so no date parsing is needed to order the catalog.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Compression format of a published archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Bz2,
    Xz,
    Zst,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 3] = [ArchiveFormat::Bz2, ArchiveFormat::Xz, ArchiveFormat::Zst];

    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Bz2 => "bz2",
            ArchiveFormat::Xz => "xz",
            ArchiveFormat::Zst => "zst",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "bz2" => Some(ArchiveFormat::Bz2),
            "xz" => Some(ArchiveFormat::Xz),
            "zst" => Some(ArchiveFormat::Zst),
            _ => None,
        }
    }

    /// Format of a local file, decided purely by its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| IngestError::UnsupportedFormat(path.display().to_string()))
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Name of one remote archive, e.g. `RS_2015-06.zst`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveName {
    stem: String,
    format: ArchiveFormat,
}

impl ArchiveName {
    /// Build a name from its stem (`RS_2015-06`) and format
    pub fn new(stem: impl Into<String>, format: ArchiveFormat) -> Result<Self> {
        let stem = stem.into();
        let month = month_token(&stem);
        validate_month(month)
            .map_err(|_| IngestError::Catalog(format!("no YYYY-MM token in archive name '{}'", stem)))?;
        Ok(Self { stem, format })
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// The logical month (`YYYY-MM`) this archive covers
    pub fn month(&self) -> &str {
        month_token(&self.stem)
    }
}

impl FromStr for ArchiveName {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let (stem, ext) = s
            .rsplit_once('.')
            .ok_or_else(|| IngestError::UnsupportedFormat(s.to_string()))?;
        let format =
            ArchiveFormat::from_extension(ext).ok_or_else(|| IngestError::UnsupportedFormat(s.to_string()))?;
        Self::new(stem, format)
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stem, self.format)
    }
}

/// Trailing `_`-separated token of an archive stem
pub fn month_token(stem: &str) -> &str {
    stem.rsplit('_').next().unwrap_or(stem)
}

/// Check that `s` is a `YYYY-MM` month with MM in 01..=12
pub fn validate_month(s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let well_formed = bytes.len() == 7
        && bytes[4] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[5..].iter().all(u8::is_ascii_digit);

    if well_formed && matches!(s[5..].parse::<u8>(), Ok(1..=12)) {
        Ok(())
    } else {
        Err(IngestError::Config(format!("'{}' is not a YYYY-MM month", s)))
    }
}
