//! Ingestion configuration
//!
//! Values are layered, later sources winning:
//! 1. built-in defaults
//! 2. an optional TOML file (`pushshift.toml` unless `--config` says otherwise)
//! 3. `PUSHSHIFT_`-prefixed environment variables, `__` separating nested keys
//!    (`PUSHSHIFT_DATABASE__URL`), plus the conventional `DATABASE_URL`
//!
//! A `.env` file in the working directory is read first.

use crate::archive::{validate_month, ArchiveFormat};
use crate::error::{IngestError, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_CONFIG_FILE: &str = "pushshift.toml";
pub const DEFAULT_BASE_URL: &str = "https://files.pushshift.io/reddit/submissions/";
pub const DEFAULT_CHECKSUM_FILE: &str = "sha256sums.txt";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_CHECKPOINT_FILE: &str = "./already_processed.txt";
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/pushshift";

/// One connection is enough for a sequential pipeline; the second serves `list`.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 2;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_USER_AGENT: &str = concat!("pushshift-ingest/", env!("CARGO_PKG_VERSION"));

/// Top-level configuration threaded into every pipeline component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Scratch directory for downloaded archives
    pub data_dir: PathBuf,

    /// Ledger of fully processed archive names
    pub checkpoint_file: PathBuf,

    /// Records whose `subreddit` equals this value exactly are loaded
    pub subreddit: String,

    pub database: DatabaseConfig,

    /// Remote directory holding the index page, manifest and archives
    pub base_url: String,

    /// Checksum manifest name, relative to `base_url`
    pub checksum_file: String,

    /// Resume month used when the command line gives none
    pub default_since: Option<String>,

    /// Whole-request timeout; 0 leaves downloads unbounded
    pub http_timeout_secs: u64,

    pub user_agent: String,

    pub show_progress: bool,

    pub decompressors: DecompressorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// External command (program followed by arguments) per archive format.
/// The archive path is appended as the final argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompressorConfig {
    pub bz2: Vec<String>,
    pub xz: Vec<String>,
    pub zst: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            checkpoint_file: PathBuf::from(DEFAULT_CHECKPOINT_FILE),
            subreddit: String::new(),
            database: DatabaseConfig::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            checksum_file: DEFAULT_CHECKSUM_FILE.to_string(),
            default_since: None,
            http_timeout_secs: 0,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            show_progress: true,
            decompressors: DecompressorConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl Default for DecompressorConfig {
    fn default() -> Self {
        Self {
            bz2: vec!["bzcat".to_string()],
            xz: vec!["xzcat".to_string()],
            // Monthly dumps are compressed with a 2 GiB window
            zst: vec!["zstd".to_string(), "-dc".to_string(), "--long=31".to_string()],
        }
    }
}

impl DecompressorConfig {
    /// Use the same command for every format
    pub fn uniform(command: &[&str]) -> Self {
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        Self {
            bz2: command.clone(),
            xz: command.clone(),
            zst: command,
        }
    }

    pub fn command(&self, format: ArchiveFormat) -> &[String] {
        match format {
            ArchiveFormat::Bz2 => &self.bz2,
            ArchiveFormat::Xz => &self.xz,
            ArchiveFormat::Zst => &self.zst,
        }
    }
}

impl IngestConfig {
    /// Load configuration from defaults, file and environment, then validate.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) if !p.exists() => {
                return Err(IngestError::Config(format!("config file {} not found", p.display())))
            },
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: IngestConfig = Figment::from(Serialized::defaults(IngestConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::prefixed("PUSHSHIFT_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subreddit.trim().is_empty() {
            return Err(IngestError::Config("subreddit must be set".to_string()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(IngestError::Config("data_dir cannot be empty".to_string()));
        }
        if self.checkpoint_file.as_os_str().is_empty() {
            return Err(IngestError::Config("checkpoint_file cannot be empty".to_string()));
        }
        if self.base_url.is_empty() {
            return Err(IngestError::Config("base_url cannot be empty".to_string()));
        }
        if self.database.url.is_empty() {
            return Err(IngestError::Config("database.url cannot be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }
        for format in ArchiveFormat::ALL {
            if self.decompressors.command(format).is_empty() {
                return Err(IngestError::Config(format!(
                    "no decompressor configured for .{}",
                    format
                )));
            }
        }
        if let Some(since) = &self.default_since {
            validate_month(since)?;
        }
        Ok(())
    }

    /// URL of a file inside the remote directory
    pub fn remote_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), file_name)
    }

    /// URL of the index page
    pub fn index_url(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }

    /// Shared HTTP client for catalog and archive requests
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().user_agent(self.user_agent.as_str());
        if self.http_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(self.http_timeout_secs));
        }
        Ok(builder.build()?)
    }
}
