//! Configuration file parser for ~/.config/podingest/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are most likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetchSettings, DEFAULT_MAX_FEED_SIZE};
use crate::ingest::PipelineSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but cannot be used.
    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level ingester configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. Relative paths resolve against the config
    /// directory; `None` means `podingest.db` inside it.
    pub database: Option<PathBuf>,

    /// Feeds per batch.
    pub batch_size: usize,

    /// Feeds fetched and reconciled in parallel within a batch.
    pub concurrency: usize,

    /// Pause between batches, in seconds.
    pub batch_delay_secs: u64,

    /// Bound on request + download + parse of one feed, in seconds.
    pub fetch_timeout_secs: u64,

    /// Deadline for the whole run, in seconds.
    pub run_timeout_secs: u64,

    /// Maximum accepted feed size in bytes.
    pub max_feed_bytes: usize,

    /// User-Agent header sent with every fetch.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            batch_size: 10,
            concurrency: 3,
            batch_delay_secs: 5,
            fetch_timeout_secs: 10,
            run_timeout_secs: 600,
            max_feed_bytes: DEFAULT_MAX_FEED_SIZE,
            user_agent: format!("podingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "database",
        "batch_size",
        "concurrency",
        "batch_delay_secs",
        "fetch_timeout_secs",
        "run_timeout_secs",
        "max_feed_bytes",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// Values are not range-checked here; call [`Config::validate`] after
    /// applying command-line overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            batch_size = config.batch_size,
            concurrency = config.concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("batch_size", self.batch_size as u64),
            ("concurrency", self.concurrency as u64),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("run_timeout_secs", self.run_timeout_secs),
            ("max_feed_bytes", self.max_feed_bytes as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "user_agent",
                reason: "must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Use a database path given on the command line. Unlike the `database`
    /// key, a relative path here is relative to `cwd`.
    pub fn override_database(&mut self, path: &Path, cwd: &Path) {
        self.database = Some(cwd.join(path));
    }

    /// Database path, resolved against `config_dir`.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        match &self.database {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => config_dir.join(path),
            None => config_dir.join("podingest.db"),
        }
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            batch_delay: Duration::from_secs(self.batch_delay_secs),
            fetch: FetchSettings {
                timeout: Duration::from_secs(self.fetch_timeout_secs),
                max_bytes: self.max_feed_bytes,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
