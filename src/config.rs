//! Configuration loading for Tally.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.tally/config.toml`)
//! 3. User config (`~/.tally/config.toml`)
//! 4. Defaults (lowest priority)
//!
//! All configuration is optional. The aggregator itself takes no
//! configuration; these settings only choose the store and shape how the
//! host feeds it.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FailOpen, Result, TallyError};
use crate::storage::sharded::DEFAULT_SHARDS;

/// Main configuration struct for Tally.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Aggregate store selection.
    pub store: StoreConfig,
    /// Batch ingestion settings.
    pub ingest: IngestConfig,
}

/// Which aggregate store to build.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// One lock for the whole map.
    #[default]
    Memory,
    /// Independently locked shards.
    Sharded,
}

impl StoreKind {
    /// Parse a store kind name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sharded" => Some(Self::Sharded),
            _ => None,
        }
    }

    /// The configuration name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sharded => "sharded",
        }
    }
}

/// Aggregate store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Store implementation.
    pub kind: StoreKind,
    /// Shard count for the sharded store, rounded up to a power of two.
    pub shards: usize,
}

impl StoreConfig {
    /// Check if a shard count is valid (at least one shard).
    pub fn is_valid_shards(value: usize) -> bool {
        value >= 1
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            shards: DEFAULT_SHARDS,
        }
    }
}

/// Batch ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Threads used to feed one batch.
    pub workers: usize,
    /// Lines longer than this are rejected without decoding.
    pub max_line_bytes: usize,
}

/// Upper bound on batch workers.
pub const MAX_WORKERS: usize = 256;

impl IngestConfig {
    /// Check if a worker count is valid.
    pub fn is_valid_workers(value: usize) -> bool {
        (1..=MAX_WORKERS).contains(&value)
    }

    /// Check if a line limit is valid.
    pub fn is_valid_max_line_bytes(value: usize) -> bool {
        value >= 2
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_line_bytes: 64 * 1024,
        }
    }
}

impl Config {
    /// Load configuration with full precedence chain.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. Project config (`.tally/config.toml` in cwd)
    /// 3. User config (`~/.tally/config.toml`)
    /// 4. Defaults
    pub fn load() -> Self {
        match env::current_dir() {
            Ok(cwd) => Self::load_from_cwd(&cwd),
            Err(_) => {
                let mut config = Config::default();
                if let Some(user_config) = Self::load_user_config() {
                    config = config.merge(user_config);
                }
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Load configuration with a specific working directory.
    pub fn load_from_cwd(cwd: &Path) -> Self {
        let mut config = Config::default();

        if let Some(user_config) = Self::load_user_config() {
            config = config.merge(user_config);
        }

        if let Some(project_config) = Self::load_project_config(cwd) {
            config = config.merge(project_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Load user config from `~/.tally/config.toml`.
    fn load_user_config() -> Option<Config> {
        let home = tally_home()?;
        Self::load_if_present(&home.join("config.toml"))
    }

    /// Load project config from `.tally/config.toml` in the given directory.
    fn load_project_config(cwd: &Path) -> Option<Config> {
        Self::load_if_present(&project_config_path(cwd))
    }

    /// Load a config file if it exists, warning when it cannot be parsed.
    fn load_if_present(path: &Path) -> Option<Config> {
        if !path.is_file() {
            return None;
        }
        Self::load_from_file(path)
            .map(Some)
            .fail_open_default(&format!("loading {}", path.display()))
    }

    /// Load config from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| TallyError::storage(path, e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| TallyError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no layer is allowed to set.
    pub fn validate(&self) -> Result<()> {
        if !StoreConfig::is_valid_shards(self.store.shards) {
            return Err(TallyError::config("store.shards must be at least 1"));
        }
        if !IngestConfig::is_valid_workers(self.ingest.workers) {
            return Err(TallyError::config(format!(
                "ingest.workers must be between 1 and {MAX_WORKERS}"
            )));
        }
        if !IngestConfig::is_valid_max_line_bytes(self.ingest.max_line_bytes) {
            return Err(TallyError::config("ingest.max_line_bytes must be at least 2"));
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // TALLY_STORE_KIND
        if let Ok(val) = env::var("TALLY_STORE_KIND") {
            match StoreKind::parse(&val) {
                Some(kind) => self.store.kind = kind,
                None => tracing::warn!(
                    "Invalid TALLY_STORE_KIND value '{}'. Expected 'memory' or 'sharded'. \
                    Using '{}'.",
                    val,
                    self.store.kind.as_str()
                ),
            }
        }

        // TALLY_SHARDS
        if let Some(n) = parse_env("TALLY_SHARDS", self.store.shards) {
            if StoreConfig::is_valid_shards(n) {
                self.store.shards = n;
            } else {
                tracing::warn!(
                    "Invalid TALLY_SHARDS value '{}'. Must be >= 1. Using '{}'.",
                    n,
                    self.store.shards
                );
            }
        }

        // TALLY_WORKERS
        if let Some(n) = parse_env("TALLY_WORKERS", self.ingest.workers) {
            if IngestConfig::is_valid_workers(n) {
                self.ingest.workers = n;
            } else {
                tracing::warn!(
                    "Invalid TALLY_WORKERS value '{}'. Must be between 1 and {}. Using '{}'.",
                    n,
                    MAX_WORKERS,
                    self.ingest.workers
                );
            }
        }

        // TALLY_MAX_LINE_BYTES
        if let Some(n) = parse_env("TALLY_MAX_LINE_BYTES", self.ingest.max_line_bytes) {
            if IngestConfig::is_valid_max_line_bytes(n) {
                self.ingest.max_line_bytes = n;
            } else {
                tracing::warn!(
                    "Invalid TALLY_MAX_LINE_BYTES value '{}'. Must be >= 2. Using '{}'.",
                    n,
                    self.ingest.max_line_bytes
                );
            }
        }
    }

    /// Merge another config into this one.
    ///
    /// Values from `other` take precedence when they differ from defaults.
    /// A layer that explicitly sets a value back to its default therefore
    /// cannot override a non-default value from a lower layer.
    fn merge(mut self, other: Config) -> Self {
        let default_store = StoreConfig::default();
        if other.store.kind != default_store.kind {
            self.store.kind = other.store.kind;
        }
        if other.store.shards != default_store.shards {
            self.store.shards = other.store.shards;
        }

        let default_ingest = IngestConfig::default();
        if other.ingest.workers != default_ingest.workers {
            self.ingest.workers = other.ingest.workers;
        }
        if other.ingest.max_line_bytes != default_ingest.max_line_bytes {
            self.ingest.max_line_bytes = other.ingest.max_line_bytes;
        }

        self
    }
}

/// Read a numeric environment variable, warning when it does not parse.
fn parse_env(name: &str, current: usize) -> Option<usize> {
    let val = env::var(name).ok()?;
    match val.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(
                "Invalid {} value '{}'. Expected a positive integer. Using '{}'.",
                name,
                val,
                current
            );
            None
        }
    }
}

/// Get the Tally home directory.
///
/// Uses `TALLY_HOME` if set and non-empty, otherwise `~/.tally`. Falls back
/// to a per-user temp directory when no home directory is known.
pub fn tally_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("TALLY_HOME") {
        if home.is_empty() {
            tracing::warn!("TALLY_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            tracing::warn!("TALLY_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return Some(home.join(".tally"));
    }

    let fallback = env::temp_dir().join("tally");
    tracing::warn!(
        "HOME not set, using fallback location: {}",
        fallback.display()
    );
    Some(fallback)
}

/// Get the project config path for a working directory.
pub fn project_config_path(cwd: &Path) -> PathBuf {
    cwd.join(".tally").join("config.toml")
}

/// Get the crash log path.
pub fn crash_log_path() -> Option<PathBuf> {
    tally_home().map(|home| home.join("crash.log"))
}
