//! Configuration module for tandem.
//!
//! One YAML file configures every sync pair the process runs: engine timing,
//! the conflict strategy, logging and where the state database lives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ConflictStrategy, DomainError};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for tandem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncSettings,
    pub conflicts: ConflictsConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
}

/// Engine timing and queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Quiet period before a local change is emitted (milliseconds).
    pub debounce_ms: u64,
    /// Seconds between remote change-feed polls.
    pub poll_interval_secs: u64,
    /// Seconds between pending-upload sweeps.
    pub sweep_interval_secs: u64,
    /// Per-call deadline for remote operations (seconds).
    pub remote_timeout_secs: u64,
    /// Capacity of the local watcher's output queue.
    pub watch_queue_capacity: usize,
    /// Capacity of the poller's change-batch queue.
    pub change_queue_capacity: usize,
}

/// Conflict resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Strategy name: `rename`, `local-wins` or `remote-wins` (aliases accepted).
    pub strategy: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

/// State database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Parses the YAML file at `path`. Missing keys take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`Config::load`], but an unreadable or invalid file yields the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Where the config file lives when `--config` is not given
    ///
    /// Typically `$XDG_CONFIG_HOME/tandem/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tandem")
            .join("config.yaml")
    }

    /// Parsed conflict strategy.
    pub fn conflict_strategy(&self) -> Result<ConflictStrategy, DomainError> {
        self.conflicts.strategy.parse()
    }
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            poll_interval_secs: 5,
            sweep_interval_secs: 30,
            remote_timeout_secs: 60,
            watch_queue_capacity: 100,
            change_queue_capacity: 16,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::default().to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("tandem")
                .join("sync.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// One offending setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval_secs"`.
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Accepted `logging.level` values
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Every problem in the configuration, empty when it is usable
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut require_positive = |field: &str, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        };

        // --- sync ---
        require_positive("sync.debounce_ms", self.sync.debounce_ms);
        require_positive("sync.poll_interval_secs", self.sync.poll_interval_secs);
        require_positive("sync.sweep_interval_secs", self.sync.sweep_interval_secs);
        require_positive("sync.remote_timeout_secs", self.sync.remote_timeout_secs);
        require_positive(
            "sync.watch_queue_capacity",
            self.sync.watch_queue_capacity as u64,
        );
        require_positive(
            "sync.change_queue_capacity",
            self.sync.change_queue_capacity as u64,
        );

        // --- conflicts ---
        if let Err(e) = self.conflict_strategy() {
            errors.push(ValidationError {
                field: "conflicts.strategy".into(),
                message: e.to_string(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        // --- database ---
        if self.database.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "database.path".into(),
                message: "must not be empty".into(),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Programmatic [`Config`] construction, mostly for tests
///
/// Unset fields keep their defaults.
///
/// # Example
///
/// ```rust
/// use tandem_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .sync_debounce_ms(250)
///     .conflicts_strategy("remote-wins")
///     .logging_level("debug")
///     .build();
/// assert!(config.validate().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Starts from [`Config::default`]
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_debounce_ms(mut self, ms: u64) -> Self {
        self.config.sync.debounce_ms = ms;
        self
    }

    pub fn sync_poll_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval_secs = seconds;
        self
    }

    pub fn sync_sweep_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.sweep_interval_secs = seconds;
        self
    }

    pub fn sync_remote_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.sync.remote_timeout_secs = seconds;
        self
    }

    pub fn sync_watch_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.sync.watch_queue_capacity = capacity;
        self
    }

    pub fn sync_change_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.sync.change_queue_capacity = capacity;
        self
    }

    // --- conflicts ---

    pub fn conflicts_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.config.conflicts.strategy = strategy.into();
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- database ---

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.database.path = path;
        self
    }

    /// Returns the finished [`Config`]
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
