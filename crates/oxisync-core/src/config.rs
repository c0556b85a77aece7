//! Configuration module for OxiSync.
//!
//! Provides the typed [`SyncConfig`] that maps to the YAML configuration file
//! and to the JSON record kept in the state store, with loading, validation,
//! defaults, and a builder for programmatic use.
//!
//! Speed caps and the sync interval are unsigned: a serialized document that
//! carries a negative value fails to deserialize instead of reaching
//! [`SyncConfig::validate`].

use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SyncConfig and sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory of the local mirror.
    pub sync_folder: PathBuf,
    /// SQLite database holding baselines, conflicts, history and the session.
    pub database_path: PathBuf,
    /// Seconds between periodic passes; 0 disables the timer (manual only).
    pub sync_interval_seconds: u64,
    /// Upload cap in KiB/s; 0 means unlimited.
    pub max_upload_speed_kbps: u32,
    /// Download cap in KiB/s; 0 means unlimited.
    pub max_download_speed_kbps: u32,
    pub delta_sync_enabled: bool,
    /// Files smaller than this (bytes) are always transferred whole.
    pub delta_sync_min_size: u64,
    pub pause_on_metered: bool,
    pub wifi_only: bool,
    pub watch_filesystem: bool,
    /// Glob patterns, evaluated against each path and its ancestors.
    pub ignore_patterns: Vec<String>,
    pub notifications_enabled: bool,
    pub launch_at_startup: bool,
    pub minimize_to_tray: bool,
    pub conflicts: ConflictsConfig,
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,
}

/// Conflict resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Default strategy: `manual`, `most_recent_wins`, or `keep_both`.
    pub strategy: String,
    /// Per-path overrides, first match wins.
    pub rules: Vec<ConflictRuleConfig>,
    /// Modification times closer than this are treated as simultaneous.
    pub simultaneous_epsilon_secs: u64,
}

/// One glob rule mapping paths to a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRuleConfig {
    pub pattern: String,
    /// `manual`, `most_recent_wins`, `keep_both`, `keep_local` or `keep_remote`.
    pub strategy: String,
}

/// Transfer queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Bytes read or written per I/O call; also the throttle acquisition unit.
    pub chunk_size: u64,
    /// Block size for delta signatures.
    pub delta_block_size: u64,
    pub detect_renames: bool,
    /// Seconds between network re-checks while the queue is suspended.
    pub network_poll_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default ignore list applied to new configurations.
pub fn default_ignore_patterns() -> Vec<String> {
    [
        ".DS_Store",
        "Thumbs.db",
        "desktop.ini",
        "*.tmp",
        "*.temp",
        "~*",
        "*.swp",
        "*.swo",
        ".*",
        ".idea/**",
        ".vscode/**",
        "*.sublime-*",
        "node_modules/**",
        "target/**",
        "build/**",
        "dist/**",
        "__pycache__/**",
        "*.pyc",
        "*.log",
        "logs/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_folder: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("OxiCloud"),
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("oxisync")
                .join("oxisync.db"),
            sync_interval_seconds: 300,
            max_upload_speed_kbps: 0,
            max_download_speed_kbps: 0,
            delta_sync_enabled: true,
            delta_sync_min_size: 10 * 1024 * 1024,
            pause_on_metered: true,
            wifi_only: false,
            watch_filesystem: true,
            ignore_patterns: default_ignore_patterns(),
            notifications_enabled: true,
            launch_at_startup: false,
            minimize_to_tray: true,
            conflicts: ConflictsConfig::default(),
            transfer: TransferConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            strategy: "manual".to_string(),
            rules: Vec::new(),
            simultaneous_epsilon_secs: 2,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 1000,
            chunk_size: 4 * 1024 * 1024,
            delta_block_size: 1024 * 1024,
            detect_renames: false,
            network_poll_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and saving
// ---------------------------------------------------------------------------

impl SyncConfig {
    /// Config rooted at `sync_folder` with the database at `database_path`.
    pub fn new(sync_folder: impl Into<PathBuf>, database_path: impl Into<PathBuf>) -> Self {
        Self {
            sync_folder: sync_folder.into(),
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`SyncConfig::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/oxisync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("oxisync")
            .join("config.yaml")
    }

    /// Upload cap in bytes per second, 0 for unlimited.
    pub fn upload_limit_bytes_per_sec(&self) -> u64 {
        u64::from(self.max_upload_speed_kbps) * 1024
    }

    /// Download cap in bytes per second, 0 for unlimited.
    pub fn download_limit_bytes_per_sec(&self) -> u64 {
        u64::from(self.max_download_speed_kbps) * 1024
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"transfer.chunk_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `conflicts.strategy`.
pub const VALID_CONFLICT_STRATEGIES: &[&str] = &["manual", "most_recent_wins", "keep_both"];

/// Valid values for `conflicts.rules[].strategy`.
pub const VALID_RULE_STRATEGIES: &[&str] = &[
    "manual",
    "most_recent_wins",
    "keep_both",
    "keep_local",
    "keep_remote",
];

/// Upper bound for `transfer.chunk_size` (256 MiB).
const MAX_CHUNK_SIZE: u64 = 256 * 1024 * 1024;

/// Upper bound for `transfer.max_retries`.
const MAX_RETRIES_LIMIT: u32 = 10;

impl SyncConfig {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- paths ---
        if self.sync_folder.as_os_str().is_empty() {
            errors.push(ValidationError::new("sync_folder", "is required"));
        } else if !self.sync_folder.is_absolute() {
            errors.push(ValidationError::new(
                "sync_folder",
                format!("must be an absolute path: {}", self.sync_folder.display()),
            ));
        }
        if self.database_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("database_path", "is required"));
        }

        // --- ignore patterns ---
        for (idx, pattern) in self.ignore_patterns.iter().enumerate() {
            if pattern.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("ignore_patterns[{idx}]"),
                    "must not be empty",
                ));
            } else if let Err(e) = Pattern::new(pattern) {
                errors.push(ValidationError::new(
                    format!("ignore_patterns[{idx}]"),
                    format!("invalid glob '{pattern}': {}", e.msg),
                ));
            }
        }

        // --- conflicts ---
        if !VALID_CONFLICT_STRATEGIES.contains(&self.conflicts.strategy.as_str()) {
            errors.push(ValidationError::new(
                "conflicts.strategy",
                format!(
                    "must be one of {:?}, got '{}'",
                    VALID_CONFLICT_STRATEGIES, self.conflicts.strategy
                ),
            ));
        }
        for (idx, rule) in self.conflicts.rules.iter().enumerate() {
            if let Err(e) = Pattern::new(&rule.pattern) {
                errors.push(ValidationError::new(
                    format!("conflicts.rules[{idx}].pattern"),
                    format!("invalid glob '{}': {}", rule.pattern, e.msg),
                ));
            }
            if !VALID_RULE_STRATEGIES.contains(&rule.strategy.as_str()) {
                errors.push(ValidationError::new(
                    format!("conflicts.rules[{idx}].strategy"),
                    format!(
                        "must be one of {:?}, got '{}'",
                        VALID_RULE_STRATEGIES, rule.strategy
                    ),
                ));
            }
        }

        // --- transfer ---
        if self.transfer.chunk_size == 0 {
            errors.push(ValidationError::new(
                "transfer.chunk_size",
                "must be greater than 0",
            ));
        } else if self.transfer.chunk_size > MAX_CHUNK_SIZE {
            errors.push(ValidationError::new(
                "transfer.chunk_size",
                format!("must not exceed {MAX_CHUNK_SIZE} bytes"),
            ));
        }
        if self.transfer.delta_block_size == 0 {
            errors.push(ValidationError::new(
                "transfer.delta_block_size",
                "must be greater than 0",
            ));
        }
        if self.transfer.max_retries > MAX_RETRIES_LIMIT {
            errors.push(ValidationError::new(
                "transfer.max_retries",
                format!("must not exceed {MAX_RETRIES_LIMIT}"),
            ));
        }
        if self.transfer.network_poll_secs == 0 {
            errors.push(ValidationError::new(
                "transfer.network_poll_secs",
                "must be greater than 0",
            ));
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError::new(
                "logging.level",
                format!(
                    "must be one of {:?}, got '{}'",
                    VALID_LOG_LEVELS, self.logging.level
                ),
            ));
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`SyncConfig`] programmatically.
///
/// # Example
///
/// ```
/// use oxisync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .sync_folder("/srv/oxicloud")
///     .database_path("/var/lib/oxisync/state.db")
///     .sync_interval_seconds(60)
///     .build_validated()
///     .expect("valid config");
/// assert_eq!(config.sync_interval_seconds, 60);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: SyncConfig,
}

impl ConfigBuilder {
    /// Start from [`SyncConfig::default`].
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn sync_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sync_folder = path.into();
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    pub fn sync_interval_seconds(mut self, seconds: u64) -> Self {
        self.config.sync_interval_seconds = seconds;
        self
    }

    pub fn max_upload_speed_kbps(mut self, kbps: u32) -> Self {
        self.config.max_upload_speed_kbps = kbps;
        self
    }

    pub fn max_download_speed_kbps(mut self, kbps: u32) -> Self {
        self.config.max_download_speed_kbps = kbps;
        self
    }

    pub fn delta_sync(mut self, enabled: bool, min_size: u64) -> Self {
        self.config.delta_sync_enabled = enabled;
        self.config.delta_sync_min_size = min_size;
        self
    }

    pub fn pause_on_metered(mut self, pause: bool) -> Self {
        self.config.pause_on_metered = pause;
        self
    }

    pub fn wifi_only(mut self, wifi_only: bool) -> Self {
        self.config.wifi_only = wifi_only;
        self
    }

    pub fn watch_filesystem(mut self, watch: bool) -> Self {
        self.config.watch_filesystem = watch;
        self
    }

    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.ignore_patterns = patterns;
        self
    }

    pub fn conflict_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.config.conflicts.strategy = strategy.into();
        self
    }

    pub fn conflict_rule(mut self, pattern: impl Into<String>, strategy: impl Into<String>) -> Self {
        self.config.conflicts.rules.push(ConflictRuleConfig {
            pattern: pattern.into(),
            strategy: strategy.into(),
        });
        self
    }

    pub fn simultaneous_epsilon_secs(mut self, secs: u64) -> Self {
        self.config.conflicts.simultaneous_epsilon_secs = secs;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.transfer.max_retries = retries;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.transfer.retry_base_delay_ms = ms;
        self
    }

    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.config.transfer.chunk_size = bytes;
        self
    }

    pub fn delta_block_size(mut self, bytes: u64) -> Self {
        self.config.transfer.delta_block_size = bytes;
        self
    }

    pub fn detect_renames(mut self, detect: bool) -> Self {
        self.config.transfer.detect_renames = detect;
        self
    }

    pub fn network_poll_secs(mut self, secs: u64) -> Self {
        self.config.transfer.network_poll_secs = secs;
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the finished [`SyncConfig`].
    pub fn build(self) -> SyncConfig {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<SyncConfig, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
