//! Application configuration
//!
//! Loaded from a YAML file (default location under the platform config
//! directory), with every section individually defaultable so a partial
//! file works. `validate()` collects field-level problems instead of
//! failing on the first one, so a user sees everything wrong at once.
//!
//! ```yaml
//! sync:
//!   root: /home/user/Nimbus
//!   exclude_patterns: ["*.tmp", ".git/**"]
//! bandwidth:
//!   upload_limit_bps: 1048576
//!   auto_throttle: true
//! conflicts:
//!   default_strategy: keep_newer
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::ConflictStrategy;

// ============================================================================
// ValidationError
// ============================================================================

/// One field-level configuration problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. `offline.cleanup_threshold`)
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Core sync behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root of the local tree kept in sync
    pub root: PathBuf,
    /// Remote folders materialized locally (empty = everything)
    pub selected_folders: Vec<String>,
    /// Glob patterns excluded from watching and scanning
    pub exclude_patterns: Vec<String>,
    /// Seconds between periodic reconciliation passes
    pub periodic_interval_secs: u64,
    /// Milliseconds a path must stay quiet before its events settle
    pub debounce_ms: u64,
    /// Maximum attempts per transfer before marking the item errored
    pub max_retry_attempts: u32,
    /// Upper bound on concurrently in-flight per-item tasks
    pub max_concurrent_transfers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/"))
                .join("Nimbus"),
            selected_folders: Vec::new(),
            exclude_patterns: vec!["*.tmp".to_string(), "*.partial".to_string()],
            periodic_interval_secs: 2,
            debounce_ms: 500,
            max_retry_attempts: 5,
            max_concurrent_transfers: 8,
        }
    }
}

/// One daily window during which syncing is allowed
///
/// Times are local wall-clock `HH:MM`; a window may wrap midnight
/// (`22:00`–`06:00`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    /// Inclusive start, `HH:MM`
    pub start: String,
    /// Exclusive end, `HH:MM`
    pub end: String,
}

impl SyncWindow {
    /// Parses `HH:MM` into minutes past midnight
    fn parse_minutes(s: &str) -> Option<u32> {
        let (h, m) = s.split_once(':')?;
        let h: u32 = h.parse().ok()?;
        let m: u32 = m.parse().ok()?;
        if h > 23 || m > 59 {
            return None;
        }
        Some(h * 60 + m)
    }

    /// Whether both bounds parse as valid times
    pub fn is_valid(&self) -> bool {
        Self::parse_minutes(&self.start).is_some() && Self::parse_minutes(&self.end).is_some()
    }

    /// Whether `minutes_of_day` falls inside this window (wrap-aware)
    pub fn contains(&self, minutes_of_day: u32) -> bool {
        let (Some(start), Some(end)) = (
            Self::parse_minutes(&self.start),
            Self::parse_minutes(&self.end),
        ) else {
            return false;
        };
        if start <= end {
            minutes_of_day >= start && minutes_of_day < end
        } else {
            // Wraps midnight
            minutes_of_day >= start || minutes_of_day < end
        }
    }
}

/// Bandwidth limits and throttling behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    /// Upload ceiling in bytes/sec (None = unlimited)
    pub upload_limit_bps: Option<u64>,
    /// Download ceiling in bytes/sec (None = unlimited)
    pub download_limit_bps: Option<u64>,
    /// Scale limits by observed network quality
    pub auto_throttle: bool,
    /// Halve limits while the host is in power-saving mode
    pub power_saving: bool,
    /// Allow transfers over metered connections
    pub allow_metered: bool,
    /// Daily windows during which syncing runs (empty = always on)
    pub sync_windows: Vec<SyncWindow>,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            upload_limit_bps: None,
            download_limit_bps: None,
            auto_throttle: true,
            power_saving: false,
            allow_metered: false,
            sync_windows: Vec::new(),
        }
    }
}

/// One path-scoped conflict rule: first matching pattern wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRule {
    /// Glob pattern matched against the item's remote path
    pub pattern: String,
    /// Strategy applied to matching items
    pub strategy: ConflictStrategy,
}

/// Conflict-resolution policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Strategy when no rule matches
    pub default_strategy: ConflictStrategy,
    /// Path-scoped overrides, evaluated in order
    pub rules: Vec<ConflictRule>,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            default_strategy: ConflictStrategy::AskUser,
            rules: Vec::new(),
        }
    }
}

/// Offline queue and cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Cache directory (None = `<data dir>/nimbus/cache`)
    pub cache_dir: Option<PathBuf>,
    /// Cache size ceiling in bytes
    pub cache_capacity_bytes: u64,
    /// Cleanup target as a fraction of capacity (0, 1]
    pub cleanup_threshold: f64,
    /// Hours a queued modification may wait before being abandoned
    pub retry_horizon_hours: i64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            cache_capacity_bytes: 10 * 1024 * 1024 * 1024,
            cleanup_threshold: 0.8,
            retry_horizon_hours: 24,
        }
    }
}

/// Logging behavior for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter (overridden by `RUST_LOG`)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub bandwidth: BandwidthConfig,
    pub conflicts: ConflictConfig,
    pub offline: OfflineConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Default config file location: `<config dir>/nimbus/config.yaml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nimbus")
            .join("config.yaml")
    }

    /// Loads configuration from a YAML file
    ///
    /// # Errors
    /// Fails if the file cannot be read or does not parse as YAML.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Loads configuration, falling back to defaults on any failure
    ///
    /// A missing file is normal first-run behavior; a malformed file is
    /// logged and ignored rather than crashing the daemon.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "Config file unreadable, using defaults");
                }
                Self::default()
            }
        }
    }

    /// Writes the configuration to a YAML file, creating parent directories
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_yaml::to_string(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Collects every field-level problem in this configuration
    ///
    /// An empty result means the configuration is usable.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.sync.root.is_absolute() {
            errors.push(ValidationError {
                field: "sync.root".to_string(),
                message: "must be an absolute path".to_string(),
            });
        }
        if self.sync.periodic_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.periodic_interval_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.sync.max_retry_attempts == 0 {
            errors.push(ValidationError {
                field: "sync.max_retry_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.sync.max_concurrent_transfers == 0 {
            errors.push(ValidationError {
                field: "sync.max_concurrent_transfers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        for (i, pattern) in self.sync.exclude_patterns.iter().enumerate() {
            if glob::Pattern::new(pattern).is_err() {
                errors.push(ValidationError {
                    field: format!("sync.exclude_patterns[{i}]"),
                    message: format!("'{pattern}' is not a valid glob"),
                });
            }
        }
        for (i, folder) in self.sync.selected_folders.iter().enumerate() {
            if let Err(e) = crate::domain::RemotePath::new(folder.clone()) {
                errors.push(ValidationError {
                    field: format!("sync.selected_folders[{i}]"),
                    message: e.to_string(),
                });
            }
        }

        if self.bandwidth.upload_limit_bps == Some(0) {
            errors.push(ValidationError {
                field: "bandwidth.upload_limit_bps".to_string(),
                message: "0 would refuse all uploads; omit the field for unlimited".to_string(),
            });
        }
        if self.bandwidth.download_limit_bps == Some(0) {
            errors.push(ValidationError {
                field: "bandwidth.download_limit_bps".to_string(),
                message: "0 would refuse all downloads; omit the field for unlimited".to_string(),
            });
        }
        for (i, window) in self.bandwidth.sync_windows.iter().enumerate() {
            if !window.is_valid() {
                errors.push(ValidationError {
                    field: format!("bandwidth.sync_windows[{i}]"),
                    message: format!("'{}'–'{}' is not a valid HH:MM range", window.start, window.end),
                });
            }
        }

        for (i, rule) in self.conflicts.rules.iter().enumerate() {
            if glob::Pattern::new(&rule.pattern).is_err() {
                errors.push(ValidationError {
                    field: format!("conflicts.rules[{i}].pattern"),
                    message: format!("'{}' is not a valid glob", rule.pattern),
                });
            }
        }

        if self.offline.cache_capacity_bytes == 0 {
            errors.push(ValidationError {
                field: "offline.cache_capacity_bytes".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if !(self.offline.cleanup_threshold > 0.0 && self.offline.cleanup_threshold <= 1.0) {
            errors.push(ValidationError {
                field: "offline.cleanup_threshold".to_string(),
                message: "must be in (0, 1]".to_string(),
            });
        }
        if self.offline.retry_horizon_hours <= 0 {
            errors.push(ValidationError {
                field: "offline.retry_horizon_hours".to_string(),
                message: "must be positive".to_string(),
            });
        }

        errors
    }

    /// Resolved cache directory
    pub fn cache_dir(&self) -> PathBuf {
        self.offline.cache_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nimbus")
                .join("cache")
        })
    }
}

// ============================================================================
// Unit tests
// ============================================================================
