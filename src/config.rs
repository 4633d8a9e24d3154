//! Runtime configuration for photo-preload.
//!
//! Configuration is read once at startup from a JSON file (or built
//! programmatically) and never reloaded mid-session. The field set is
//! versioned: unknown fields, including the keyword options older cache
//! constructors used to accept, are rejected at load time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only configuration layout this build understands.
pub const CONFIG_VERSION: u32 = 1;

/// Upper bound on the prefetch worker pool.
pub const MAX_WORKERS: usize = 16;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "photo-preload", about = "Adaptive image cache and preloading engine")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Directory holding the photo collection.
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported config version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Layout version, must equal [`CONFIG_VERSION`].
    #[serde(default = "default_version")]
    pub version: u32,

    /// Byte budget ceiling for decoded images.
    pub max_cache_bytes: usize,

    /// Prefetch worker pool size.
    pub max_concurrency: usize,

    /// Eager preload window size.
    pub default_preload_depth: usize,

    /// Budget scaling under memory pressure.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Memory sampling and latency tracking.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Loading strategy selection.
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Prefetch failure handling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// HTTP control surface.
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            max_cache_bytes: 512 * 1024 * 1024, // 512 MB
            max_concurrency: 4,
            default_preload_depth: 5,
            cache: CacheConfig::default(),
            monitor: MonitorConfig::default(),
            strategy: StrategyConfig::default(),
            scheduler: SchedulerConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// How the byte budget shrinks as pressure rises.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Budget floor used under critical pressure.
    pub min_budget_bytes: usize,

    /// Fraction of `max_cache_bytes` allowed under medium pressure.
    pub medium_fraction: f64,

    /// Fraction of `max_cache_bytes` allowed under high pressure.
    pub high_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_budget_bytes: 64 * 1024 * 1024, // 64 MB
            medium_fraction: 0.75,
            high_fraction: 0.5,
        }
    }
}

/// Telemetry monitor settings.
///
/// Thresholds are free-memory ratios. Each pressure boundary has an enter
/// threshold (free ratio drops below it) and a higher exit threshold (free
/// ratio climbs above it).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MonitorConfig {
    /// Background sampling period.
    pub sample_interval_ms: u64,

    /// Latency samples kept per operation kind.
    pub latency_window: usize,

    /// Operations slower than this are counted as stalled.
    pub stall_threshold_ms: u64,

    pub medium_enter: f64,
    pub medium_exit: f64,
    pub high_enter: f64,
    pub high_exit: f64,
    pub critical_enter: f64,
    pub critical_exit: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 500,
            latency_window: 64,
            stall_threshold_ms: 2000,
            medium_enter: 0.40,
            medium_exit: 0.50,
            high_enter: 0.20,
            high_exit: 0.30,
            critical_enter: 0.08,
            critical_exit: 0.12,
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }
}

/// Loading strategy selector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StrategyConfig {
    /// Adaptive window under medium pressure with slow navigation.
    pub adaptive_depth: usize,

    /// Adaptive window under medium pressure with fast navigation.
    pub adaptive_depth_fast: usize,

    /// Sliding window for navigation velocity.
    pub velocity_window_ms: u64,

    /// Navigation rate above which paging counts as fast.
    pub fast_events_per_sec: f64,

    /// Average decoded size below which images count as small.
    pub small_image_bytes: usize,

    /// Average decoded size above which images count as large.
    pub large_image_bytes: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            adaptive_depth: 3,
            adaptive_depth_fast: 1,
            velocity_window_ms: 2000,
            fast_events_per_sec: 4.0,
            small_image_bytes: 8 * 1024 * 1024,  // 8 MB
            large_image_bytes: 32 * 1024 * 1024, // 32 MB
        }
    }
}

impl StrategyConfig {
    pub fn velocity_window(&self) -> Duration {
        Duration::from_millis(self.velocity_window_ms)
    }
}

/// Preload scheduler failure handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Decode attempts per task (first try plus retries).
    pub max_attempts: u32,

    /// How long a failed path is kept out of prefetch.
    pub failure_cooldown_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            failure_cooldown_ms: 30_000,
        }
    }
}

impl SchedulerConfig {
    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            Self::from_json(&data)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                expected: CONFIG_VERSION,
            });
        }
        if self.max_cache_bytes == 0 {
            return Err(invalid("max_cache_bytes", "must be greater than zero"));
        }
        if self.max_concurrency == 0 || self.max_concurrency > MAX_WORKERS {
            return Err(invalid(
                "max_concurrency",
                format!("must be between 1 and {MAX_WORKERS}"),
            ));
        }
        if self.cache.min_budget_bytes > self.max_cache_bytes {
            return Err(invalid("cache.min_budget_bytes", "exceeds max_cache_bytes"));
        }
        for (field, value) in [
            ("cache.medium_fraction", self.cache.medium_fraction),
            ("cache.high_fraction", self.cache.high_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, "must be within 0.0..=1.0"));
            }
        }
        if self.cache.high_fraction > self.cache.medium_fraction {
            return Err(invalid("cache.high_fraction", "exceeds cache.medium_fraction"));
        }

        let m = &self.monitor;
        let bands = [
            ("monitor.medium", m.medium_enter, m.medium_exit),
            ("monitor.high", m.high_enter, m.high_exit),
            ("monitor.critical", m.critical_enter, m.critical_exit),
        ];
        for (field, enter, exit) in bands {
            if !(0.0..=1.0).contains(&enter) || !(0.0..=1.0).contains(&exit) || enter >= exit {
                return Err(invalid(field, "enter threshold must be below exit threshold"));
            }
        }
        if !(m.critical_enter < m.high_enter && m.high_enter < m.medium_enter) {
            return Err(invalid(
                "monitor",
                "enter thresholds must decrease from medium to critical",
            ));
        }
        if m.sample_interval_ms == 0 {
            return Err(invalid("monitor.sample_interval_ms", "must be greater than zero"));
        }
        if m.latency_window == 0 {
            return Err(invalid("monitor.latency_window", "must be greater than zero"));
        }

        if self.strategy.small_image_bytes > self.strategy.large_image_bytes {
            return Err(invalid("strategy.small_image_bytes", "exceeds strategy.large_image_bytes"));
        }
        if self.strategy.fast_events_per_sec <= 0.0 {
            return Err(invalid("strategy.fast_events_per_sec", "must be positive"));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(invalid("scheduler.max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_concurrency, 4);
        assert_eq!(cfg.default_preload_depth, 5);
    }

    #[test]
    fn test_minimal_json_fills_sections() {
        let cfg = Config::from_json(
            r#"{"max_cache_bytes": 1048576, "max_concurrency": 2, "default_preload_depth": 3, "cache": {"min_budget_bytes": 1024}}"#,
        )
        .unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.max_concurrency, 2);
        assert_eq!(cfg.monitor.sample_interval_ms, 500);
        assert_eq!(cfg.cache.medium_fraction, 0.75);
    }

    #[test]
    fn test_legacy_field_is_rejected() {
        let err = Config::from_json(
            r#"{"max_cache_bytes": 1048576, "max_concurrency": 2, "default_preload_depth": 3, "max_items": 50}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let err = Config::from_json(
            r#"{"version": 2, "max_cache_bytes": 1048576, "max_concurrency": 2, "default_preload_depth": 3, "cache": {"min_budget_bytes": 1024}}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsupportedVersion { found: 2, expected: 1 }
        ));
    }

    #[test]
    fn test_invalid_concurrency() {
        let mut cfg = Config::default();
        cfg.max_concurrency = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "max_concurrency", .. })
        ));
        cfg.max_concurrency = MAX_WORKERS + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_inverted_hysteresis_band() {
        let mut cfg = Config::default();
        cfg.monitor.high_exit = 0.10;
        assert!(cfg.validate().is_err());
    }
}
