//! Configuration management for wardrive.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Application directory name under the platform config directory.
const APP_DIR_NAME: &str = "wardrive";

/// Default rule file name.
const RULES_FILE_NAME: &str = "filter_rules.conf";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `WARDRIVE_`, `__` between levels)
/// 2. TOML config file at `~/.config/wardrive/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File and directory locations.
    pub paths: PathsConfig,
    /// WiGLE export configuration.
    pub export: ExportSettings,
    /// Post-capture sanitization configuration.
    pub sanitize: SanitizeSettings,
    /// Watch loop configuration.
    pub watch: WatchSettings,
}

/// File and directory locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the exclusion rule file.
    /// Defaults to `~/.config/wardrive/filter_rules.conf`
    pub rules_file: Option<PathBuf>,
    /// Capture tool config files that carry capture-time block directives.
    pub kismet_configs: Vec<PathBuf>,
    /// Directory the capture tool writes its logs into.
    /// Defaults to `~/kismet/logs`
    pub logs_dir: Option<PathBuf>,
    /// Directory that receives pre-mutation backups.
    /// Defaults to `~/kismet/backups`
    pub backup_dir: Option<PathBuf>,
}

/// WiGLE export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Keep one observation per device per second.
    pub rate_limit: bool,
    /// `model=` field of the first header line.
    pub model: String,
    /// `release=` field of the first header line.
    pub release: String,
    /// `device=` field of the first header line.
    pub device: String,
    /// `brand=` field of the first header line.
    pub brand: String,
}

/// Post-capture sanitization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeSettings {
    /// Files modified more recently than this many seconds are skipped.
    pub in_use_secs: u64,
}

/// How the watch loop discovers files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Re-scan the directory on a fixed interval.
    #[default]
    Poll,
    /// Subscribe to filesystem change events.
    Notify,
}

/// Watch loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Discovery mechanism.
    pub mode: WatchMode,
    /// Seconds between polling passes.
    pub interval_secs: u64,
    /// Seconds to wait after a change event before a file is considered.
    pub settle_secs: u64,
    /// Create a backup before each mutating pass.
    pub backup: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            rules_file: None, // Resolved at runtime
            kismet_configs: vec![
                PathBuf::from("/etc/kismet/kismet_site.conf"),
                PathBuf::from("/etc/kismet/kismet_wardrive.conf"),
            ],
            logs_dir: None,
            backup_dir: None,
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            rate_limit: true,
            model: "RaspberryPi".to_string(),
            release: "bookworm".to_string(),
            device: "wardrive".to_string(),
            brand: "wardrive".to_string(),
        }
    }
}

impl Default for SanitizeSettings {
    fn default() -> Self {
        Self { in_use_secs: 30 }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            mode: WatchMode::Poll,
            interval_secs: 60,
            settle_secs: 2,
            backup: true,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("WARDRIVE_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE_NAME)
    }

    fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR_NAME)
    }

    fn kismet_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kismet")
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.watch.interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "watch.interval_secs must be greater than 0".to_string(),
            });
        }

        if let Some(dir) = &self.paths.backup_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::ConfigValidation {
                    message: "paths.backup_dir must not be empty".to_string(),
                });
            }
        }

        for (field, value) in [
            ("model", &self.export.model),
            ("release", &self.export.release),
            ("device", &self.export.device),
            ("brand", &self.export.brand),
        ] {
            if value.contains(',') || value.contains('\n') {
                return Err(Error::ConfigValidation {
                    message: format!("export.{field} must not contain commas or newlines"),
                });
            }
        }

        Ok(())
    }

    /// Get the rule file path, resolving defaults if not set.
    #[must_use]
    pub fn rules_file(&self) -> PathBuf {
        self.paths
            .rules_file
            .clone()
            .unwrap_or_else(|| Self::config_dir().join(RULES_FILE_NAME))
    }

    /// Get the capture log directory, resolving defaults if not set.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.paths
            .logs_dir
            .clone()
            .unwrap_or_else(|| Self::kismet_dir().join("logs"))
    }

    /// Get the backup directory, resolving defaults if not set.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.paths
            .backup_dir
            .clone()
            .unwrap_or_else(|| Self::kismet_dir().join("backups"))
    }

    /// Get the in-use threshold as a Duration.
    #[must_use]
    pub fn in_use_threshold(&self) -> Duration {
        Duration::from_secs(self.sanitize.in_use_secs)
    }

    /// Get the polling interval as a Duration.
    #[must_use]
    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch.interval_secs)
    }

    /// Get the change-event settle delay as a Duration.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.watch.settle_secs)
    }
}
