//! Configuration management for fleetpulse.
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
use crate::store::DEFAULT_MAX_HISTORY;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "fleetpulse";

/// Default snapshot database file name.
const SNAPSHOT_FILE_NAME: &str = "snapshots.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FLEETPULSE_`)
/// 2. TOML config file at `~/.config/fleetpulse/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Backend data-service configuration.
    pub backend: BackendConfig,
    /// Tracking and alerting configuration.
    pub tracking: TrackingConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the snapshot database file.
    /// Defaults to `~/.local/share/fleetpulse/snapshots.db`
    pub snapshot_path: Option<PathBuf>,
}

/// Backend data-service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend data service.
    pub base_url: String,
    /// Bearer token for backend requests.
    pub api_token: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Tracking and alerting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Maximum history entries retained per vehicle.
    pub max_history_per_vehicle: usize,
    /// Maintenance scan cadence in seconds.
    pub maintenance_interval_secs: u64,
    /// Safety scan cadence in seconds.
    pub safety_interval_secs: u64,
    /// Suppression window for identical repeated alerts in seconds.
    /// Set to 0 to re-emit on every scan tick.
    pub dedupe_window_secs: u64,
    /// Interval for re-seeding locations from the backend in seconds.
    /// Set to 0 to seed only once at startup.
    pub reseed_interval_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_token: None,
            request_timeout_secs: 10,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_history_per_vehicle: DEFAULT_MAX_HISTORY,
            maintenance_interval_secs: 60,
            safety_interval_secs: 30,
            dedupe_window_secs: 0, // Re-emit while the condition holds
            reseed_interval_secs: 0,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `FLEETPULSE_`)
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
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("FLEETPULSE_").split("_"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.is_empty() {
            return Err(Error::ConfigValidation {
                message: "backend.base_url must not be empty".to_string(),
            });
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "backend.request_timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.tracking.max_history_per_vehicle == 0 {
            return Err(Error::ConfigValidation {
                message: "tracking.max_history_per_vehicle must be greater than 0".to_string(),
            });
        }

        if self.tracking.maintenance_interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "tracking.maintenance_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.tracking.safety_interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "tracking.safety_interval_secs must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the snapshot database path, resolving defaults if not set.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.storage
            .snapshot_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(SNAPSHOT_FILE_NAME))
    }

    /// Get the backend request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    /// Get the maintenance scan cadence as a Duration.
    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.tracking.maintenance_interval_secs)
    }

    /// Get the safety scan cadence as a Duration.
    #[must_use]
    pub fn safety_interval(&self) -> Duration {
        Duration::from_secs(self.tracking.safety_interval_secs)
    }

    /// Get the alert dedupe window, `None` when disabled.
    #[must_use]
    pub fn dedupe_window(&self) -> Option<Duration> {
        if self.tracking.dedupe_window_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.tracking.dedupe_window_secs))
        }
    }

    /// Get the backend reseed interval, `None` when seeding only at startup.
    #[must_use]
    pub fn reseed_interval(&self) -> Option<Duration> {
        if self.tracking.reseed_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.tracking.reseed_interval_secs))
        }
    }
}
