//! Configuration for the motion sensor agent.

use crate::collector::AverageWeighting;
use crate::core::accumulator::{duration_ms, StorageConfig};
use crate::core::detector::ThresholdClassifier;
use crate::core::features::LabelingMode;
use crate::error::ConfigError;
use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "motion-sensor-agent";

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collector polling rate
    pub sample_rate_hz: f32,

    /// Averaging applied to every provisioned sensor
    pub averaging: AveragingConfig,

    /// Batch trigger and stop policy
    pub storage: StorageConfig,

    /// Wait between failed connect attempts
    #[serde(with = "duration_ms")]
    pub retry_interval: Duration,

    /// Liveness check period while collecting
    #[serde(with = "duration_ms")]
    pub connection_check_interval: Duration,

    /// Directory for the feature log and stats
    pub data_path: PathBuf,

    /// File name of the feature log inside `data_path`
    pub feature_log_name: String,

    pub labeling: LabelingMode,

    pub classifier: ThresholdClassifier,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            sample_rate_hz: 4.0,
            averaging: AveragingConfig::default(),
            storage: StorageConfig::default(),
            retry_interval: Duration::from_secs(1),
            connection_check_interval: Duration::from_secs(2),
            data_path: data_dir,
            feature_log_name: "default.csv".to_string(),
            labeling: LabelingMode::default(),
            classifier: ThresholdClassifier::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    pub fn feature_log_path(&self) -> PathBuf {
        self.data_path.join(&self.feature_log_name)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Session settings derived from this configuration, persisting to
    /// [`feature_log_path`](Self::feature_log_path).
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            sample_rate_hz: self.sample_rate_hz,
            storage: self.storage,
            retry_interval: self.retry_interval,
            connection_check_interval: self.connection_check_interval,
            feature_log: Some(self.feature_log_path()),
            labeling: self.labeling.clone(),
        }
    }
}

/// Sliding-window averaging of sensor readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AveragingConfig {
    pub window_size: usize,
    pub weighting: AverageWeighting,
}

impl Default for AveragingConfig {
    fn default() -> Self {
        Self {
            window_size: 3,
            weighting: AverageWeighting::Linear,
        }
    }
}
