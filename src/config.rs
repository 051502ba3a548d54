//! Runtime configuration
//!
//! Loads and saves the controller configuration as JSON. Every field has a
//! default so a partial file (or no file at all) yields a usable config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading/validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrameKeeperConfig {
    /// Frame rate the long-run average must converge to
    pub target_framerate: f64,

    /// Drift controller tuning
    pub drift: DriftConfig,

    /// Recording mediator tuning
    pub mediator: MediatorConfig,

    /// Pub/sub channel names
    pub channels: ChannelConfig,

    /// Store keys written or watched by the controllers
    pub keys: KeyConfig,

    /// Storage devices known to the recorder
    pub recognized_storage: Vec<String>,
}

impl Default for FrameKeeperConfig {
    fn default() -> Self {
        Self {
            target_framerate: 24.0,
            drift: DriftConfig::default(),
            mediator: MediatorConfig::default(),
            channels: ChannelConfig::default(),
            keys: KeyConfig::default(),
            recognized_storage: Vec::new(),
        }
    }
}

/// Drift controller parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriftConfig {
    /// Number of samples kept for the short-horizon average
    pub window_capacity: usize,

    /// Spacing between bound-search candidates
    pub step: f64,

    /// Half-width of the bound-search candidate range around the target
    pub margin: f64,

    /// Wait per bound-search candidate. Derived from the window size when unset.
    pub settle_secs: Option<f64>,

    /// Cumulative error magnitude that forces a flip
    pub error_threshold: f64,

    /// Sleep between flip-switching iterations
    pub monitoring_interval_secs: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_capacity: 100,
            step: 0.001,
            margin: 0.010,
            settle_secs: None,
            error_threshold: 0.001,
            monitoring_interval_secs: 0.1,
        }
    }
}

impl DriftConfig {
    /// Settle duration for one bound-search candidate.
    ///
    /// Without an explicit value this is the time needed to fill the window
    /// at the target rate plus one second of slack.
    pub fn settle_duration(&self, target_framerate: f64) -> Duration {
        let secs = self.settle_secs.unwrap_or_else(|| {
            if target_framerate > 0.0 {
                self.window_capacity as f64 / target_framerate + 1.0
            } else {
                1.0
            }
        });
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs_f64(self.monitoring_interval_secs.max(0.0))
    }
}

/// Recording mediator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediatorConfig {
    /// Grace period tolerated for a storage write pause
    pub stop_recording_timeout_secs: f64,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            stop_recording_timeout_secs: 2.0,
        }
    }
}

impl MediatorConfig {
    pub fn stop_recording_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stop_recording_timeout_secs.max(0.0))
    }
}

/// Pub/sub channel names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Channel carrying capture statistics (one message per frame)
    pub stats: String,

    /// Channel notified with the key name after every parameter write
    pub controls: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            stats: "cp_stats".to_string(),
            controls: "cp_controls".to_string(),
        }
    }
}

/// Store keys
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyConfig {
    /// Commanded frame rate
    pub fps: String,

    /// Frame rate reported by the capture pipeline
    pub fps_actual: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            fps: "fps".to_string(),
            fps_actual: "fps_actual".to_string(),
        }
    }
}

impl FrameKeeperConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: FrameKeeperConfig = serde_json::from_str(&contents)?;
        config.validate()?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject values the control loops cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_framerate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "targetFramerate must be positive, got {}",
                self.target_framerate
            )));
        }
        if !(self.drift.step > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "drift.step must be positive, got {}",
                self.drift.step
            )));
        }
        if !(self.drift.margin >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "drift.margin must not be negative, got {}",
                self.drift.margin
            )));
        }
        if self.drift.window_capacity == 0 {
            return Err(ConfigError::Invalid(
                "drift.windowCapacity must be at least 1".to_string(),
            ));
        }
        if !(self.drift.monitoring_interval_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "drift.monitoringIntervalSecs must be positive, got {}",
                self.drift.monitoring_interval_secs
            )));
        }
        if let Some(settle) = self.drift.settle_secs {
            if !(settle >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "drift.settleSecs must not be negative, got {}",
                    settle
                )));
            }
        }
        if !(self.mediator.stop_recording_timeout_secs >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "mediator.stopRecordingTimeoutSecs must not be negative, got {}",
                self.mediator.stop_recording_timeout_secs
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct StorageSettings {
    #[serde(default)]
    recognized_ssds: Vec<String>,
}

/// Read the recognised storage list from a settings file.
///
/// Failures are logged and yield an empty list.
pub fn load_recognized_storage(path: &Path) -> Vec<String> {
    let parsed = std::fs::read_to_string(path)
        .map_err(ConfigError::from)
        .and_then(|contents| {
            serde_json::from_str::<StorageSettings>(&contents).map_err(ConfigError::from)
        });

    match parsed {
        Ok(settings) => settings.recognized_ssds,
        Err(e) => {
            tracing::error!("Failed to load storage settings from {:?}: {}", path, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FrameKeeperConfig::default();
        assert_eq!(config.target_framerate, 24.0);
        assert_eq!(config.drift.window_capacity, 100);
        assert_eq!(config.drift.step, 0.001);
        assert_eq!(config.drift.margin, 0.010);
        assert_eq!(config.drift.error_threshold, 0.001);
        assert_eq!(config.drift.monitoring_interval(), Duration::from_millis(100));
        assert_eq!(config.mediator.stop_recording_timeout(), Duration::from_secs(2));
        assert_eq!(config.channels.stats, "cp_stats");
        assert_eq!(config.channels.controls, "cp_controls");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settle_duration_derived_from_window() {
        let drift = DriftConfig::default();
        // 100 samples at 25 fps = 4 s, plus 1 s slack
        assert_eq!(drift.settle_duration(25.0), Duration::from_secs(5));

        let explicit = DriftConfig {
            settle_secs: Some(2.5),
            ..DriftConfig::default()
        };
        assert_eq!(explicit.settle_duration(25.0), Duration::from_millis(2500));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framekeeper.json");
        std::fs::write(
            &path,
            r#"{ "targetFramerate": 25.0, "drift": { "errorThreshold": 0.01 } }"#,
        )
        .unwrap();

        let config = FrameKeeperConfig::load(&path).unwrap();
        assert_eq!(config.target_framerate, 25.0);
        assert_eq!(config.drift.error_threshold, 0.01);
        assert_eq!(config.drift.step, 0.001);
        assert_eq!(config.keys.fps, "fps");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("framekeeper.json");

        let mut config = FrameKeeperConfig::default();
        config.target_framerate = 30.0;
        config.recognized_storage = vec!["Samsung T7".to_string()];
        config.save(&path).unwrap();

        let loaded = FrameKeeperConfig::load(&path).unwrap();
        assert_eq!(loaded.target_framerate, 30.0);
        assert_eq!(loaded.recognized_storage, vec!["Samsung T7".to_string()]);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FrameKeeperConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.target_framerate, 24.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FrameKeeperConfig::default();
        config.target_framerate = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = FrameKeeperConfig::default();
        config.drift.step = -0.001;
        assert!(config.validate().is_err());

        let mut config = FrameKeeperConfig::default();
        config.drift.monitoring_interval_secs = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = FrameKeeperConfig::default();
        config.drift.window_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recognized_storage_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssd.json");
        std::fs::write(&path, r#"{ "recognized_ssds": ["RPi-SSD", "T7"] }"#).unwrap();
        assert_eq!(load_recognized_storage(&path), vec!["RPi-SSD", "T7"]);

        std::fs::write(&path, "not json").unwrap();
        assert!(load_recognized_storage(&path).is_empty());

        assert!(load_recognized_storage(&dir.path().join("missing.json")).is_empty());
    }
}
