//! Configuration for the wear sensor agent.

use crate::bias::BiasKeys;
use crate::collector::types::SensorKind;
use crate::remote::RemoteConfig;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Publish cadence.
pub const TICK_INTERVAL_MS: u64 = 1000;

/// How long a step detection keeps the step-detected flag raised.
pub const STEP_DETECTED_HOLD_MS: u64 = 1000;

/// Slots in each of the accelerometer and gyroscope shock windows.
pub const SHOCK_BUFFER_CAPACITY: usize = 6;

/// Samples kept in the accelerometer RMS history.
pub const ACC_RMS_HISTORY_CAPACITY: usize = 10;

/// Main configuration for the sensor agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Timing and window sizes for the scoring pipeline
    pub pipeline: PipelineConfig,

    /// Which sensors to accept readings from
    pub sensors: SensorConfig,

    /// Key names of the four bias terms
    pub bias_keys: BiasKeys,

    /// Remote real-time store, if publishing remotely
    #[serde(default)]
    pub remote: Option<RemoteConfig>,

    /// IANA timezone used for the local time in published records
    pub timezone: String,

    /// Path for exported score records
    pub export_path: PathBuf,

    /// Path for storing state and stats
    pub data_path: PathBuf,

    /// Whether publishing is currently stopped
    pub paused: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wear-sensor-agent");

        Self {
            pipeline: PipelineConfig::default(),
            sensors: SensorConfig::default(),
            bias_keys: BiasKeys::default(),
            remote: None,
            timezone: "UTC".to_string(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            paused: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wear-sensor-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Sensors to accept: the `--sensors` list when given, else the configured set.
    pub fn sensors_for(&self, flag: Option<&str>) -> SensorConfig {
        flag.map(SensorConfig::from_csv)
            .unwrap_or_else(|| self.sensors.clone())
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }
}

/// Timing and window sizes for the scoring pipeline.
///
/// The defaults are the production policy; tests shrink them to run with
/// compressed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Interval between publish ticks, never zero
    #[serde(
        serialize_with = "duration_millis::serialize",
        deserialize_with = "duration_millis::deserialize_nonzero"
    )]
    pub tick_interval: Duration,

    /// How long a step detection stays visible
    #[serde(with = "duration_millis")]
    pub step_detected_hold: Duration,

    /// Capacity of each shock window
    pub shock_buffer_capacity: usize,

    /// Capacity of the accelerometer RMS history
    pub acc_rms_history_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            step_detected_hold: Duration::from_millis(STEP_DETECTED_HOLD_MS),
            shock_buffer_capacity: SHOCK_BUFFER_CAPACITY,
            acc_rms_history_capacity: ACC_RMS_HISTORY_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Override the tick interval. A zero interval is raised to one millisecond.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }
}

/// Configuration for which sensors to accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub enabled: Vec<SensorKind>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            enabled: SensorKind::ALL.to_vec(),
        }
    }
}

impl SensorConfig {
    /// Parse sensor configuration from a comma-separated string of sensor keys.
    ///
    /// `all` enables every sensor; unknown names are ignored.
    pub fn from_csv(s: &str) -> Self {
        let names: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();

        if names.iter().any(|name| name == "all") {
            return Self::default();
        }

        let enabled = SensorKind::ALL
            .into_iter()
            .filter(|kind| names.iter().any(|name| name == kind.key()))
            .collect();
        Self { enabled }
    }

    pub fn is_enabled(&self, kind: SensorKind) -> bool {
        self.enabled.contains(&kind)
    }

    /// Check if at least one sensor is enabled.
    pub fn any_enabled(&self) -> bool {
        !self.enabled.is_empty()
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidTimezone(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidTimezone(tz) => write!(f, "Unknown timezone: {tz}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    /// Like `deserialize`, but a zero value reads as one millisecond.
    pub fn deserialize_nonzero<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_config_parsing() {
        let config = SensorConfig::from_csv("heart_rate, Light");
        assert!(config.is_enabled(SensorKind::HeartRate));
        assert!(config.is_enabled(SensorKind::Light));
        assert!(!config.is_enabled(SensorKind::Gyroscope));

        let config = SensorConfig::from_csv("all");
        assert_eq!(config.enabled.len(), SensorKind::ALL.len());

        let config = SensorConfig::from_csv("barometer");
        assert!(!config.any_enabled());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.tick_interval, Duration::from_secs(1));
        assert_eq!(config.pipeline.step_detected_hold, Duration::from_secs(1));
        assert_eq!(config.pipeline.shock_buffer_capacity, 6);
        assert_eq!(config.pipeline.acc_rms_history_capacity, 10);
        assert!(config.remote.is_none());
        assert!(!config.paused);
        assert_eq!(config.tz().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_pipeline_config_json() {
        let config = PipelineConfig::default().with_tick_interval(Duration::from_millis(250));
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["tick_interval"], 250);

        let parsed: PipelineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);

        let zero = PipelineConfig::default().with_tick_interval(Duration::ZERO);
        assert_eq!(zero.tick_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_zero_tick_interval_from_file_is_raised() {
        let parsed: PipelineConfig = serde_json::from_value(serde_json::json!({
            "tick_interval": 0,
            "step_detected_hold": 0,
            "shock_buffer_capacity": 6,
            "acc_rms_history_capacity": 10
        }))
        .unwrap();
        assert_eq!(parsed.tick_interval, Duration::from_millis(1));
        assert_eq!(parsed.step_detected_hold, Duration::ZERO);
    }

    #[test]
    fn test_sensors_flag_overrides_configured_set() {
        let config = Config {
            sensors: SensorConfig::from_csv("heart_rate"),
            ..Config::default()
        };

        let configured = config.sensors_for(None);
        assert_eq!(configured.enabled, vec![SensorKind::HeartRate]);

        let flagged = config.sensors_for(Some("light,pressure"));
        assert!(flagged.is_enabled(SensorKind::Light));
        assert!(!flagged.is_enabled(SensorKind::HeartRate));
    }

    #[test]
    fn test_invalid_timezone() {
        let config = Config {
            timezone: "Mars/Olympus".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.tz(), Err(ConfigError::InvalidTimezone(_))));
    }
}
