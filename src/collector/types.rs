//! Sensor reading types for the wear sensor agent.
//!
//! A reading is one delivery from a sensor callback: which sensor fired, the
//! raw value vector it carried, and when it arrived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The sensors the pipeline knows how to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Heart rate in beats per minute
    HeartRate,
    /// Cumulative step count since device boot
    StepCounter,
    /// Fires `1.0` on each detected step
    StepDetector,
    /// 3-axis acceleration in m/s²
    Accelerometer,
    /// 3-axis angular velocity in rad/s
    Gyroscope,
    /// 3-axis magnetic field in µT
    MagneticField,
    /// Ambient pressure in hPa
    Pressure,
    /// Ambient light in lux
    Light,
}

impl SensorKind {
    /// Every sensor kind, in publish order.
    pub const ALL: [SensorKind; 8] = [
        SensorKind::HeartRate,
        SensorKind::StepCounter,
        SensorKind::StepDetector,
        SensorKind::Accelerometer,
        SensorKind::Gyroscope,
        SensorKind::MagneticField,
        SensorKind::Pressure,
        SensorKind::Light,
    ];

    /// Stable lower_snake_case key used in config files and published records.
    pub fn key(self) -> &'static str {
        match self {
            SensorKind::HeartRate => "heart_rate",
            SensorKind::StepCounter => "step_counter",
            SensorKind::StepDetector => "step_detector",
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Gyroscope => "gyroscope",
            SensorKind::MagneticField => "magnetic_field",
            SensorKind::Pressure => "pressure",
            SensorKind::Light => "light",
        }
    }

    /// Parse a sensor key as produced by [`SensorKind::key`].
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single sensor delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Which sensor produced the values
    pub kind: SensorKind,
    /// Raw values as delivered by the sensor
    pub values: Vec<f64>,
    /// When the reading arrived (defaults to now when omitted on the wire)
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    /// Create a reading stamped with the current time.
    pub fn new(kind: SensorKind, values: Vec<f64>) -> Self {
        Self {
            kind,
            values,
            timestamp: Utc::now(),
        }
    }

    /// Create a single-valued reading stamped with the current time.
    pub fn scalar(kind: SensorKind, value: f64) -> Self {
        Self::new(kind, vec![value])
    }

    /// The first component, which is the meaningful value for scalar sensors.
    pub fn primary(&self) -> Option<f64> {
        self.values.first().copied()
    }

    /// Root-mean-square magnitude across all components.
    pub fn rms(&self) -> f64 {
        crate::core::scoring::rms(&self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_key_roundtrip() {
        for kind in SensorKind::ALL {
            assert_eq!(SensorKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(SensorKind::from_key("thermometer"), None);
    }

    #[test]
    fn test_reading_primary() {
        let reading = SensorReading::new(SensorKind::Accelerometer, vec![1.0, 2.0, 3.0]);
        assert_eq!(reading.primary(), Some(1.0));

        let empty = SensorReading::new(SensorKind::Light, vec![]);
        assert_eq!(empty.primary(), None);
    }

    #[test]
    fn test_reading_wire_format() {
        let json = r#"{"kind":"heart_rate","values":[72.0]}"#;
        let reading: SensorReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.kind, SensorKind::HeartRate);
        assert_eq!(reading.primary(), Some(72.0));
    }
}
