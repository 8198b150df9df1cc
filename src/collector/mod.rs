//! Reading collection for the wear sensor agent.
//!
//! Sensor drivers live on the device; the agent consumes their deliveries as
//! [`SensorReading`] values. The replay collector feeds recorded or piped
//! readings into the pipeline.

pub mod replay;
pub mod types;

// Re-export commonly used types
pub use replay::{CollectorConfig, CollectorError, ReplayCollector, ReplaySource};
pub use types::{SensorKind, SensorReading};

/// The collector used by the agent binary.
pub type Collector = ReplayCollector;
