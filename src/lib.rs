//! Wear Sensor Agent - background scoring for wearable motion and biometric signals.
//!
//! This library turns asynchronously arriving sensor readings into four
//! bounded wellness scores (stress, tension, activity and total), published
//! once per tick with externally supplied bias terms.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Wear Sensor Agent                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐                            │
//! │  │  Collector  │──▶│   Signals   │──┐                         │
//! │  │  (readings) │   │ (latest, ▲) │  │   ┌─────────────┐       │
//! │  └─────────────┘   └─────────────┘  ├──▶│   Scoring   │       │
//! │         │          ┌─────────────┐  │   └─────────────┘       │
//! │         └─────────▶│ Aggregators │──┘          │              │
//! │                    │ (shock/RMS) │             ▼              │
//! │  ┌─────────────┐   └─────────────┘      ┌─────────────┐       │
//! │  │    Bias     │───── per tick ────────▶│    Sink     │       │
//! │  │   Fetcher   │                        │  (detached) │       │
//! │  └─────────────┘                        └─────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wear_sensor_agent::{Pipeline, SensorKind, SensorReading};
//! use wear_sensor_agent::sink::MemorySink;
//!
//! # async fn demo() {
//! let sink = MemorySink::new();
//! let pipeline = Pipeline::builder()
//!     .sink(Arc::new(sink.clone()))
//!     .build(tokio::runtime::Handle::current());
//!
//! pipeline.handle_reading(&SensorReading::scalar(SensorKind::HeartRate, 72.0));
//! pipeline.start();
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod bias;
pub mod collector;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod remote;
pub mod sink;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use bias::{BiasError, BiasFetcher, BiasKeys, BiasSource, BiasTerms};
pub use collector::{Collector, CollectorConfig, CollectorError, SensorKind, SensorReading};
pub use config::{Config, PipelineConfig, SensorConfig};
pub use core::{compute_scores, ScoreRecord, Scores, SlidingBuffer};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use sink::{LifecycleEvent, ScoreSink, SinkError};
pub use stats::{Counter, PipelineStats, SharedStats, StatsSnapshot};

#[cfg(feature = "remote")]
pub use remote::RemoteClient;
pub use remote::{RemoteConfig, RemoteError};

/// A boxed future, used by the object-safe source and sink traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
