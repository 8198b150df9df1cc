//! Core functionality for the wear sensor agent.
//!
//! This module contains:
//! - The latest-value signal store with the latched step detector
//! - Sliding buffers and the motion aggregators built on them
//! - The pure scoring functions
//! - The published score record

pub mod aggregators;
pub mod buffer;
pub mod record;
pub mod scoring;
pub mod signals;

// Re-export commonly used types
pub use aggregators::{MotionAggregators, MotionSnapshot, ShockDetector};
pub use buffer::SlidingBuffer;
pub use record::ScoreRecord;
pub use scoring::{compute_scores, normalize_heart_rate, rms, ScoreInputs, Scores};
pub use signals::{SignalSample, SignalSnapshot, SignalStore, StepCounterState};
