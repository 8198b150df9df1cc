//! Windowed motion aggregators.
//!
//! Each aggregator is updated once per sensor event of its type, not once per
//! publish tick. The publish loop reads whatever state they hold at the moment
//! it scores.

use crate::config::PipelineConfig;
use crate::core::buffer::SlidingBuffer;
use crate::core::scoring::{
    ACC_SHOCK_THRESHOLD, GRAVITY, GYRO_SHOCK_THRESHOLD, SHOCK_COUNT_TRIGGER,
};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::sync::Mutex;

/// Tracks sample-to-sample RMS jumps and remembers which ones were shocks.
#[derive(Debug, Clone)]
pub struct ShockDetector {
    threshold: f64,
    previous_rms: f64,
    last_delta: f64,
    shocks: SlidingBuffer<bool>,
}

impl ShockDetector {
    pub fn new(threshold: f64, initial_rms: f64, capacity: usize) -> Self {
        Self {
            threshold,
            previous_rms: initial_rms,
            last_delta: 0.0,
            shocks: SlidingBuffer::new(capacity),
        }
    }

    /// Accelerometer detector, starting from resting gravity.
    pub fn accelerometer(capacity: usize) -> Self {
        Self::new(ACC_SHOCK_THRESHOLD, GRAVITY, capacity)
    }

    /// Gyroscope detector, starting from rest.
    pub fn gyroscope(capacity: usize) -> Self {
        Self::new(GYRO_SHOCK_THRESHOLD, 0.0, capacity)
    }

    /// Feed a new RMS sample and return its delta from the previous one.
    pub fn push(&mut self, rms: f64) -> f64 {
        let delta = (rms - self.previous_rms).abs();
        self.previous_rms = rms;
        self.last_delta = if delta.is_finite() { delta } else { 0.0 };
        self.shocks.push(self.last_delta > self.threshold);
        self.last_delta
    }

    /// Delta produced by the most recent sample.
    pub fn last_delta(&self) -> f64 {
        self.last_delta
    }

    /// Number of shock flags in the current window.
    pub fn shock_count(&self) -> usize {
        self.shocks.count_where(|&shock| shock)
    }

    /// Whether enough of the window is shocks to count as a sustained jolt.
    pub fn is_sustained(&self) -> bool {
        self.shock_count() >= SHOCK_COUNT_TRIGGER
    }
}

/// Point-in-time view of the motion aggregators used for scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionSnapshot {
    pub delta_acc: f64,
    pub delta_gyro: f64,
    pub acc_shocks: usize,
    pub gyro_shocks: usize,
    pub shock_bonus: bool,
    /// Mean accelerometer RMS over the history window, if any samples exist
    pub avg_acc_rms: Option<f64>,
}

/// The three motion buffers, each behind its own lock.
#[derive(Debug)]
pub struct MotionAggregators {
    acc_shock: Mutex<ShockDetector>,
    gyro_shock: Mutex<ShockDetector>,
    acc_rms_history: Mutex<SlidingBuffer<f64>>,
}

impl MotionAggregators {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            acc_shock: Mutex::new(ShockDetector::accelerometer(config.shock_buffer_capacity)),
            gyro_shock: Mutex::new(ShockDetector::gyroscope(config.shock_buffer_capacity)),
            acc_rms_history: Mutex::new(SlidingBuffer::new(config.acc_rms_history_capacity)),
        }
    }

    /// Record an accelerometer RMS sample in both the shock window and the history.
    pub fn on_accelerometer(&self, rms: f64) {
        if let Ok(mut detector) = self.acc_shock.lock() {
            detector.push(rms);
        }
        if rms.is_finite() {
            if let Ok(mut history) = self.acc_rms_history.lock() {
                history.push(rms);
            }
        }
    }

    /// Record a gyroscope RMS sample in the gyroscope shock window.
    pub fn on_gyroscope(&self, rms: f64) {
        if let Ok(mut detector) = self.gyro_shock.lock() {
            detector.push(rms);
        }
    }

    /// Read the current aggregator state.
    ///
    /// Each buffer is read under its own lock, so the snapshot may mix
    /// slightly different moments across buffers.
    pub fn snapshot(&self) -> MotionSnapshot {
        let (delta_acc, acc_shocks, acc_sustained) = self
            .acc_shock
            .lock()
            .map(|d| (d.last_delta(), d.shock_count(), d.is_sustained()))
            .unwrap_or((0.0, 0, false));
        let (delta_gyro, gyro_shocks, gyro_sustained) = self
            .gyro_shock
            .lock()
            .map(|d| (d.last_delta(), d.shock_count(), d.is_sustained()))
            .unwrap_or((0.0, 0, false));
        let avg_acc_rms = self.acc_rms_history.lock().ok().and_then(|history| {
            if history.is_empty() {
                None
            } else {
                Some(history.iter().mean())
            }
        });

        MotionSnapshot {
            delta_acc,
            delta_gyro,
            acc_shocks,
            gyro_shocks,
            shock_bonus: acc_sustained || gyro_sustained,
            avg_acc_rms,
        }
    }

    /// Drop all accumulated motion history.
    pub fn reset(&self, config: &PipelineConfig) {
        if let Ok(mut detector) = self.acc_shock.lock() {
            *detector = ShockDetector::accelerometer(config.shock_buffer_capacity);
        }
        if let Ok(mut detector) = self.gyro_shock.lock() {
            *detector = ShockDetector::gyroscope(config.shock_buffer_capacity);
        }
        if let Ok(mut history) = self.acc_rms_history.lock() {
            *history = SlidingBuffer::new(config.acc_rms_history_capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerometer_starts_from_gravity() {
        let mut detector = ShockDetector::accelerometer(6);
        assert_eq!(detector.push(9.8), 0.0);
        assert!((detector.push(13.8) - 4.0).abs() < 1e-9);
        assert_eq!(detector.shock_count(), 1);
    }

    #[test]
    fn test_previous_rms_updates_unconditionally() {
        let mut detector = ShockDetector::gyroscope(6);
        detector.push(0.5);
        detector.push(0.6);
        assert!((detector.last_delta() - 0.1).abs() < 1e-9);
        assert_eq!(detector.shock_count(), 0);
    }

    #[test]
    fn test_sustained_shock_needs_five_of_six() {
        let mut detector = ShockDetector::gyroscope(6);
        // Alternate between rest and a hard twist: every sample is a shock.
        for i in 0..4 {
            detector.push(if i % 2 == 0 { 2.0 } else { 0.0 });
        }
        assert_eq!(detector.shock_count(), 4);
        assert!(!detector.is_sustained());

        detector.push(2.0);
        assert!(detector.is_sustained());

        // Calm samples push the shocks out of the window.
        for _ in 0..2 {
            detector.push(2.0);
        }
        assert_eq!(detector.shock_count(), 4);
        assert!(!detector.is_sustained());
    }

    #[test]
    fn test_snapshot_average_and_bonus() {
        let aggregators = MotionAggregators::new(&PipelineConfig::default());
        assert_eq!(aggregators.snapshot().avg_acc_rms, None);

        aggregators.on_accelerometer(10.0);
        aggregators.on_accelerometer(12.0);
        let snapshot = aggregators.snapshot();
        assert!((snapshot.avg_acc_rms.unwrap() - 11.0).abs() < 1e-9);
        assert!((snapshot.delta_acc - 2.0).abs() < 1e-9);
        assert!(!snapshot.shock_bonus);

        for i in 0..6 {
            aggregators.on_gyroscope(if i % 2 == 0 { 5.0 } else { 0.0 });
        }
        let snapshot = aggregators.snapshot();
        assert_eq!(snapshot.gyro_shocks, 6);
        assert!(snapshot.shock_bonus);
    }

    #[test]
    fn test_history_window_is_bounded() {
        let config = PipelineConfig::default();
        let aggregators = MotionAggregators::new(&config);
        for _ in 0..20 {
            aggregators.on_accelerometer(30.0);
        }
        for _ in 0..config.acc_rms_history_capacity {
            aggregators.on_accelerometer(9.8);
        }
        let avg = aggregators.snapshot().avg_acc_rms.unwrap();
        assert!((avg - 9.8).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let config = PipelineConfig::default();
        let aggregators = MotionAggregators::new(&config);
        aggregators.on_accelerometer(20.0);
        aggregators.reset(&config);
        assert_eq!(aggregators.snapshot(), MotionSnapshot::default());
    }
}
