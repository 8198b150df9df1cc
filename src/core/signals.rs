//! Latest-value store for every monitored signal.
//!
//! Sensor callbacks overwrite one signal at a time; the publish loop reads
//! them all once per tick. Each signal has its own lock, so updates to
//! different signals never contend.

use crate::collector::types::{SensorKind, SensorReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Placeholder published for a signal that never reported.
pub const ABSENT_SIGNAL: &str = "-";

/// The last value received for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    pub kind: SensorKind,
    /// Full value vector as delivered
    pub values: Vec<f64>,
    /// First component, the scalar most formulas use
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl SignalSample {
    pub fn from_reading(reading: &SensorReading) -> Self {
        Self {
            kind: reading.kind,
            values: reading.values.clone(),
            value: reading.primary().unwrap_or(0.0),
            timestamp: reading.timestamp,
        }
    }

    /// Values rendered with two decimals, comma separated.
    pub fn display(&self) -> String {
        self.values
            .iter()
            .map(|v| format!("{v:.2}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Previous and latest cumulative step counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepCounterState {
    pub previous: f64,
    pub latest: f64,
}

impl StepCounterState {
    /// Shift the latest count into `previous` and record a new one.
    pub fn record(&mut self, count: f64) {
        if !count.is_finite() {
            return;
        }
        self.previous = self.latest;
        self.latest = count;
    }

    /// Steps since the previous reading, never negative.
    pub fn delta(&self) -> u64 {
        let delta = (self.latest - self.previous).trunc();
        if delta > 0.0 {
            delta as u64
        } else {
            0
        }
    }
}

/// A boolean flag that clears itself a fixed time after being set.
///
/// Setting the flag again replaces the pending clear rather than stacking a
/// second one.
#[derive(Debug)]
pub struct Latch {
    flag: Arc<AtomicBool>,
    hold: Duration,
    runtime: Handle,
    timer: Arc<Mutex<TimerSlot>>,
}

#[derive(Debug, Default)]
struct TimerSlot {
    /// Bumped on every set and clear; a timer only fires if it still matches.
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }
}

impl Latch {
    pub fn new(hold: Duration, runtime: Handle) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            hold,
            runtime,
            timer: Arc::new(Mutex::new(TimerSlot::default())),
        }
    }

    /// Set the flag and (re)schedule its clear.
    pub fn set(&self) {
        let Ok(mut timer) = self.timer.lock() else {
            return;
        };
        timer.cancel();
        self.flag.store(true, Ordering::SeqCst);

        let generation = timer.generation;
        let flag = self.flag.clone();
        let slot = self.timer.clone();
        let hold = self.hold;
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(hold).await;
            if let Ok(mut slot) = slot.lock() {
                if slot.generation == generation {
                    flag.store(false, Ordering::SeqCst);
                    slot.pending = None;
                }
            }
        });
        timer.pending = Some(handle);
    }

    /// Clear the flag immediately and cancel any pending clear.
    pub fn clear(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            timer.cancel();
            self.flag.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Point-in-time copy of every signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub samples: BTreeMap<SensorKind, SignalSample>,
    pub step_detected: bool,
    pub step_counter: StepCounterState,
}

impl SignalSnapshot {
    /// Primary value of a signal, or 0 when it never reported.
    pub fn value(&self, kind: SensorKind) -> f64 {
        self.samples.get(&kind).map(|s| s.value).unwrap_or(0.0)
    }

    pub fn get(&self, kind: SensorKind) -> Option<&SignalSample> {
        self.samples.get(&kind)
    }

    /// Render every signal for publishing, `"-"` for the ones never seen.
    ///
    /// The heart rate is shown with the heart-rate bias already applied.
    pub fn display_map(&self, heart_bias: i32) -> BTreeMap<String, String> {
        SensorKind::ALL
            .into_iter()
            .map(|kind| {
                let rendered = match (kind, self.samples.get(&kind)) {
                    (SensorKind::HeartRate, Some(sample)) => {
                        format!("{:.2}", sample.value + f64::from(heart_bias))
                    }
                    (SensorKind::StepDetector, None) => "0".to_string(),
                    (_, Some(sample)) => sample.display(),
                    (_, None) => ABSENT_SIGNAL.to_string(),
                };
                (kind.key().to_string(), rendered)
            })
            .collect()
    }
}

/// Thread-safe last-write-wins store, one lock per signal.
#[derive(Debug)]
pub struct SignalStore {
    signals: HashMap<SensorKind, RwLock<Option<SignalSample>>>,
    latches: HashMap<SensorKind, Latch>,
    step_counter: Mutex<StepCounterState>,
}

impl SignalStore {
    /// Create an empty store. Step-detector flags clear `step_hold` after being
    /// set, using timers spawned on `runtime`.
    pub fn new(step_hold: Duration, runtime: Handle) -> Self {
        let signals = SensorKind::ALL
            .into_iter()
            .map(|kind| (kind, RwLock::new(None)))
            .collect();
        let mut latches = HashMap::new();
        latches.insert(SensorKind::StepDetector, Latch::new(step_hold, runtime));

        Self {
            signals,
            latches,
            step_counter: Mutex::new(StepCounterState::default()),
        }
    }

    /// Store a reading, replacing whatever was there.
    pub fn set_signal(&self, reading: &SensorReading) {
        let sample = SignalSample::from_reading(reading);

        match reading.kind {
            SensorKind::StepCounter => {
                if let Ok(mut counter) = self.step_counter.lock() {
                    counter.record(sample.value);
                }
            }
            SensorKind::StepDetector => {
                if let Some(latch) = self.latches.get(&SensorKind::StepDetector) {
                    if sample.value == 1.0 {
                        latch.set();
                    } else {
                        latch.clear();
                    }
                }
            }
            _ => {}
        }

        if let Some(slot) = self.signals.get(&reading.kind) {
            if let Ok(mut slot) = slot.write() {
                *slot = Some(sample);
            }
        }
    }

    pub fn get(&self, kind: SensorKind) -> Option<SignalSample> {
        self.signals
            .get(&kind)
            .and_then(|slot| slot.read().ok())
            .and_then(|slot| slot.clone())
    }

    /// Whether a step was detected within the hold window.
    pub fn step_detected(&self) -> bool {
        self.latches
            .get(&SensorKind::StepDetector)
            .map(Latch::is_set)
            .unwrap_or(false)
    }

    pub fn step_counter(&self) -> StepCounterState {
        self.step_counter
            .lock()
            .map(|counter| *counter)
            .unwrap_or_default()
    }

    /// Read every signal. Signals are read one lock at a time, so the snapshot
    /// may mix slightly different moments across signals.
    pub fn snapshot(&self) -> SignalSnapshot {
        let samples = SensorKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|sample| (kind, sample)))
            .collect();

        SignalSnapshot {
            samples,
            step_detected: self.step_detected(),
            step_counter: self.step_counter(),
        }
    }

    /// Forget every stored value and cancel pending timers.
    pub fn reset(&self) {
        for slot in self.signals.values() {
            if let Ok(mut slot) = slot.write() {
                *slot = None;
            }
        }
        for latch in self.latches.values() {
            latch.clear();
        }
        if let Ok(mut counter) = self.step_counter.lock() {
            *counter = StepCounterState::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_millis(1000);

    #[test]
    fn test_step_delta_never_negative() {
        let mut counter = StepCounterState::default();
        counter.record(100.0);
        counter.record(105.0);
        assert_eq!(counter.delta(), 5);

        // Counter reset on reboot
        counter.record(3.0);
        assert_eq!(counter.delta(), 0);

        counter.record(f64::NAN);
        assert_eq!(counter.latest, 3.0);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = SignalStore::new(HOLD, Handle::current());
        store.set_signal(&SensorReading::scalar(SensorKind::HeartRate, 70.0));
        store.set_signal(&SensorReading::scalar(SensorKind::HeartRate, 95.0));
        assert_eq!(store.get(SensorKind::HeartRate).unwrap().value, 95.0);
        assert!(store.get(SensorKind::Light).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_display_map() {
        let store = SignalStore::new(HOLD, Handle::current());
        store.set_signal(&SensorReading::scalar(SensorKind::HeartRate, 70.0));
        store.set_signal(&SensorReading::new(
            SensorKind::Accelerometer,
            vec![0.1, 9.75, 0.333],
        ));

        let map = store.snapshot().display_map(5);
        assert_eq!(map["heart_rate"], "75.00");
        assert_eq!(map["accelerometer"], "0.10, 9.75, 0.33");
        assert_eq!(map["light"], ABSENT_SIGNAL);
        assert_eq!(map["step_detector"], "0");
        assert_eq!(map.len(), SensorKind::ALL.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_flag_clears_after_hold() {
        let store = SignalStore::new(HOLD, Handle::current());
        store.set_signal(&SensorReading::scalar(SensorKind::StepDetector, 1.0));
        assert!(store.step_detected());

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(store.step_detected());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!store.step_detected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_detection_replaces_pending_clear() {
        let store = SignalStore::new(HOLD, Handle::current());
        store.set_signal(&SensorReading::scalar(SensorKind::StepDetector, 1.0));
        tokio::time::sleep(Duration::from_millis(600)).await;

        store.set_signal(&SensorReading::scalar(SensorKind::StepDetector, 1.0));
        // The first timer would have fired here.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.step_detected());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!store.step_detected());
    }

    #[tokio::test]
    async fn test_non_detection_clears_immediately() {
        let store = SignalStore::new(HOLD, Handle::current());
        store.set_signal(&SensorReading::scalar(SensorKind::StepDetector, 1.0));
        store.set_signal(&SensorReading::scalar(SensorKind::StepDetector, 0.0));
        assert!(!store.step_detected());
    }

    #[tokio::test]
    async fn test_reset() {
        let store = SignalStore::new(HOLD, Handle::current());
        store.set_signal(&SensorReading::scalar(SensorKind::StepCounter, 10.0));
        store.set_signal(&SensorReading::scalar(SensorKind::StepCounter, 12.0));
        store.set_signal(&SensorReading::scalar(SensorKind::StepDetector, 1.0));
        store.reset();

        let snapshot = store.snapshot();
        assert!(snapshot.samples.is_empty());
        assert!(!snapshot.step_detected);
        assert_eq!(snapshot.step_counter.delta(), 0);
    }
}
