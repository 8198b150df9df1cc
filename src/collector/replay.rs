//! Replays recorded sensor readings from a JSON Lines stream.
//!
//! Each line is one [`SensorReading`]. Lines are parsed on a background
//! thread and delivered over a bounded channel, so a slow consumer applies
//! back-pressure instead of growing memory.

use crate::collector::types::SensorReading;
use crate::config::SensorConfig;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest pause inserted between two readings in real-time replay.
const MAX_REPLAY_GAP: Duration = Duration::from_secs(5);

/// Where readings come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaySource {
    Stdin,
    File(PathBuf),
}

impl ReplaySource {
    /// `-` means standard input, anything else is a file path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            ReplaySource::Stdin
        } else {
            ReplaySource::File(PathBuf::from(arg))
        }
    }
}

/// Configuration for the replay collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub source: ReplaySource,
    /// Only readings from these sensors are forwarded
    pub sensors: SensorConfig,
    /// Sleep between readings according to their timestamps
    pub realtime: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            source: ReplaySource::Stdin,
            sensors: SensorConfig::default(),
            realtime: false,
        }
    }
}

/// Errors that can occur during collection.
#[derive(Debug)]
pub enum CollectorError {
    AlreadyRunning,
    NoSensorsEnabled,
    Io(String),
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::AlreadyRunning => write!(f, "Collector is already running"),
            CollectorError::NoSensorsEnabled => write!(f, "No sensors enabled"),
            CollectorError::Io(e) => write!(f, "Collector IO error: {e}"),
        }
    }
}

impl std::error::Error for CollectorError {}

/// Reads JSON Lines readings on a background thread.
pub struct ReplayCollector {
    config: CollectorConfig,
    sender: Sender<SensorReading>,
    receiver: Receiver<SensorReading>,
    running: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ReplayCollector {
    pub fn new(config: CollectorConfig) -> Self {
        let (sender, receiver) = bounded(10_000);

        Self {
            config,
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            skipped: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    /// Open the source and start reading in a background thread.
    ///
    /// Fails with `AlreadyRunning` until `stop` is called, even after the
    /// input is exhausted.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.thread_handle.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }
        if !self.config.sensors.any_enabled() {
            return Err(CollectorError::NoSensorsEnabled);
        }

        let input: Box<dyn Read + Send> = match &self.config.source {
            ReplaySource::Stdin => Box::new(std::io::stdin()),
            ReplaySource::File(path) => Box::new(
                std::fs::File::open(path)
                    .map_err(|e| CollectorError::Io(format!("{}: {e}", path.display())))?,
            ),
        };

        self.running.store(true, Ordering::SeqCst);

        let sender = self.sender.clone();
        let running = self.running.clone();
        let skipped = self.skipped.clone();
        let config = self.config.clone();

        let handle = thread::spawn(move || {
            read_lines(BufReader::new(input), &sender, &running, &skipped, &config);
            running.store(false, Ordering::SeqCst);
            tracing::info!("Replay input exhausted");
        });

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop reading. A thread blocked on standard input exits after its next line.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if self.config.source != ReplaySource::Stdin {
                let _ = handle.join();
            }
        }
    }

    /// False once stopped or once the input is exhausted.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Lines that could not be parsed.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn receiver(&self) -> &Receiver<SensorReading> {
        &self.receiver
    }
}

impl Drop for ReplayCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_lines(
    reader: impl BufRead,
    sender: &Sender<SensorReading>,
    running: &AtomicBool,
    skipped: &AtomicU64,
    config: &CollectorConfig,
) {
    let mut previous_at: Option<DateTime<Utc>> = None;

    for (index, line) in reader.lines().enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read input: {e}");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let reading = match parse_line(trimmed) {
            Ok(reading) => reading,
            Err(e) => {
                skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Skipping malformed line {}: {e}", index + 1);
                continue;
            }
        };

        if !config.sensors.is_enabled(reading.kind) {
            continue;
        }

        if config.realtime {
            if let Some(previous) = previous_at {
                let gap = (reading.timestamp - previous).to_std().unwrap_or_default();
                thread::sleep(gap.min(MAX_REPLAY_GAP));
            }
            previous_at = Some(reading.timestamp);
        }

        if sender.send(reading).is_err() {
            break;
        }
    }
}

/// Parse one input line into a reading.
pub fn parse_line(line: &str) -> Result<SensorReading, serde_json::Error> {
    serde_json::from_str(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::SensorKind;
    use std::io::Cursor;

    fn run(input: &str, sensors: SensorConfig) -> (Vec<SensorReading>, u64) {
        let (sender, receiver) = bounded(100);
        let running = AtomicBool::new(true);
        let skipped = AtomicU64::new(0);
        let config = CollectorConfig {
            sensors,
            ..CollectorConfig::default()
        };

        read_lines(Cursor::new(input), &sender, &running, &skipped, &config);
        drop(sender);
        (receiver.iter().collect(), skipped.load(Ordering::Relaxed))
    }

    #[test]
    fn test_reads_valid_lines_and_skips_bad_ones() {
        let input = r#"{"kind":"heart_rate","values":[72.0]}

# comment
not json
{"kind":"accelerometer","values":[0.1,9.7,0.3],"timestamp":"2024-03-01T00:00:00Z"}
{"kind":"thermometer","values":[36.6]}
"#;
        let (readings, skipped) = run(input, SensorConfig::default());

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].kind, SensorKind::HeartRate);
        assert_eq!(readings[1].values.len(), 3);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_filters_disabled_sensors() {
        let input = "{\"kind\":\"light\",\"values\":[10]}\n{\"kind\":\"pressure\",\"values\":[1013]}\n";
        let (readings, skipped) = run(input, SensorConfig::from_csv("pressure"));

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].kind, SensorKind::Pressure);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_realtime_replay_waits_between_readings() {
        let input = concat!(
            "{\"kind\":\"light\",\"values\":[1],\"timestamp\":\"2024-03-01T00:00:00.000Z\"}\n",
            "{\"kind\":\"light\",\"values\":[2],\"timestamp\":\"2024-03-01T00:00:00.020Z\"}\n",
        );
        let (sender, receiver) = bounded(10);
        let config = CollectorConfig {
            realtime: true,
            ..CollectorConfig::default()
        };

        let started = std::time::Instant::now();
        read_lines(
            Cursor::new(input),
            &sender,
            &AtomicBool::new(true),
            &AtomicU64::new(0),
            &config,
        );
        assert!(started.elapsed() >= Duration::from_millis(20));

        drop(sender);
        let values: Vec<f64> = receiver.iter().filter_map(|r| r.primary()).collect();
        assert_eq!(values, [1.0, 2.0]);
    }

    #[test]
    fn test_source_from_arg() {
        assert_eq!(ReplaySource::from_arg("-"), ReplaySource::Stdin);
        assert_eq!(
            ReplaySource::from_arg("data.jsonl"),
            ReplaySource::File(PathBuf::from("data.jsonl"))
        );
    }

    #[test]
    fn test_collector_reads_file() {
        let dir = std::env::temp_dir().join(format!("wear-replay-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("input.jsonl");
        std::fs::write(&path, "{\"kind\":\"step_counter\",\"values\":[120]}\n").unwrap();

        let mut collector = ReplayCollector::new(CollectorConfig {
            source: ReplaySource::File(path),
            ..CollectorConfig::default()
        });
        collector.start().unwrap();
        assert!(matches!(collector.start(), Err(CollectorError::AlreadyRunning)));

        let reading = collector
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(reading.primary(), Some(120.0));

        collector.stop();
        assert!(!collector.is_running());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_exhausted_collector_needs_stop_before_restart() {
        let dir = std::env::temp_dir().join(format!("wear-replay-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("input.jsonl");
        std::fs::write(&path, "{\"kind\":\"light\",\"values\":[40]}\n").unwrap();

        let mut collector = ReplayCollector::new(CollectorConfig {
            source: ReplaySource::File(path),
            ..CollectorConfig::default()
        });
        collector.start().unwrap();
        collector
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while collector.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!collector.is_running());

        // Exhausted but not stopped: the reader thread is still owned.
        assert!(matches!(collector.start(), Err(CollectorError::AlreadyRunning)));

        collector.stop();
        collector.start().unwrap();
        let again = collector
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(again.primary(), Some(40.0));

        collector.stop();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_fails_to_start() {
        let mut collector = ReplayCollector::new(CollectorConfig {
            source: ReplaySource::File(PathBuf::from("/nonexistent/readings.jsonl")),
            ..CollectorConfig::default()
        });
        assert!(matches!(collector.start(), Err(CollectorError::Io(_))));
        assert!(!collector.is_running());
    }
}
