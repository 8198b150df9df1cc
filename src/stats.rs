//! Pipeline activity counters.
//!
//! Totals carry over between runs: they are saved as the JSON form of a
//! [`StatsSnapshot`] and restored when the next process starts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Something the pipeline counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Reading,
    Tick,
    Published,
    PublishFailure,
    BiasFallback,
    Start,
}

impl Counter {
    pub const ALL: [Counter; 6] = [
        Counter::Reading,
        Counter::Tick,
        Counter::Published,
        Counter::PublishFailure,
        Counter::BiasFallback,
        Counter::Start,
    ];

    fn label(self) -> &'static str {
        match self {
            Counter::Reading => "Sensor readings received",
            Counter::Tick => "Publish ticks",
            Counter::Published => "Records published",
            Counter::PublishFailure => "Publish failures",
            Counter::BiasFallback => "Zero-bias fallbacks",
            Counter::Start => "Pipeline starts",
        }
    }
}

/// Counters shared by the pipeline, the server and the CLI.
#[derive(Debug)]
pub struct PipelineStats {
    counts: [AtomicU64; Counter::ALL.len()],
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            counts: Default::default(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Counters that continue from the totals saved at `path`, and save back there.
    pub fn persistent(path: PathBuf) -> Self {
        let stats = Self {
            persist_path: Some(path),
            ..Self::new()
        };
        if let Some(path) = &stats.persist_path {
            match read_snapshot(path) {
                Ok(Some(saved)) => stats.restore(&saved),
                Ok(None) => {}
                Err(e) => tracing::warn!("Could not load previous stats: {e}"),
            }
        }
        stats
    }

    pub fn record(&self, counter: Counter) {
        self.counts[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter as usize].load(Ordering::Relaxed)
    }

    fn restore(&self, saved: &StatsSnapshot) {
        for (counter, value) in saved.counters() {
            self.counts[counter as usize].store(value, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            readings_received: self.get(Counter::Reading),
            ticks: self.get(Counter::Tick),
            records_published: self.get(Counter::Published),
            publish_failures: self.get(Counter::PublishFailure),
            bias_fallbacks: self.get(Counter::BiasFallback),
            starts: self.get(Counter::Start),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Multi-line summary printed when the agent exits.
    pub fn summary(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::from("Session Statistics:");
        for (counter, value) in snapshot.counters() {
            let _ = write!(out, "\n- {}: {value}", counter.label());
        }
        let _ = write!(
            out,
            "\n- Session duration: {} seconds",
            snapshot.session_duration_secs
        );
        out
    }

    /// Write the current totals to the persistence path, if there is one.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot()).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

fn read_snapshot(path: &Path) -> Result<Option<StatsSnapshot>, std::io::Error> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(std::io::Error::other)
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub readings_received: u64,
    pub ticks: u64,
    pub records_published: u64,
    pub publish_failures: u64,
    pub bias_fallbacks: u64,
    pub starts: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl StatsSnapshot {
    pub fn counters(&self) -> [(Counter, u64); 6] {
        [
            (Counter::Reading, self.readings_received),
            (Counter::Tick, self.ticks),
            (Counter::Published, self.records_published),
            (Counter::PublishFailure, self.publish_failures),
            (Counter::BiasFallback, self.bias_fallbacks),
            (Counter::Start, self.starts),
        ]
    }
}

pub type SharedStats = Arc<PipelineStats>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = PipelineStats::new();

        stats.record(Counter::Reading);
        stats.record(Counter::Reading);
        stats.record(Counter::Tick);
        stats.record(Counter::BiasFallback);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.readings_received, 2);
        assert_eq!(snapshot.ticks, 1);
        assert_eq!(snapshot.bias_fallbacks, 1);
        assert_eq!(snapshot.records_published, 0);
    }

    #[test]
    fn test_totals_carry_over_between_runs() {
        let path = std::env::temp_dir()
            .join(format!("wear-stats-{}", uuid::Uuid::new_v4()))
            .join("stats.json");

        let stats = PipelineStats::persistent(path.clone());
        stats.record(Counter::Tick);
        stats.record(Counter::Tick);
        stats.record(Counter::Start);
        stats.save().unwrap();

        let reloaded = PipelineStats::persistent(path.clone());
        assert_eq!(reloaded.get(Counter::Tick), 2);
        assert_eq!(reloaded.get(Counter::Start), 1);
        reloaded.record(Counter::Tick);
        assert_eq!(reloaded.snapshot().ticks, 3);

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn test_unreadable_stats_file_starts_from_zero() {
        let dir = std::env::temp_dir().join(format!("wear-stats-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stats.json");
        std::fs::write(&path, "not json").unwrap();

        let stats = PipelineStats::persistent(path);
        assert_eq!(stats.get(Counter::Tick), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_summary_lists_every_counter() {
        let stats = PipelineStats::new();
        stats.record(Counter::PublishFailure);

        let summary = stats.summary();
        for counter in Counter::ALL {
            assert!(summary.contains(counter.label()));
        }
        assert!(summary.contains("- Publish failures: 1"));
    }
}
