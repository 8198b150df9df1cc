//! Destinations for published score records.
//!
//! The publish loop hands every record to a [`ScoreSink`] without waiting for
//! the result. Failures are logged and counted by the caller, never retried.

use crate::core::ScoreRecord;
use crate::BoxFuture;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

/// Pipeline lifecycle transitions announced to sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started { timestamp_ms: i64 },
    Stopped { timestamp_ms: i64 },
}

impl LifecycleEvent {
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            LifecycleEvent::Started { timestamp_ms } | LifecycleEvent::Stopped { timestamp_ms } => {
                *timestamp_ms
            }
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Started { .. } => f.write_str("started"),
            LifecycleEvent::Stopped { .. } => f.write_str("stopped"),
        }
    }
}

/// Sink errors.
#[derive(Debug)]
pub enum SinkError {
    Io(String),
    Serialization(String),
    Remote(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "Sink IO error: {e}"),
            SinkError::Serialization(e) => write!(f, "Sink serialization error: {e}"),
            SinkError::Remote(e) => write!(f, "Remote sink error: {e}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Anything that accepts score records.
pub trait ScoreSink: Send + Sync {
    /// Deliver one record.
    fn publish(&self, record: ScoreRecord) -> BoxFuture<'_, Result<(), SinkError>>;

    /// Announce a pipeline start or stop. Most sinks ignore it.
    fn lifecycle(&self, _event: LifecycleEvent) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Writes each record to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ScoreSink for LogSink {
    fn publish(&self, record: ScoreRecord) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            tracing::info!(
                key = %record.key(),
                stress = record.stress,
                tension = record.tension,
                activity = record.activity,
                total = record.total,
                "Score record"
            );
            Ok(())
        })
    }
}

/// Appends each record as one JSON line.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    // Serializes appends so concurrent publishes never interleave lines.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

impl ScoreSink for JsonlSink {
    fn publish(&self, record: ScoreRecord) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            let mut line = serde_json::to_string(&record)
                .map_err(|e| SinkError::Serialization(e.to_string()))?;
            line.push('\n');

            let _guard = self.write_lock.lock().await;
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SinkError::Io(e.to_string()))?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| SinkError::Io(format!("{}: {e}", self.path.display())))?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| SinkError::Io(e.to_string()))?;
            file.flush().await.map_err(|e| SinkError::Io(e.to_string()))
        })
    }
}

/// Keeps records in memory. Useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ScoreRecord>>>,
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ScoreRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lifecycle_events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ScoreSink for MemorySink {
    fn publish(&self, record: ScoreRecord) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            if let Ok(mut records) = self.records.lock() {
                records.push(record);
            }
            Ok(())
        })
    }

    fn lifecycle(&self, event: LifecycleEvent) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
            Ok(())
        })
    }
}

/// Delivers every record to several sinks in turn.
///
/// All sinks are attempted; the first error is returned.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ScoreSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ScoreSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ScoreSink for FanoutSink {
    fn publish(&self, record: ScoreRecord) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            let mut first_error = None;
            for sink in &self.sinks {
                if let Err(e) = sink.publish(record.clone()).await {
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    fn lifecycle(&self, event: LifecycleEvent) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            let mut first_error = None;
            for sink in &self.sinks {
                if let Err(e) = sink.lifecycle(event).await {
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}
