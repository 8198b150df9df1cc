//! The sampling-and-scoring pipeline.
//!
//! Sensor callbacks feed [`Pipeline::handle_reading`] at whatever rate they
//! fire. Independently, a periodic publish cycle runs once per tick:
//!
//! ```text
//! refresh bias ─▶ snapshot signals ─▶ read aggregators ─▶ score ─▶ sink (detached)
//! ```
//!
//! The cycle is either idle or running. `start` replaces any running cycle,
//! `stop` cancels it, and both may be called any number of times.
//! Start and stop notices reach the sink in call order, and a new cycle's
//! first tick waits until its start notice has been delivered.

use crate::bias::{BiasFetcher, BiasSource, BiasTerms, StaticBiasSource};
use crate::collector::types::{SensorKind, SensorReading};
use crate::config::{PipelineConfig, SensorConfig};
use crate::core::{
    compute_scores, MotionAggregators, ScoreInputs, ScoreRecord, SignalSnapshot, SignalStore,
};
use crate::sink::{LifecycleEvent, LogSink, ScoreSink};
use crate::stats::{Counter, PipelineStats, SharedStats};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::{Arc, Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Build a device identifier from the hostname and a short random suffix.
pub fn default_device_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "wear-{}-{}",
        hostname,
        &uuid::Uuid::new_v4().to_string()[..8]
    )
}

/// Mutable state shared by sensor callbacks and the publish cycle.
///
/// Every signal and buffer has its own lock; there is no pipeline-wide lock.
pub struct PipelineState {
    config: PipelineConfig,
    signals: SignalStore,
    motion: MotionAggregators,
    bias: BiasFetcher,
}

impl PipelineState {
    pub fn new(config: PipelineConfig, bias_source: Arc<dyn BiasSource>, runtime: Handle) -> Self {
        let config = config.with_tick_interval(config.tick_interval);
        Self {
            config,
            signals: SignalStore::new(config.step_detected_hold, runtime),
            motion: MotionAggregators::new(&config),
            bias: BiasFetcher::new(bias_source),
        }
    }

    /// Apply one sensor reading to the signal store and the matching aggregator.
    pub fn apply_reading(&self, reading: &SensorReading) {
        self.signals.set_signal(reading);
        match reading.kind {
            SensorKind::Accelerometer => self.motion.on_accelerometer(reading.rms()),
            SensorKind::Gyroscope => self.motion.on_gyroscope(reading.rms()),
            _ => {}
        }
    }

    /// Read everything the scoring step needs, as of now.
    pub fn score_inputs(&self) -> (SignalSnapshot, ScoreInputs) {
        let signals = self.signals.snapshot();
        let inputs = ScoreInputs {
            heart_rate: signals.value(SensorKind::HeartRate),
            light: signals.value(SensorKind::Light),
            step_detected: signals.step_detected,
            step_delta: signals.step_counter.delta(),
            motion: self.motion.snapshot(),
        };
        (signals, inputs)
    }

    /// Score the current state with the given bias into a record.
    pub fn build_record(
        &self,
        bias: BiasTerms,
        at: DateTime<Utc>,
        timezone: Tz,
        device_id: &str,
    ) -> ScoreRecord {
        let (signals, inputs) = self.score_inputs();
        let scores = compute_scores(&inputs, &bias);
        ScoreRecord::new(
            at,
            timezone,
            device_id,
            scores,
            bias,
            signals.display_map(bias.heart_rate),
        )
    }

    pub fn signals(&self) -> &SignalStore {
        &self.signals
    }

    pub fn motion(&self) -> &MotionAggregators {
        &self.motion
    }

    pub fn bias(&self) -> &BiasFetcher {
        &self.bias
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Forget all signals and motion history.
    pub fn reset(&self) {
        self.signals.reset();
        self.motion.reset(&self.config);
    }
}

/// A lifecycle event waiting for delivery, with a signal for when it lands.
struct Notice {
    event: LifecycleEvent,
    delivered: oneshot::Sender<()>,
}

/// Deliver lifecycle events one at a time, in the order they were announced.
async fn deliver_notices(sink: Arc<dyn ScoreSink>, mut queue: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = queue.recv().await {
        if let Err(e) = sink.lifecycle(notice.event).await {
            tracing::warn!("Failed to announce pipeline {}: {e}", notice.event);
        }
        let _ = notice.delivered.send(());
    }
}

/// Everything a running cycle needs, shared with the spawned task.
struct Inner {
    state: PipelineState,
    sink: Arc<dyn ScoreSink>,
    notices: mpsc::UnboundedSender<Notice>,
    stats: SharedStats,
    runtime: Handle,
    sensors: SensorConfig,
    timezone: Tz,
    device_id: String,
    latest: RwLock<Option<ScoreRecord>>,
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.state.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) -> ScoreRecord {
        let refresh = self.state.bias.refresh().await;
        if refresh.fell_back {
            self.stats.record(Counter::BiasFallback);
        }

        let record =
            self.state
                .build_record(refresh.terms, Utc::now(), self.timezone, &self.device_id);
        self.stats.record(Counter::Tick);
        tracing::debug!(
            key = %record.key(),
            stress = record.stress,
            tension = record.tension,
            activity = record.activity,
            total = record.total,
            "Tick scored"
        );

        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(record.clone());
        }
        self.dispatch(record.clone());
        record
    }

    /// Hand a record to the sink without waiting for delivery.
    fn dispatch(&self, record: ScoreRecord) {
        let sink = self.sink.clone();
        let stats = self.stats.clone();
        self.runtime.spawn(async move {
            let key = record.key();
            match sink.publish(record).await {
                Ok(()) => {
                    stats.record(Counter::Published);
                    tracing::debug!("Published record {key}");
                }
                Err(e) => {
                    stats.record(Counter::PublishFailure);
                    tracing::error!("Failed to publish record {key}: {e}");
                }
            }
        });
    }

    /// Queue a lifecycle event. The receiver resolves once the sink has handled it.
    fn announce(&self, event: LifecycleEvent) -> oneshot::Receiver<()> {
        let (delivered, receiver) = oneshot::channel();
        if self.notices.send(Notice { event, delivered }).is_err() {
            tracing::warn!("Lifecycle queue closed, {event} notice dropped");
        }
        receiver
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    bias_source: Arc<dyn BiasSource>,
    sink: Arc<dyn ScoreSink>,
    stats: Option<SharedStats>,
    sensors: SensorConfig,
    timezone: Tz,
    device_id: Option<String>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Start from the default policy, zero bias and a logging sink.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            bias_source: Arc::new(StaticBiasSource::zero()),
            sink: Arc::new(LogSink),
            stats: None,
            sensors: SensorConfig::default(),
            timezone: Tz::UTC,
            device_id: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bias_source(mut self, source: Arc<dyn BiasSource>) -> Self {
        self.bias_source = source;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ScoreSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn stats(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn sensors(mut self, sensors: SensorConfig) -> Self {
        self.sensors = sensors;
        self
    }

    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Build the pipeline. Ticks, publishes and step-detector timers are
    /// spawned on `runtime`.
    pub fn build(self, runtime: Handle) -> Pipeline {
        let (notices, queue) = mpsc::unbounded_channel();
        runtime.spawn(deliver_notices(self.sink.clone(), queue));

        let inner = Inner {
            state: PipelineState::new(self.config, self.bias_source, runtime.clone()),
            sink: self.sink,
            notices,
            stats: self.stats.unwrap_or_else(|| Arc::new(PipelineStats::new())),
            runtime,
            sensors: self.sensors,
            timezone: self.timezone,
            device_id: self.device_id.unwrap_or_else(default_device_id),
            latest: RwLock::new(None),
        };

        Pipeline {
            inner: Arc::new(inner),
            cycle: Mutex::new(None),
        }
    }
}

/// The sensor pipeline with its start/stop control surface.
pub struct Pipeline {
    inner: Arc<Inner>,
    cycle: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Feed one sensor reading. Returns false if the reading was dropped
    /// because its sensor is disabled or its values are unusable.
    pub fn handle_reading(&self, reading: &SensorReading) -> bool {
        if !self.inner.sensors.is_enabled(reading.kind) {
            return false;
        }
        if reading.values.is_empty() || reading.values.iter().any(|v| !v.is_finite()) {
            tracing::debug!("Dropping {} reading with unusable values", reading.kind);
            return false;
        }

        self.inner.stats.record(Counter::Reading);
        self.inner.state.apply_reading(reading);
        true
    }

    /// Begin publishing once per tick, replacing any running cycle.
    pub fn start(&self) {
        let Ok(mut cycle) = self.cycle.lock() else {
            tracing::error!("Publish cycle lock poisoned, cannot start");
            return;
        };

        if let Some(previous) = cycle.take() {
            previous.abort();
            tracing::debug!("Replaced running publish cycle");
        }

        self.inner.stats.record(Counter::Start);
        let started = self.inner.announce(LifecycleEvent::Started {
            timestamp_ms: Utc::now().timestamp_millis(),
        });

        let inner = self.inner.clone();
        *cycle = Some(self.inner.runtime.spawn(async move {
            // No record goes out before the sink has seen the start.
            let _ = started.await;
            inner.run().await;
        }));
        tracing::info!(
            "Publish loop started (every {} ms)",
            self.inner.state.config.tick_interval.as_millis()
        );
    }

    /// Cancel the publish cycle. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let running = self.cycle.lock().ok().and_then(|mut cycle| cycle.take());

        match running {
            Some(handle) => {
                handle.abort();
                let _ = self.inner.announce(LifecycleEvent::Stopped {
                    timestamp_ms: Utc::now().timestamp_millis(),
                });
                tracing::info!("Publish loop stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cycle
            .lock()
            .map(|cycle| cycle.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Run one tick immediately, outside the periodic cycle.
    pub async fn tick_once(&self) -> ScoreRecord {
        self.inner.tick().await
    }

    /// The record produced by the most recent tick.
    pub fn latest_record(&self) -> Option<ScoreRecord> {
        self.inner
            .latest
            .read()
            .ok()
            .and_then(|latest| latest.clone())
    }

    pub fn state(&self) -> &PipelineState {
        &self.inner.state
    }

    pub fn stats(&self) -> &SharedStats {
        &self.inner.stats
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Forget all signals and motion history. The publish cycle is unaffected.
    pub fn reset(&self) {
        self.inner.state.reset();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Ok(mut cycle) = self.cycle.lock() {
            if let Some(handle) = cycle.take() {
                handle.abort();
            }
        }
    }
}
