//! Demonstration of the Wear Sensor Agent scoring pipeline.
//!
//! This example shows how to:
//! 1. Build a pipeline with an in-memory sink
//! 2. Feed it synthetic walking readings
//! 3. Run the publish loop for a few ticks
//! 4. Inspect the published records and statistics
//!
//! Run with: cargo run --example scoring_demo

use std::sync::Arc;
use std::time::Duration;

use wear_sensor_agent::{
    bias::{BiasTerms, StaticBiasSource},
    sink::MemorySink,
    Pipeline, PipelineConfig, SensorKind, SensorReading,
};

#[tokio::main]
async fn main() {
    println!("Wear Sensor Agent - Scoring Demo");
    println!("================================");
    println!();

    let sink = MemorySink::new();
    let bias = BiasTerms {
        stress: 5,
        ..BiasTerms::default()
    };

    let pipeline = Pipeline::builder()
        .config(PipelineConfig::default().with_tick_interval(Duration::from_millis(500)))
        .bias_source(Arc::new(StaticBiasSource::new(bias)))
        .sink(Arc::new(sink.clone()))
        .device_id("demo-watch")
        .build(tokio::runtime::Handle::current());

    println!("Publishing every 500ms for 3 seconds...");
    println!();
    pipeline.start();

    let mut steps = 1200.0;
    for i in 0..30 {
        let bounce = if i % 2 == 0 { 11.5 } else { 9.2 };
        pipeline.handle_reading(&SensorReading::scalar(SensorKind::HeartRate, 96.0 + i as f64 * 0.5));
        pipeline.handle_reading(&SensorReading::new(
            SensorKind::Accelerometer,
            vec![0.4, bounce, 1.1],
        ));
        pipeline.handle_reading(&SensorReading::new(SensorKind::Gyroscope, vec![0.2, 0.1, 0.3]));
        pipeline.handle_reading(&SensorReading::scalar(SensorKind::Light, 320.0));
        if i % 3 == 0 {
            steps += 1.0;
            pipeline.handle_reading(&SensorReading::scalar(SensorKind::StepCounter, steps));
            pipeline.handle_reading(&SensorReading::scalar(SensorKind::StepDetector, 1.0));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    pipeline.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;

    for record in sink.records() {
        println!(
            "[{}] stress {:>3} | tension {:>3} | activity {:>3} | total {:>3}",
            record.observed_at, record.stress, record.tension, record.activity, record.total
        );
    }

    println!();
    println!("{}", pipeline.stats().summary());
}
