//! HTTP control and ingest server.
//!
//! Lets a companion process push sensor readings into a running agent and
//! start or stop its publish loop:
//!
//! ```text
//! device bridge ──→ POST /readings ──→ pipeline ──→ sink
//!                   POST /start, /stop
//!                   GET  /status, /health
//! ```

use crate::bias::BiasTerms;
use crate::collector::types::SensorReading;
use crate::core::ScoreRecord;
use crate::pipeline::Pipeline;
use crate::stats::StatsSnapshot;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// One reading or a batch of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReadingsBody {
    Many(Vec<SensorReading>),
    One(SensorReading),
}

impl ReadingsBody {
    fn into_vec(self) -> Vec<SensorReading> {
        match self {
            ReadingsBody::Many(readings) => readings,
            ReadingsBody::One(reading) => vec![reading],
        }
    }
}

/// Response from the readings endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ReadingsResponse {
    pub accepted: usize,
    pub dropped: usize,
}

/// Response from the start and stop endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub status: String,
    pub running: bool,
}

/// Status response
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub device_id: String,
    pub bias: BiasTerms,
    pub stats: StatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<ScoreRecord>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status
async fn status(State(pipeline): State<Arc<Pipeline>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: pipeline.is_running(),
        device_id: pipeline.device_id().to_string(),
        bias: pipeline.state().bias().current(),
        stats: pipeline.stats().snapshot(),
        latest: pipeline.latest_record(),
    })
}

/// POST /start
async fn start(State(pipeline): State<Arc<Pipeline>>) -> Json<ControlResponse> {
    pipeline.start();
    Json(ControlResponse {
        status: "started".to_string(),
        running: true,
    })
}

/// POST /stop
async fn stop(State(pipeline): State<Arc<Pipeline>>) -> Json<ControlResponse> {
    let status = if pipeline.stop() { "stopped" } else { "idle" };
    Json(ControlResponse {
        status: status.to_string(),
        running: false,
    })
}

/// POST /readings
async fn readings(
    State(pipeline): State<Arc<Pipeline>>,
    body: Result<Json<ReadingsBody>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<ReadingsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Json(body) = body.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Invalid readings: {e}"),
                code: "INVALID_READINGS".to_string(),
            }),
        )
    })?;

    let batch = body.into_vec();
    let accepted = batch
        .iter()
        .filter(|reading| pipeline.handle_reading(reading))
        .count();

    Ok(Json(ReadingsResponse {
        accepted,
        dropped: batch.len() - accepted,
    }))
}

/// Build the router without binding it.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/readings", post(readings))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(pipeline)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(pipeline);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Wear sensor agent server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
