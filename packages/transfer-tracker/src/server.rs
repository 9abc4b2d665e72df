//! HTTP server for health, metrics and transfer endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::info;
use transfer_pipeline::{ActionOutcome, BountyRejection, RouteMode, TransferSummary};

use crate::service::{TrackError, TrackerService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TrackerService>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub tracker_id: String,
    pub started_at: DateTime<Utc>,
    pub active_pipelines: usize,
    pub track_failures: u64,
    pub last_poll: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub path: String,
    /// Serve the EVM→TVM leg through the credit processor
    #[serde(default)]
    pub credit: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackResponse {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct BountyBody {
    pub bounty: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BountyResponse {
    pub tx_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

pub struct ApiError(TrackError);

impl From<TrackError> for ApiError {
    fn from(e: TrackError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, redirect) = match &self.0 {
            TrackError::NotTransfer { redirect, .. } => {
                (StatusCode::BAD_REQUEST, Some(redirect.to_string()))
            }
            TrackError::UnknownPipeline(_) => (StatusCode::NOT_FOUND, None),
            TrackError::Pipeline(_) => (StatusCode::UNPROCESSABLE_ENTITY, None),
            TrackError::Bounty(BountyRejection::Gateway(_)) => (StatusCode::BAD_GATEWAY, None),
            TrackError::Bounty(_) => (StatusCode::BAD_REQUEST, None),
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            redirect,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.service.stats().read().await.clone();
    Json(HealthResponse {
        status: "healthy".to_string(),
        tracker_id: stats.tracker_id,
        started_at: stats.started_at,
        active_pipelines: stats.active_pipelines,
        track_failures: stats.track_failures,
        last_poll: stats.last_poll,
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness probe (ready after the first service poll)
async fn readiness(State(state): State<AppState>) -> &'static str {
    if state.service.stats().read().await.last_poll.is_some() {
        "OK"
    } else {
        "NOT_READY"
    }
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

async fn list_transfers(State(state): State<AppState>) -> Json<Vec<TransferSummary>> {
    Json(state.service.aggregator().list().await)
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<TransferSummary> {
    Ok(Json(state.service.summary(&key).await?))
}

async fn untrack_transfer(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.untrack(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn track_transfer(
    State(state): State<AppState>,
    Json(request): Json<TrackRequest>,
) -> Result<(StatusCode, Json<TrackResponse>), ApiError> {
    let mode = if request.credit {
        RouteMode::Credit
    } else {
        RouteMode::Direct
    };
    let key = state.service.track(&request.path, mode).await?;
    info!(pipeline = %key, path = %request.path, "Transfer tracked via API");
    Ok((
        StatusCode::CREATED,
        Json(TrackResponse {
            key: key.to_string(),
        }),
    ))
}

async fn prepare(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<ActionOutcome> {
    Ok(Json(state.service.prepare(&key).await?))
}

async fn broadcast(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<ActionOutcome> {
    Ok(Json(state.service.broadcast(&key).await?))
}

async fn release(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<ActionOutcome> {
    Ok(Json(state.service.release(&key).await?))
}

async fn prepare_second(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<ActionOutcome> {
    Ok(Json(state.service.prepare_second(&key).await?))
}

async fn broadcast_second(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<ActionOutcome> {
    Ok(Json(state.service.broadcast_second(&key).await?))
}

async fn set_bounty(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<BountyBody>,
) -> ApiResult<BountyResponse> {
    let tx_id = state.service.set_bounty(&key, &body.bounty).await?;
    Ok(Json(BountyResponse { tx_id }))
}

pub fn router(service: Arc<TrackerService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .route("/track", post(track_transfer))
        .route("/transfers", get(list_transfers))
        .route("/transfers/{key}", get(get_transfer).delete(untrack_transfer))
        .route("/transfers/{key}/prepare", post(prepare))
        .route("/transfers/{key}/broadcast", post(broadcast))
        .route("/transfers/{key}/release", post(release))
        .route("/transfers/{key}/prepare-second", post(prepare_second))
        .route("/transfers/{key}/broadcast-second", post(broadcast_second))
        .route("/transfers/{key}/bounty", post(set_bounty))
        .with_state(AppState { service })
}

/// Start the HTTP server for health, metrics and transfers
pub async fn start_server(
    bind_address: &str,
    port: u16,
    service: Arc<TrackerService>,
) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("Status server listening on {}", addr);
    info!("  /health    - Full health status (JSON)");
    info!("  /metrics   - Prometheus metrics");
    info!("  /transfers - Tracked transfer summaries");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(service)).await?;

    Ok(())
}
