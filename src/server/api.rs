//! Control and observability HTTP API.
//!
//! Lets an external UI process drive the engine:
//! - GET /health
//! - GET /v1/cache/stats, /v1/monitor/status, /v1/scheduler/stats
//! - GET /v1/navigation, POST /v1/navigate, POST /v1/jump
//! - GET /v1/images/{index}, GET /v1/images/{index}/pixels
//! - GET /v1/images/{index}/state, POST /v1/images/{index}/release
//! - GET /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheStats, NavigationDirection};
use crate::decode::{DecodedImage, ImagePath, Orientation};
use crate::manager::{ImageManager, ManagerError, NavigationSnapshot, NavigationUpdate, PathState};
use crate::monitor::MonitorStatus;
use crate::preload::SchedulerStats;
use crate::server::metrics::Metrics;

/// Application state shared across handlers.
pub struct AppState {
    pub manager: Arc<ImageManager>,
    pub metrics: Metrics,
    pub session_id: Uuid,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(manager: Arc<ImageManager>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            manager,
            metrics: Metrics::new()?,
            session_id: Uuid::new_v4(),
            start_time: Instant::now(),
        })
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/monitor/status", get(monitor_status))
        .route("/v1/scheduler/stats", get(scheduler_stats))
        .route("/v1/navigation", get(navigation))
        .route("/v1/navigate", post(navigate))
        .route("/v1/jump", post(jump))
        .route("/v1/images/{index}", get(image_info))
        .route("/v1/images/{index}/pixels", get(image_pixels))
        .route("/v1/images/{index}/state", get(image_state))
        .route("/v1/images/{index}/release", post(release_image))
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub session_id: String,
    pub uptime_secs: u64,
    pub images: usize,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub direction: NavigationDirection,
}

#[derive(Debug, Deserialize)]
pub struct JumpRequest {
    pub index: usize,
}

/// Query for image requests; the direction tags the cached entry.
#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    #[serde(default)]
    pub direction: NavigationDirection,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub index: usize,
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
    pub orientation: Orientation,
}

#[derive(Debug, Serialize)]
pub struct PathStateResponse {
    pub index: usize,
    pub path: String,
    pub state: PathState,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub index: usize,
    pub was_cached: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ManagerError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ManagerError::OutOfRange { .. } | ManagerError::EmptyCollection => StatusCode::NOT_FOUND,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

fn path_for(state: &AppState, index: usize) -> Result<ImagePath, ManagerError> {
    state
        .manager
        .path_at(index)
        .cloned()
        .ok_or(ManagerError::OutOfRange {
            index,
            len: state.manager.len(),
        })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        session_id: state.session_id.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        images: state.manager.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, StatusCode> {
    let cache = state.manager.get_cache_stats().await;
    let scheduler = state.manager.scheduler_stats().await;
    let monitor = state.manager.monitor().get_status();
    state.metrics.observe(&cache, &scheduler, &monitor);

    match state.metrics.render() {
        Ok(text) => Ok((
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.manager.get_cache_stats().await)
}

async fn monitor_status(State(state): State<Arc<AppState>>) -> Json<MonitorStatus> {
    Json(state.manager.monitor().get_status())
}

async fn scheduler_stats(State(state): State<Arc<AppState>>) -> Json<SchedulerStats> {
    Json(state.manager.scheduler_stats().await)
}

async fn navigation(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NavigationSnapshot>, ManagerError> {
    state
        .manager
        .current()
        .await
        .map(Json)
        .ok_or(ManagerError::EmptyCollection)
}

async fn navigate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NavigateRequest>,
) -> Result<Json<NavigationUpdate>, ManagerError> {
    let update = state.manager.navigate(req.direction).await?;
    Ok(Json(update))
}

async fn jump(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JumpRequest>,
) -> Result<Json<NavigationUpdate>, ManagerError> {
    let update = state.manager.jump_to(req.index).await?;
    Ok(Json(update))
}

async fn load(
    state: &AppState,
    index: usize,
    direction: NavigationDirection,
) -> Result<(ImagePath, DecodedImage), ManagerError> {
    let path = path_for(state, index)?;
    let image = state.manager.request(&path, direction).await?;
    Ok((path, image))
}

async fn image_info(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
    Query(query): Query<ImageQuery>,
) -> Result<Json<ImageResponse>, ManagerError> {
    let (path, image) = load(&state, index, query.direction).await?;
    Ok(Json(ImageResponse {
        index,
        path: path.display().to_string(),
        width: image.width,
        height: image.height,
        bytes: image.byte_size(),
        orientation: image.orientation,
    }))
}

/// Raw RGBA8 pixels; dimensions travel in headers.
async fn image_pixels(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ManagerError> {
    let (_, image) = load(&state, index, query.direction).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::HeaderName::from_static("x-image-width"), image.width.to_string()),
            (header::HeaderName::from_static("x-image-height"), image.height.to_string()),
        ],
        image.pixels,
    )
        .into_response())
}

async fn image_state(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<PathStateResponse>, ManagerError> {
    let path = path_for(&state, index)?;
    let path_state = state.manager.path_state(&path).await;
    Ok(Json(PathStateResponse {
        index,
        path: path.display().to_string(),
        state: path_state,
    }))
}

async fn release_image(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<ReleaseResponse>, ManagerError> {
    let path = path_for(&state, index)?;
    let was_cached = state.manager.release(&path).await;
    info!(index, path = %path.display(), was_cached, "Release hint");
    Ok(Json(ReleaseResponse { index, was_cached }))
}
