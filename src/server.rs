//! HTTP control surface
//!
//! Every route maps onto one controller or queue call. Success bodies always
//! carry a `status` field; failures go through `ScreenlogError`'s
//! `IntoResponse`.

use crate::controller::SessionController;
use crate::error::{ScreenlogError, ScreenlogResult};
use crate::indexing::IndexingClient;
use axum::{
    extract::{Path, Query, State},
    response::Html,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const DEFAULT_RECENT_LIMIT: usize = 3;
pub const DEFAULT_VIDEO_LIMIT: usize = 10;

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>screenlog</title></head>
<body>
<h1>screenlog control surface</h1>
<ul>
<li><code>GET /start?percentage=N</code> start recording N% of the screen (default from config)</li>
<li><code>GET /stop</code> stop recording after finalizing the current segment</li>
<li><code>GET /set_percentage/N</code> change the region used from the next segment on</li>
<li><code>GET /recent_recordings?limit=N</code> latest upload outcomes, newest first</li>
<li><code>GET /status</code> session state and upload queue depth</li>
<li><code>GET /videos?limit=N</code> videos in the indexing collection</li>
<li><code>GET /videos/FILE_ID/description</code> generated description of one video</li>
<li><code>GET /health</code> liveness check</li>
</ul>
</body>
</html>
"#;

#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    pub indexer: Arc<dyn IndexingClient>,
}

impl AppState {
    pub fn new(controller: SessionController, indexer: Arc<dyn IndexingClient>) -> Self {
        Self {
            controller,
            indexer,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StartParams {
    percentage: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitParams {
    limit: Option<String>,
}

type ApiResult = ScreenlogResult<Json<Value>>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/start", get(start).post(start))
        .route("/stop", get(stop).post(stop))
        .route(
            "/set_percentage/:percentage",
            get(set_percentage).post(set_percentage),
        )
        .route("/recent_recordings", get(recent_recordings))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/videos", get(videos))
        .route("/videos/:file_id/description", get(video_description))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve the control surface until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> ScreenlogResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "control surface listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("control surface stopped");
    Ok(())
}

fn parse_percentage(raw: &str) -> ScreenlogResult<i64> {
    raw.trim().parse::<i64>().map_err(|_| {
        ScreenlogError::InvalidConfiguration(format!(
            "percentage must be an integer between 1 and 100, got '{}'",
            raw
        ))
    })
}

fn parse_limit(raw: Option<&str>, default: usize) -> ScreenlogResult<usize> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
            ScreenlogError::InvalidConfiguration(format!(
                "limit must be a non-negative integer, got '{}'",
                raw
            ))
        }),
    }
}

async fn start(State(state): State<AppState>, Query(params): Query<StartParams>) -> ApiResult {
    let percentage = params
        .percentage
        .as_deref()
        .map(parse_percentage)
        .transpose()?;
    let snapshot = state.controller.start(percentage).await?;

    Ok(Json(json!({
        "status": "started",
        "message": "Recording started",
        "session_id": snapshot.session_id,
        "screen_percentage": snapshot.target.percentage,
        "region": snapshot.target.region,
    })))
}

async fn stop(State(state): State<AppState>) -> ApiResult {
    let summary = state.controller.stop().await?;

    Ok(Json(json!({
        "status": "stopped",
        "message": "Recording stopped",
        "session_id": summary.session_id,
        "recordings_count": summary.segments_recorded,
        "last_error": summary.last_error,
    })))
}

async fn set_percentage(
    State(state): State<AppState>,
    Path(percentage): Path<String>,
) -> ApiResult {
    let target = state
        .controller
        .set_percentage(parse_percentage(&percentage)?)
        .await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Screen percentage set to {}%", target.percentage),
        "screen_percentage": target.percentage,
        "region": target.region,
    })))
}

async fn recent_recordings(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult {
    let limit = parse_limit(params.limit.as_deref(), DEFAULT_RECENT_LIMIT)?;
    let recordings = state.controller.queue().list_recent(limit);

    Ok(Json(json!({
        "status": "success",
        "count": recordings.len(),
        "recordings": recordings,
    })))
}

async fn status(State(state): State<AppState>) -> ApiResult {
    let session = state.controller.status().await;

    Ok(Json(json!({
        "status": "success",
        "session": session,
        "uploads_in_flight": state.controller.queue().in_flight(),
        "uploads_backlog": state.controller.queue().backlog(),
    })))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn videos(State(state): State<AppState>, Query(params): Query<LimitParams>) -> ApiResult {
    let limit = parse_limit(params.limit.as_deref(), DEFAULT_VIDEO_LIMIT)?;
    let collection_id = state.controller.queue().collection_id();
    let videos = state
        .indexer
        .list_videos(collection_id, limit)
        .await
        .map_err(ScreenlogError::from)?;

    Ok(Json(json!({
        "status": "success",
        "collection_id": collection_id,
        "count": videos.len(),
        "videos": videos,
    })))
}

async fn video_description(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult {
    let collection_id = state.controller.queue().collection_id();
    let description = state
        .indexer
        .get_description(collection_id, &file_id)
        .await
        .map_err(ScreenlogError::from)?;

    Ok(Json(json!({
        "status": "success",
        "file_id": file_id,
        "description": description,
    })))
}
