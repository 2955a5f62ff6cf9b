// bases/control_server/src/server.rs
use crate::config::ConfigStore;
use crate::error::ApiError;
use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use control_primitives::{MediaName, OutputRoute, SeekPosition, SkipDelta, Volume};
use futures::StreamExt;
use media_library::{MediaFile, MediaLibrary};
use playback_session::{SessionHandle, SessionView};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub library: Arc<MediaLibrary>,
    pub config: Arc<Mutex<ConfigStore>>,
    pub started_at: Instant,
}

/// Run the control API server.
pub async fn run(state: AppState, port: u16) -> color_eyre::Result<()> {
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("control API listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/resume", post(resume))
        .route("/api/stop", post(stop))
        .route("/api/seek", post(seek))
        .route("/api/skip", post(skip))
        .route("/api/volume", post(volume))
        .route("/api/output", post(output))
        .route("/api/status", get(status))
        .route("/api/health", get(health))
        .route("/api/files", get(list_files))
        .route("/api/files/:name", delete(delete_file))
        .route("/api/upload", post(upload))
        .route("/api/config", get(get_config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PlayRequest {
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeekRequest {
    position: f64,
}

#[derive(Debug, Deserialize)]
struct SkipRequest {
    seconds: f64,
}

#[derive(Debug, Deserialize)]
struct VolumeRequest {
    level: i64,
}

#[derive(Debug, Deserialize)]
struct OutputRequest {
    output: String,
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    name: String,
}

/// Play a named file, or resume the paused session when no file is given.
async fn play(
    State(state): State<AppState>,
    body: Option<Json<PlayRequest>>,
) -> Result<Json<SessionView>, ApiError> {
    let file = body.and_then(|Json(request)| request.file);

    let view = match file {
        Some(file) => {
            let name = MediaName::new(&file)?;
            state.session.start(name).await?
        }
        None => state.session.resume().await?,
    };

    Ok(Json(view))
}

async fn pause(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.session.pause().await?))
}

async fn resume(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.session.resume().await?))
}

async fn stop(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.session.stop().await?))
}

async fn seek(
    State(state): State<AppState>,
    Json(request): Json<SeekRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let position = SeekPosition::new(request.position)?;
    Ok(Json(state.session.seek(position).await?))
}

async fn skip(
    State(state): State<AppState>,
    Json(request): Json<SkipRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let delta = SkipDelta::new(request.seconds)?;
    Ok(Json(state.session.skip(delta).await?))
}

async fn volume(
    State(state): State<AppState>,
    Json(request): Json<VolumeRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let volume = Volume::new(request.level)?;
    let view = state.session.set_volume(volume).await?;

    if let Err(e) = state.config.lock().await.set_volume(request.level) {
        warn!("could not persist volume: {e}");
    }

    Ok(Json(view))
}

async fn output(
    State(state): State<AppState>,
    Json(request): Json<OutputRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let route = OutputRoute::parse(&request.output)?;
    let view = state.session.set_route(route).await?;

    if let Err(e) = state.config.lock().await.set_output_route(route) {
        warn!("could not persist output route: {e}");
    }

    Ok(Json(view))
}

/// Never fails on a live controller; a failed session is reported in the
/// body, not as an error status.
async fn status(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session.status())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let view = state.session.status();
    Json(json!({
        "status": "healthy",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "player_state": view.state,
        "media_dir": state.library.media_dir().display().to_string(),
    }))
}

async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<MediaFile>>, ApiError> {
    Ok(Json(state.library.list().await?))
}

async fn delete_file(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Json<Value>, ApiError> {
    let name = MediaName::new(&name)?;

    // Deleting the file that is on screen stops the session first.
    if state.session.status().file.as_deref() == Some(name.as_str()) {
        state.session.stop().await?;
    }

    state.library.delete(&name).await?;
    Ok(Json(json!({ "success": true })))
}

/// Streamed upload. Runs entirely on this handler's task; the playback
/// command path is never involved, so control traffic keeps flowing while
/// bytes land.
async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<MediaFile>, ApiError> {
    let name = MediaName::new(&params.name)?;

    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let mut job = state.library.begin_upload(name, declared_size).await?;

    let mut stream = body.into_data_stream();
    while let Some(frame) = stream.next().await {
        // An early return drops the job, which removes the temp file.
        let bytes = frame.map_err(|e| ApiError::Internal(format!("upload stream failed: {e}")))?;
        job.write_chunk(&bytes).await?;
    }

    Ok(Json(job.complete().await?))
}

async fn get_config(State(state): State<AppState>) -> Json<crate::config::Config> {
    Json(state.config.lock().await.config.clone())
}
