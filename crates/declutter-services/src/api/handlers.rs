//! HTTP request handlers for the REST API.

use std::sync::OnceLock;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use declutter_core::orchestrator::OrchestratorStats;
use declutter_core::security::{generate_session_id, validate_session_id};
use declutter_types::message::{ImageRef, ListingOptions};
use declutter_types::session::{PipelineRequest, Session, SessionSummary};

use super::{ApiError, ApiState, MAX_BATCH_IMAGES};

static START_TIME: OnceLock<std::time::Instant> = OnceLock::new();

/// Build all API routes.
pub fn api_routes() -> Router<ApiState> {
    START_TIME.get_or_init(std::time::Instant::now);
    Router::new()
        .route("/sessions", get(list_sessions).post(create_sessions))
        .route("/sessions/{id}", get(get_session))
        .route("/stats", get(stats))
        .route("/health", get(health_check))
}

/// One uploaded image.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadImage {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(alias = "imageBase64")]
    pub image_base64: String,
}

/// Body of `POST /api/sessions`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UploadRequest {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub images: Vec<UploadImage>,
    #[serde(default)]
    pub listing: Option<ListingOptions>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub images: usize,
}

/// `GET /api/sessions/{id}` body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionStatus {
    pub terminal: bool,
    #[serde(flatten)]
    pub session: Session,
}

/// Store every image of the request, then start one session over all of
/// them. Nothing is stored unless every image and derived file name is
/// valid, and a failed save removes what was already written.
async fn create_sessions(
    State(state): State<ApiState>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    if req.images.is_empty() {
        return Err(ApiError::BadRequest("image payload is required".into()));
    }
    if req.images.len() > MAX_BATCH_IMAGES {
        return Err(ApiError::BadRequest(format!(
            "at most {MAX_BATCH_IMAGES} images per request"
        )));
    }
    let session_id = match req.session_id {
        Some(id) => {
            validate_session_id(&id)?;
            id
        }
        None => generate_session_id(),
    };
    if state.orchestrator.session(&session_id).await.is_ok() {
        return Err(ApiError::Conflict(format!("session {session_id} already exists")));
    }

    // Capture stamps are distinct per image so upload and crop names
    // within the batch never collide.
    let captured_at_ms = Utc::now().timestamp_millis();
    let mut planned = Vec::with_capacity(req.images.len());
    for (i, image) in req.images.iter().enumerate() {
        let ext = state.uploads.extension_for(image.filename.as_deref())?;
        let bytes = state.uploads.decode(&image.image_base64)?;
        let stamp = captured_at_ms + i as i64;
        let path = state.uploads.path_for(&session_id, stamp, &ext)?;
        let image = ImageRef {
            path,
            captured_at_ms: stamp,
        };
        planned.push((image, bytes));
    }

    let mut images: Vec<ImageRef> = Vec::with_capacity(planned.len());
    for (image, bytes) in planned {
        if let Err(e) = state.uploads.save(&image.path, &bytes).await {
            let paths: Vec<&std::path::Path> = images.iter().map(|i| i.path.as_path()).collect();
            state.uploads.discard(paths).await;
            return Err(e);
        }
        images.push(image);
    }

    let count = images.len();
    let mut request = PipelineRequest::for_batch(images.clone()).with_session_id(session_id);
    request.listing = req.listing;
    let session_id = match state.orchestrator.start(request).await {
        Ok(id) => id,
        Err(e) => {
            let paths: Vec<&std::path::Path> = images.iter().map(|i| i.path.as_path()).collect();
            state.uploads.discard(paths).await;
            return Err(e.into());
        }
    };
    info!(session_id = %session_id, images = count, "upload accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            session_id,
            images: count,
        }),
    ))
}

async fn list_sessions(State(state): State<ApiState>) -> Json<Vec<SessionSummary>> {
    Json(state.orchestrator.sessions().await)
}

async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    let session = state.orchestrator.session(&id).await?;
    Ok(Json(SessionStatus {
        terminal: session.is_terminal(),
        session,
    }))
}

async fn stats(State(state): State<ApiState>) -> Json<OrchestratorStats> {
    Json(state.orchestrator.stats().await)
}

async fn health_check() -> Json<serde_json::Value> {
    let start = START_TIME.get_or_init(std::time::Instant::now);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": start.elapsed().as_secs()
    }))
}
