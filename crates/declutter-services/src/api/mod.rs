//! Upload and status HTTP API.
//!
//! Routes live under `/api`:
//!
//! | method | path | |
//! |---|---|---|
//! | POST | `/sessions` | upload one image or a batch, start one session (202) |
//! | GET | `/sessions` | session summaries |
//! | GET | `/sessions/{id}` | stage, terminal flag, partial results, reason |
//! | GET | `/stats` | orchestrator counters |
//! | GET | `/health` | liveness |
//!
//! Nothing here waits for a pipeline to finish.

pub mod handlers;
pub mod upload;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use declutter_core::orchestrator::Orchestrator;
use declutter_types::config::ApiConfig;
use declutter_types::error::DeclutterError;

pub use upload::{MAX_BATCH_IMAGES, UploadStore};

/// Shared state accessible by all API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub uploads: Arc<UploadStore>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>, uploads: UploadStore) -> Self {
        Self {
            orchestrator,
            uploads: Arc::new(uploads),
        }
    }
}

/// Handler errors, rendered as `{"error": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DeclutterError> for ApiError {
    fn from(e: DeclutterError) -> Self {
        match e {
            DeclutterError::InvalidRequest { .. } | DeclutterError::InvalidSessionId { .. } => {
                Self::BadRequest(e.to_string())
            }
            DeclutterError::SessionNotFound(_) => Self::NotFound(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the API router with all routes.
pub fn build_router(state: ApiState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };
    let body_limit = state.uploads.request_body_limit();

    Router::new()
        .nest("/api", handlers::api_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `config.bind_addr()` and serve until `cancel` fires.
pub async fn serve(
    config: &ApiConfig,
    state: ApiState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %listener.local_addr()?, "api listening");
    axum::serve(listener, build_router(state, &config.cors_origins))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
