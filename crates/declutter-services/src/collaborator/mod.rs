//! External collaborator clients.
//!
//! The pipeline depends on three opaque services, each behind a trait so
//! workers can be tested with in-process fakes:
//!
//! - [`ObjectDetector`] -- boxes and labels for an image
//! - [`ResaleClassifier`] -- which candidate labels are worth reselling
//! - [`Marketplace`] -- comparable prices and listing creation
//!
//! Every client failure is a [`CollaboratorError`] carrying a typed
//! [`FailureKind`]; workers turn it into a
//! [`StageFailure`](declutter_types::message::StageFailure).

pub mod classifier;
pub mod detector;
pub mod marketplace;

use async_trait::async_trait;
use base64::Engine as _;
use thiserror::Error;

use declutter_types::detection::{Detection, ResellableSet};
use declutter_types::message::{
    FailureKind, ImageRef, ListingRecord, StageFailure, StageKind,
};

pub use classifier::VisionClassifier;
pub use detector::HttpDetector;
pub use marketplace::HttpMarketplace;

/// A typed failure from an external service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CollaboratorError {
    pub kind: FailureKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidResponse, message)
    }

    /// Classify a transport error from `service`.
    pub fn from_reqwest(service: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(FailureKind::Timeout, format!("{service} timed out: {err}"))
        } else if err.is_connect() {
            Self::unavailable(format!("{service} unavailable: {err}"))
        } else if err.is_decode() {
            Self::invalid_response(format!("{service} sent an unreadable body: {err}"))
        } else {
            Self::new(FailureKind::HttpError, format!("{service} request failed: {err}"))
        }
    }

    /// Classify a non-success HTTP status from `service`.
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => FailureKind::NotLoggedIn,
            408 | 504 => FailureKind::Timeout,
            502 | 503 => FailureKind::Unavailable,
            _ => FailureKind::HttpError,
        };
        let msg = if kind == FailureKind::Unavailable {
            format!("{service} unavailable: HTTP {status}: {body}")
        } else {
            format!("{service} returned HTTP {status}: {body}")
        };
        Self::new(kind, msg)
    }

    pub fn into_failure(self, stage: StageKind) -> StageFailure {
        StageFailure::new(stage, self.kind, self.message)
    }
}

/// Object detector: raw `(label, box, confidence)` hits for an image.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(
        &self,
        image: &ImageRef,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, CollaboratorError>;
}

/// Resale-worthiness classifier.
///
/// Malformed model output is not an error: implementations return an
/// empty set. Only transport or service failures are errors.
#[async_trait]
pub trait ResaleClassifier: Send + Sync {
    async fn classify(
        &self,
        image: &ImageRef,
        candidates: &[String],
    ) -> Result<ResellableSet, CollaboratorError>;
}

/// A listing to post on one platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingDraft {
    pub item: String,
    pub platform: String,
    pub condition: String,
    pub price: Option<f64>,
    pub image_path: Option<std::path::PathBuf>,
}

/// Price research and listing service.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Comparable prices for `item` in `condition`.
    async fn comparables(&self, item: &str, condition: &str) -> Result<Vec<f64>, CollaboratorError>;

    async fn post_listing(&self, draft: &ListingDraft) -> Result<ListingRecord, CollaboratorError>;
}

/// Read an image file and return `(mime, base64)`.
pub(crate) async fn encode_image(
    image: &ImageRef,
) -> Result<(&'static str, String), CollaboratorError> {
    let bytes = tokio::fs::read(&image.path).await.map_err(|e| {
        CollaboratorError::unavailable(format!(
            "source image {} unreadable: {e}",
            image.path.display()
        ))
    })?;
    let mime = match image
        .path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    };
    Ok((mime, base64::engine::general_purpose::STANDARD.encode(bytes)))
}

/// Build a reqwest client with a per-call timeout.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs.max(1)))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
