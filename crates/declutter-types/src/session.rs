//! Pipeline session state.
//!
//! A [`Session`] tracks one end-to-end run for one input image or one
//! multi-image capture batch. It moves through [`SessionStage`]s
//! `Created -> Detecting -> Evaluating -> Cropping -> Reporting -> Done`
//! (with an optional `Pricing -> Listing` tail before `Done`) and may be
//! absorbed into `Failed` from any non-terminal stage. A batch loops
//! `Cropping -> Detecting` once per further image before `Reporting`.
//! Terminal sessions are never mutated again.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::{DetectionSet, ResellableSet};
use crate::message::{
    CropOmission, CropRecord, ImageRef, Job, ListingOptions, ListingRecord, PriceQuote, StageKind,
};

/// Position of a session in the pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStage {
    Created,
    Detecting,
    Evaluating,
    Cropping,
    Reporting,
    Pricing,
    Listing,
    Done,
    Failed,
}

impl SessionStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// The stage whose result this session is waiting for.
    pub fn awaiting(&self) -> Option<StageKind> {
        match self {
            Self::Detecting => Some(StageKind::Detection),
            Self::Evaluating => Some(StageKind::Evaluation),
            Self::Cropping => Some(StageKind::Crop),
            Self::Reporting => Some(StageKind::Report),
            Self::Pricing => Some(StageKind::Pricing),
            Self::Listing => Some(StageKind::Listing),
            Self::Created | Self::Done | Self::Failed => None,
        }
    }

    /// The in-flight stage for a dispatched request of `kind`.
    pub fn running(kind: StageKind) -> Self {
        match kind {
            StageKind::Detection => Self::Detecting,
            StageKind::Evaluation => Self::Evaluating,
            StageKind::Crop => Self::Cropping,
            StageKind::Report => Self::Reporting,
            StageKind::Pricing => Self::Pricing,
            StageKind::Listing => Self::Listing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Detecting => "DETECTING",
            Self::Evaluating => "EVALUATING",
            Self::Cropping => "CROPPING",
            Self::Reporting => "REPORTING",
            Self::Pricing => "PRICING",
            Self::Listing => "LISTING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Per-stage summaries ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub detections: DetectionSet,
    pub largest: DetectionSet,
    pub unique_classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub resellable: ResellableSet,
    pub filtered: DetectionSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropSummary {
    pub crops: Vec<CropRecord>,
    pub omissions: Vec<CropOmission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub path: PathBuf,
    pub items: Vec<String>,
}

/// Detect, evaluate and crop results for one image of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResults {
    pub image: ImageRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropSummary>,
}

impl ImageResults {
    pub fn new(image: ImageRef) -> Self {
        Self {
            image,
            detection: None,
            evaluation: None,
            crop: None,
        }
    }
}

/// Accumulated results: one slot per image for the per-image stages, one
/// per session for the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageResults {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Vec<PriceQuote>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<Vec<ListingRecord>>,
}

impl StageResults {
    /// Results of the image currently (or most recently) in flight.
    pub fn current_image(&self) -> Option<&ImageResults> {
        self.images.last()
    }
}

// ── Session ──────────────────────────────────────────────────────────────

/// One tracked run of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub stage: SessionStage,
    /// Completed stage names in completion order.
    pub completed: Vec<StageKind>,
    pub job: Job,
    pub results: StageResults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(job: Job) -> Self {
        Self::new_at(job, Utc::now())
    }

    pub fn new_at(job: Job, created_at: DateTime<Utc>) -> Self {
        Self {
            id: job.session_id.clone(),
            created_at,
            stage: SessionStage::Created,
            completed: Vec::new(),
            job,
            results: StageResults::default(),
            error: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Record `kind` as completed (once).
    pub fn complete(&mut self, kind: StageKind) {
        if !self.completed.contains(&kind) {
            self.completed.push(kind);
        }
    }

    /// Images in the session's batch.
    pub fn image_count(&self) -> usize {
        self.job.image_count()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            stage: self.stage,
            images: self.image_count(),
            terminal: self.is_terminal(),
            created_at: self.created_at,
            error: self.error.clone(),
        }
    }
}

/// Lightweight listing entry for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub stage: SessionStage,
    pub images: usize,
    pub terminal: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Pipeline entry and exit ──────────────────────────────────────────────

/// A top-level "run the whole chain" request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Caller-supplied id; generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Already-stored source images, in capture order.
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub listing: Option<ListingOptions>,
}

impl PipelineRequest {
    /// A single-image request captured now.
    pub fn for_image(path: impl Into<PathBuf>) -> Self {
        Self::for_batch(vec![ImageRef {
            path: path.into(),
            captured_at_ms: Utc::now().timestamp_millis(),
        }])
    }

    pub fn for_batch(images: Vec<ImageRef>) -> Self {
        Self {
            images,
            ..Self::default()
        }
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_listing(mut self, listing: ListingOptions) -> Self {
        self.listing = Some(listing);
        self
    }
}

/// The final result of a session, published once on finalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub session_id: String,
    pub success: bool,
    pub stage: SessionStage,
    pub completed: Vec<StageKind>,
    pub results: StageResults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_ms: i64,
}

impl PipelineOutcome {
    pub fn from_session(session: &Session) -> Self {
        let end = session.finished_at.unwrap_or_else(Utc::now);
        Self {
            session_id: session.id.clone(),
            success: session.stage == SessionStage::Done,
            stage: session.stage,
            completed: session.completed.clone(),
            results: session.results.clone(),
            reason: session.error.clone(),
            elapsed_ms: (end - session.created_at).num_milliseconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ImageRef;

    fn job() -> Job {
        Job::new(
            "s1",
            ImageRef {
                path: PathBuf::from("a.jpg"),
                captured_at_ms: 0,
            },
            0,
        )
    }

    #[test]
    fn terminal_stages() {
        assert!(SessionStage::Done.is_terminal());
        assert!(SessionStage::Failed.is_terminal());
        assert!(!SessionStage::Reporting.is_terminal());
        assert!(!SessionStage::Created.is_terminal());
    }

    #[test]
    fn awaiting_matches_running() {
        for kind in [
            StageKind::Detection,
            StageKind::Evaluation,
            StageKind::Crop,
            StageKind::Report,
            StageKind::Pricing,
            StageKind::Listing,
        ] {
            assert_eq!(SessionStage::running(kind).awaiting(), Some(kind));
        }
        assert_eq!(SessionStage::Done.awaiting(), None);
    }

    #[test]
    fn new_session_takes_job_id() {
        let s = Session::new(job());
        assert_eq!(s.id, "s1");
        assert_eq!(s.stage, SessionStage::Created);
        assert!(!s.is_terminal());
    }

    #[test]
    fn complete_is_idempotent() {
        let mut s = Session::new(job());
        s.complete(StageKind::Detection);
        s.complete(StageKind::Detection);
        assert_eq!(s.completed, vec![StageKind::Detection]);
    }

    #[test]
    fn outcome_reflects_failure() {
        let mut s = Session::new(job());
        s.stage = SessionStage::Failed;
        s.error = Some("stalled".into());
        s.finished_at = Some(s.created_at + chrono::Duration::milliseconds(1500));
        let outcome = PipelineOutcome::from_session(&s);
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some("stalled"));
        assert_eq!(outcome.elapsed_ms, 1500);
    }

    #[test]
    fn batch_request_and_session_count_images() {
        let images: Vec<ImageRef> = ["a.jpg", "b.jpg"]
            .iter()
            .map(|p| ImageRef {
                path: PathBuf::from(p),
                captured_at_ms: 0,
            })
            .collect();
        let req = PipelineRequest::for_batch(images.clone());
        assert_eq!(req.images.len(), 2);

        let s = Session::new(Job::for_batch("s1", images, 0).unwrap());
        assert_eq!(s.image_count(), 2);
        assert_eq!(s.summary().images, 2);
        assert!(s.results.current_image().is_none());
    }

    #[test]
    fn stage_serde_is_screaming() {
        assert_eq!(
            serde_json::to_string(&SessionStage::Evaluating).unwrap(),
            "\"EVALUATING\""
        );
    }
}
