//! Stage requests and results exchanged between pipeline workers.
//!
//! Every message carries the session's [`Job`], so a worker that has just
//! produced a [`StageResult`] can derive the next [`StageRequest`] from the
//! result alone ([`StageResult::continuation`]). Failures travel as data in
//! [`StageResult::Failed`]; nothing is thrown across a worker boundary.
//!
//! A capture batch runs detect, evaluate and crop once per image, in
//! upload order. The job carries the images still pending and an
//! [`ImageEntry`] for every image already cropped; after the last image
//! the entries go to the report stage together.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::detection::{DetectionSet, ResellableSet};
use crate::geometry::BoundingBox;

// ── Stage kinds ──────────────────────────────────────────────────────────

/// One pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Detection,
    Evaluation,
    Crop,
    Report,
    Pricing,
    Listing,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Evaluation => "evaluation",
            Self::Crop => "crop",
            Self::Report => "report",
            Self::Pricing => "pricing",
            Self::Listing => "listing",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Job ──────────────────────────────────────────────────────────────────

/// Reference to the uploaded source image on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub path: PathBuf,
    /// Capture timestamp (ms since epoch), used in crop file names.
    pub captured_at_ms: i64,
}

impl ImageRef {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Marketplace listing options for the optional pricing/listing tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingOptions {
    pub platforms: Vec<String>,
    #[serde(default = "default_condition")]
    pub condition: String,
}

fn default_condition() -> String {
    "used".into()
}

/// The per-session context carried by every stage message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub session_id: String,
    /// The image currently moving through detect, evaluate and crop.
    pub image: ImageRef,
    /// Images of the batch not yet started, in upload order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<ImageRef>,
    /// Entries for the images already cropped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processed: Vec<ImageEntry>,
    /// Session start (ms since epoch), used for the report's duration.
    pub started_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingOptions>,
}

impl Job {
    pub fn new(session_id: impl Into<String>, image: ImageRef, started_at_ms: i64) -> Self {
        Self {
            session_id: session_id.into(),
            image,
            pending: Vec::new(),
            processed: Vec::new(),
            started_at_ms,
            listing: None,
        }
    }

    /// A job for a batch; `None` when `images` is empty.
    pub fn for_batch(
        session_id: impl Into<String>,
        images: Vec<ImageRef>,
        started_at_ms: i64,
    ) -> Option<Self> {
        let mut images = images.into_iter();
        let first = images.next()?;
        let mut job = Self::new(session_id, first, started_at_ms);
        job.pending = images.collect();
        Some(job)
    }

    pub fn with_listing(mut self, listing: Option<ListingOptions>) -> Self {
        self.listing = listing;
        self
    }

    /// Zero-based position of the current image in the batch.
    pub fn image_index(&self) -> usize {
        self.processed.len()
    }

    pub fn image_count(&self) -> usize {
        self.processed.len() + 1 + self.pending.len()
    }

    /// Close the current image with `entry` and pick the request that
    /// follows: detection of the next pending image, or the report once
    /// the batch is exhausted.
    pub fn finish_image(&self, entry: ImageEntry) -> StageRequest {
        let mut job = self.clone();
        job.processed.push(entry);
        if job.pending.is_empty() {
            StageRequest::Report { job }
        } else {
            job.image = job.pending.remove(0);
            StageRequest::Detect { job }
        }
    }
}

// ── Stage payloads ───────────────────────────────────────────────────────

/// Results of one image's pass through detect, evaluate and crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub image: ImageRef,
    /// Every distinct class detected in the image.
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub crops: Vec<CropRecord>,
    #[serde(default)]
    pub omissions: Vec<CropOmission>,
}

impl ImageEntry {
    /// An image where nothing was detected.
    pub fn empty(image: ImageRef) -> Self {
        Self {
            image,
            classes: Vec::new(),
            crops: Vec::new(),
            omissions: Vec::new(),
        }
    }

    /// Distinct cropped class names in crop order.
    pub fn resellable_objects(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for c in &self.crops {
            if !out.contains(&c.class_name) {
                out.push(c.class_name.clone());
            }
        }
        out
    }
}

/// One saved crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropRecord {
    pub class_name: String,
    pub source: PathBuf,
    pub bbox: BoundingBox,
    pub expanded: BoundingBox,
    pub file_name: String,
    pub area: i64,
    /// Border in pixels per side (x, y).
    pub border: (i64, i64),
}

/// A filtered detection that could not be cropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropOmission {
    pub class_name: String,
    pub bbox: BoundingBox,
    pub reason: String,
}

/// Summary statistics over comparable listing prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl PriceSummary {
    /// Summarise `prices`; `None` when there are no finite prices.
    pub fn from_prices(prices: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        Some(Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean,
            median,
        })
    }
}

/// Comparable-price research for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub item: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PriceSummary>,
}

impl PriceQuote {
    pub fn asking_price(&self) -> Option<f64> {
        self.summary.as_ref().map(|s| s.median)
    }
}

/// One posted marketplace listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub item: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

// ── Failures ─────────────────────────────────────────────────────────────

/// Typed failure reported by an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    NotLoggedIn,
    Timeout,
    HttpError,
    Unavailable,
    InvalidResponse,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotLoggedIn => "NOT_LOGGED_IN",
            Self::Timeout => "TIMEOUT",
            Self::HttpError => "HTTP_ERROR",
            Self::Unavailable => "UNAVAILABLE",
            Self::InvalidResponse => "INVALID_RESPONSE",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage failure encoded as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageKind,
    pub kind: FailureKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: StageKind, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    /// Human-readable reason naming the failing stage, with the
    /// collaborator's typed failure preserved verbatim.
    pub fn reason(&self) -> String {
        format!("{} failed: {}: {}", self.stage, self.kind, self.message)
    }
}

// ── Requests ─────────────────────────────────────────────────────────────

/// Work addressed to a stage worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageRequest {
    Detect {
        job: Job,
    },
    Evaluate {
        job: Job,
        /// Largest instance per class.
        candidates: DetectionSet,
        classes: Vec<String>,
    },
    Crop {
        job: Job,
        filtered: DetectionSet,
        /// Every distinct class detected in the image.
        classes: Vec<String>,
    },
    /// The batch is exhausted; `job.processed` holds one entry per image.
    Report {
        job: Job,
    },
    Price {
        job: Job,
        items: Vec<String>,
    },
    List {
        job: Job,
        quotes: Vec<PriceQuote>,
    },
}

impl StageRequest {
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Detect { .. } => StageKind::Detection,
            Self::Evaluate { .. } => StageKind::Evaluation,
            Self::Crop { .. } => StageKind::Crop,
            Self::Report { .. } => StageKind::Report,
            Self::Price { .. } => StageKind::Pricing,
            Self::List { .. } => StageKind::Listing,
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            Self::Detect { job }
            | Self::Evaluate { job, .. }
            | Self::Crop { job, .. }
            | Self::Report { job, .. }
            | Self::Price { job, .. }
            | Self::List { job, .. } => job,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.job().session_id
    }
}

// ── Results ──────────────────────────────────────────────────────────────

/// Outcome of one stage, sent to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageResult {
    Detected {
        job: Job,
        detections: DetectionSet,
    },
    Evaluated {
        job: Job,
        candidates: DetectionSet,
        resellable: ResellableSet,
    },
    Cropped {
        job: Job,
        crops: Vec<CropRecord>,
        omissions: Vec<CropOmission>,
        classes: Vec<String>,
    },
    Reported {
        job: Job,
        report_path: PathBuf,
        items: Vec<String>,
    },
    Priced {
        job: Job,
        quotes: Vec<PriceQuote>,
    },
    Listed {
        job: Job,
        listings: Vec<ListingRecord>,
    },
    Failed {
        job: Job,
        failure: StageFailure,
    },
}

impl StageResult {
    pub fn failed(job: Job, failure: StageFailure) -> Self {
        Self::Failed { job, failure }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            Self::Detected { .. } => StageKind::Detection,
            Self::Evaluated { .. } => StageKind::Evaluation,
            Self::Cropped { .. } => StageKind::Crop,
            Self::Reported { .. } => StageKind::Report,
            Self::Priced { .. } => StageKind::Pricing,
            Self::Listed { .. } => StageKind::Listing,
            Self::Failed { failure, .. } => failure.stage,
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            Self::Detected { job, .. }
            | Self::Evaluated { job, .. }
            | Self::Cropped { job, .. }
            | Self::Reported { job, .. }
            | Self::Priced { job, .. }
            | Self::Listed { job, .. }
            | Self::Failed { job, .. } => job,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.job().session_id
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The single request the producing worker must emit next, if any.
    ///
    /// - empty detection set: the next image of the batch, the report when
    ///   earlier images were processed, otherwise none (nothing detected)
    /// - evaluation: always a crop request, possibly with zero entries
    /// - crop: the next image of the batch, or the report
    /// - report: pricing only when listing was requested and items exist
    /// - listing and failures: none
    pub fn continuation(&self) -> Option<StageRequest> {
        match self {
            Self::Detected { job, detections } => {
                if detections.is_empty() {
                    if job.pending.is_empty() && job.processed.is_empty() {
                        return None;
                    }
                    return Some(job.finish_image(ImageEntry::empty(job.image.clone())));
                }
                let candidates = detections.largest_instances();
                let classes = candidates.unique_classes();
                Some(StageRequest::Evaluate {
                    job: job.clone(),
                    candidates,
                    classes,
                })
            }
            Self::Evaluated {
                job,
                candidates,
                resellable,
            } => Some(StageRequest::Crop {
                job: job.clone(),
                filtered: candidates.filter_resellable(resellable),
                classes: candidates.unique_classes(),
            }),
            Self::Cropped {
                job,
                crops,
                omissions,
                classes,
            } => Some(job.finish_image(ImageEntry {
                image: job.image.clone(),
                classes: classes.clone(),
                crops: crops.clone(),
                omissions: omissions.clone(),
            })),
            Self::Reported { job, items, .. } => {
                if job.listing.is_some() && !items.is_empty() {
                    Some(StageRequest::Price {
                        job: job.clone(),
                        items: items.clone(),
                    })
                } else {
                    None
                }
            }
            Self::Priced { job, quotes } => job.listing.as_ref().map(|_| StageRequest::List {
                job: job.clone(),
                quotes: quotes.clone(),
            }),
            Self::Listed { .. } | Self::Failed { .. } => None,
        }
    }
}
