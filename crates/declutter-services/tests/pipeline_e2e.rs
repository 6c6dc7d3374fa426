//! Whole-pipeline runs over the worker bus with in-process collaborators.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

use declutter_services::collaborator::{
    CollaboratorError, ListingDraft, Marketplace, ObjectDetector, ResaleClassifier,
};
use declutter_services::{Collaborators, Pipeline};
use declutter_types::config::Config;
use declutter_types::detection::{Detection, ResellableSet};
use declutter_types::geometry::BoundingBox;
use declutter_types::message::{FailureKind, ImageRef, ListingOptions, ListingRecord, StageKind};
use declutter_types::session::{PipelineOutcome, PipelineRequest, SessionStage};

struct ScenarioDetector {
    fail: bool,
}

#[async_trait]
impl ObjectDetector for ScenarioDetector {
    async fn detect(&self, image: &ImageRef, _: f32) -> Result<Vec<Detection>, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::unavailable(
                "detector unavailable: model not loaded",
            ));
        }
        if image.file_name().starts_with("empty") {
            return Ok(Vec::new());
        }
        let d = |label: &str, b: [i64; 4]| Detection {
            label: label.into(),
            bbox: BoundingBox::new(b[0], b[1], b[2], b[3]),
            confidence: 0.9,
        };
        Ok(vec![
            d("laptop", [0, 0, 100, 100]),
            d("laptop", [0, 0, 50, 50]),
            d("bottle", [10, 10, 30, 30]),
        ])
    }
}

/// Returns `["Laptop"]` and counts calls.
#[derive(Default)]
struct LaptopClassifier {
    calls: AtomicUsize,
}

#[async_trait]
impl ResaleClassifier for LaptopClassifier {
    async fn classify(
        &self,
        _: &ImageRef,
        _: &[String],
    ) -> Result<ResellableSet, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResellableSet::from_labels(["Laptop"]))
    }
}

struct FakeMarketplace;

#[async_trait]
impl Marketplace for FakeMarketplace {
    async fn comparables(&self, _: &str, _: &str) -> Result<Vec<f64>, CollaboratorError> {
        Ok(vec![200.0, 400.0, 300.0])
    }

    async fn post_listing(
        &self,
        draft: &ListingDraft,
    ) -> Result<ListingRecord, CollaboratorError> {
        if draft.platform == "facebook" {
            return Err(CollaboratorError::new(
                FailureKind::NotLoggedIn,
                "facebook session expired",
            ));
        }
        Ok(ListingRecord {
            item: draft.item.clone(),
            platform: draft.platform.clone(),
            listing_id: Some("1".into()),
            url: Some("https://ebay.example/1".into()),
            price: draft.price,
        })
    }
}

fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.crop_dir = dir.join("crops").display().to_string();
    config.storage.report_dir = dir.join("reports").display().to_string();
    config.storage.upload_dir = dir.join("uploads").display().to_string();
    config
}

fn write_capture(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("capture.png");
    RgbImage::from_pixel(320, 240, Rgb([200, 200, 200]))
        .save(&path)
        .unwrap();
    path
}

struct Harness {
    pipeline: Pipeline,
    classifier: Arc<LaptopClassifier>,
    _tmp: tempfile::TempDir,
    capture: std::path::PathBuf,
}

async fn harness(detector_fails: bool) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let capture = write_capture(tmp.path());
    let classifier = Arc::new(LaptopClassifier::default());
    let collaborators = Collaborators {
        detector: Arc::new(ScenarioDetector {
            fail: detector_fails,
        }),
        classifier: classifier.clone(),
        marketplace: Arc::new(FakeMarketplace),
    };
    let pipeline = Pipeline::start(&config(tmp.path()), collaborators, CancellationToken::new())
        .await
        .unwrap();
    Harness {
        pipeline,
        classifier,
        _tmp: tmp,
        capture,
    }
}

async fn run(h: &Harness, request: PipelineRequest) -> PipelineOutcome {
    let orch = h.pipeline.orchestrator();
    let mut outcomes = orch.subscribe();
    let id = orch.start(request).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let outcome = outcomes.recv().await.unwrap();
            if outcome.session_id == id {
                return outcome;
            }
        }
    })
    .await
    .expect("pipeline did not finish")
}

#[tokio::test]
async fn laptop_and_bottle() {
    let h = harness(false).await;
    let request = PipelineRequest::for_image(&h.capture).with_session_id("kitchen");
    let outcome = run(&h, request).await;

    assert!(outcome.success, "{:?}", outcome.reason);
    assert_eq!(outcome.stage, SessionStage::Done);
    assert_eq!(
        outcome.completed,
        vec![
            StageKind::Detection,
            StageKind::Evaluation,
            StageKind::Crop,
            StageKind::Report
        ]
    );

    assert_eq!(outcome.results.images.len(), 1);
    let detection = outcome.results.images[0].detection.as_ref().unwrap();
    assert_eq!(detection.largest.len(), 2);
    assert_eq!(
        detection.largest.label_of(&BoundingBox::new(0, 0, 100, 100)),
        Some("laptop")
    );

    let crop = outcome.results.images[0].crop.as_ref().unwrap();
    assert_eq!(crop.crops.len(), 1);
    assert_eq!(crop.crops[0].class_name, "laptop");

    let report = outcome.results.report.as_ref().unwrap();
    assert_eq!(report.items, vec!["laptop"]);
    let text = std::fs::read_to_string(&report.path).unwrap();
    assert!(text.contains("Resellable Objects: laptop\n"));
    assert!(!text.contains("bottle"));
    assert!(text.contains("Total Unique Object Types: 1"));

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn batch_session_reports_every_image() {
    let h = harness(false).await;
    let empty = h.capture.with_file_name("empty-corner.png");
    std::fs::copy(&h.capture, &empty).unwrap();
    let image = |path: &Path, captured_at_ms| ImageRef {
        path: path.to_path_buf(),
        captured_at_ms,
    };
    let request = PipelineRequest::for_batch(vec![
        image(&h.capture, 1),
        image(&empty, 2),
        image(&h.capture, 3),
    ])
    .with_session_id("garage");
    let outcome = run(&h, request).await;

    assert!(outcome.success, "{:?}", outcome.reason);
    assert_eq!(outcome.results.images.len(), 3);
    assert!(outcome.results.images[1].evaluation.is_none());
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 2);

    let crops: Vec<_> = outcome
        .results
        .images
        .iter()
        .filter_map(|img| img.crop.as_ref())
        .flat_map(|c| &c.crops)
        .map(|c| c.file_name.clone())
        .collect();
    assert_eq!(crops, vec!["garage_1_1_laptop.jpg", "garage_3_1_laptop.jpg"]);

    let report = outcome.results.report.as_ref().unwrap();
    assert_eq!(report.items, vec!["laptop"]);
    let text = std::fs::read_to_string(&report.path).unwrap();
    assert_eq!(text.matches("Capture: ").count(), 3);
    assert!(text.contains("Capture: empty-corner.png\n  - No resellable objects found"));
    assert!(text.contains("Total Images Processed: 3"));
    assert!(text.contains("Total Unique Object Types: 1"));

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn detector_down_fails_before_evaluation() {
    let h = harness(true).await;
    let outcome = run(&h, PipelineRequest::for_image(&h.capture)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.stage, SessionStage::Failed);
    let reason = outcome.reason.unwrap();
    assert!(reason.starts_with("detection failed: UNAVAILABLE"), "{reason}");
    assert!(reason.contains("detector unavailable"));
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
    assert!(outcome.results.images.is_empty());

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn listing_tail_runs_when_requested() {
    let h = harness(false).await;
    let request = PipelineRequest::for_image(&h.capture).with_listing(ListingOptions {
        platforms: vec!["ebay".into()],
        condition: "used".into(),
    });
    let outcome = run(&h, request).await;

    assert!(outcome.success, "{:?}", outcome.reason);
    assert_eq!(outcome.completed.last(), Some(&StageKind::Listing));
    let quotes = outcome.results.pricing.as_ref().unwrap();
    assert_eq!(quotes[0].asking_price(), Some(300.0));
    let listings = outcome.results.listing.as_ref().unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].price, Some(300.0));

    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn listing_not_logged_in_keeps_partial_results() {
    let h = harness(false).await;
    let request = PipelineRequest::for_image(&h.capture).with_listing(ListingOptions {
        platforms: vec!["facebook".into()],
        condition: "used".into(),
    });
    let outcome = run(&h, request).await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.reason.as_deref(),
        Some("listing failed: NOT_LOGGED_IN: facebook session expired")
    );
    assert!(outcome.results.pricing.is_some());
    assert!(outcome.results.images[0].crop.is_some());

    let stats = h.pipeline.orchestrator().stats().await;
    assert_eq!(stats.failed, 1);

    h.pipeline.shutdown().await;
}
