//! Detection stage: run the object detector and keep hits above threshold.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use declutter_types::detection::DetectionSet;
use declutter_types::message::{StageKind, StageRequest, StageResult};

use super::{StageWorker, misrouted};
use crate::collaborator::ObjectDetector;

pub struct DetectionWorker {
    detector: Arc<dyn ObjectDetector>,
    confidence_threshold: f32,
}

impl DetectionWorker {
    pub fn new(detector: Arc<dyn ObjectDetector>, confidence_threshold: f32) -> Self {
        Self {
            detector,
            confidence_threshold,
        }
    }
}

#[async_trait]
impl StageWorker for DetectionWorker {
    fn stage(&self) -> StageKind {
        StageKind::Detection
    }

    async fn process(&self, request: StageRequest) -> StageResult {
        let job = match request {
            StageRequest::Detect { job } => job,
            other => return misrouted(self.stage(), other),
        };
        match self.detector.detect(&job.image, self.confidence_threshold).await {
            Ok(hits) => {
                let detections = DetectionSet::from_detections(&hits, self.confidence_threshold);
                info!(
                    session_id = %job.session_id,
                    image = job.image_index() + 1,
                    raw = hits.len(),
                    kept = detections.len(),
                    "detection complete"
                );
                StageResult::Detected { job, detections }
            }
            Err(e) => StageResult::failed(job, e.into_failure(StageKind::Detection)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use declutter_types::detection::Detection;
    use declutter_types::geometry::BoundingBox;
    use declutter_types::message::{FailureKind, ImageRef, Job};

    use super::*;
    use crate::collaborator::CollaboratorError;

    struct Fake(Result<Vec<Detection>, CollaboratorError>);

    #[async_trait]
    impl ObjectDetector for Fake {
        async fn detect(&self, _: &ImageRef, _: f32) -> Result<Vec<Detection>, CollaboratorError> {
            self.0.clone()
        }
    }

    fn request() -> StageRequest {
        StageRequest::Detect {
            job: Job::new(
                "s1",
                ImageRef {
                    path: PathBuf::from("a.jpg"),
                    captured_at_ms: 0,
                },
                0,
            ),
        }
    }

    fn hit(label: &str, conf: f32) -> Detection {
        Detection {
            label: label.into(),
            bbox: BoundingBox::new(0, 0, 10, (conf * 100.0) as i64),
            confidence: conf,
        }
    }

    #[tokio::test]
    async fn drops_low_confidence() {
        let hits = vec![hit("cup", 0.9), hit("pen", 0.1)];
        let w = DetectionWorker::new(Arc::new(Fake(Ok(hits))), 0.25);
        match w.process(request()).await {
            StageResult::Detected { detections, .. } => {
                assert_eq!(detections.len(), 1);
                assert_eq!(detections.unique_classes(), vec!["cup"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn detector_error_becomes_failure() {
        let err = CollaboratorError::unavailable("detector unavailable: model not loaded");
        let w = DetectionWorker::new(Arc::new(Fake(Err(err))), 0.25);
        match w.process(request()).await {
            StageResult::Failed { failure, .. } => {
                assert_eq!(failure.stage, StageKind::Detection);
                assert_eq!(failure.kind, FailureKind::Unavailable);
                assert!(failure.reason().contains("detector unavailable"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
