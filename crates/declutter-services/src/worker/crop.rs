//! Crop stage: cut each filtered detection out of the source image.

use async_trait::async_trait;
use tracing::info;

use declutter_core::crop::CropEngine;
use declutter_types::message::{FailureKind, StageFailure, StageKind, StageRequest, StageResult};

use super::{StageWorker, misrouted};

pub struct CropWorker {
    engine: CropEngine,
}

impl CropWorker {
    pub fn new(engine: CropEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StageWorker for CropWorker {
    fn stage(&self) -> StageKind {
        StageKind::Crop
    }

    async fn process(&self, request: StageRequest) -> StageResult {
        let (job, filtered, classes) = match request {
            StageRequest::Crop {
                job,
                filtered,
                classes,
            } => (job, filtered, classes),
            other => return misrouted(self.stage(), other),
        };

        let engine = self.engine.clone();
        let session_id = job.session_id.clone();
        let image = job.image.clone();
        let batch =
            tokio::task::spawn_blocking(move || engine.crop_all(&session_id, &image, &filtered))
                .await;

        match batch {
            Ok(batch) => {
                info!(
                    session_id = %job.session_id,
                    crops = batch.crops.len(),
                    omitted = batch.omissions.len(),
                    "crop complete"
                );
                StageResult::Cropped {
                    job,
                    crops: batch.crops,
                    omissions: batch.omissions,
                    classes,
                }
            }
            Err(e) => StageResult::failed(
                job,
                StageFailure::new(
                    StageKind::Crop,
                    FailureKind::Unavailable,
                    format!("crop task aborted: {e}"),
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use image::{Rgb, RgbImage};

    use declutter_types::detection::DetectionSet;
    use declutter_types::geometry::BoundingBox;
    use declutter_types::message::{ImageRef, Job};

    use super::*;

    fn request(path: &Path, filtered: DetectionSet) -> StageRequest {
        StageRequest::Crop {
            job: Job::new(
                "s1",
                ImageRef {
                    path: path.to_path_buf(),
                    captured_at_ms: 7,
                },
                0,
            ),
            filtered,
            classes: vec!["laptop".into(), "bottle".into()],
        }
    }

    #[tokio::test]
    async fn crops_filtered_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("capture.png");
        RgbImage::from_pixel(200, 200, Rgb([1, 2, 3])).save(&src).unwrap();
        let filtered: DetectionSet = [(BoundingBox::new(0, 0, 100, 100), "laptop".to_string())]
            .into_iter()
            .collect();

        let w = CropWorker::new(CropEngine::new(tmp.path().join("crops"), 0.3));
        match w.process(request(&src, filtered)).await {
            StageResult::Cropped { crops, omissions, classes, .. } => {
                assert_eq!(crops.len(), 1);
                assert!(omissions.is_empty());
                assert_eq!(crops[0].file_name, "s1_7_1_laptop.jpg");
                assert!(tmp.path().join("crops").join("s1_7_1_laptop.jpg").exists());
                assert_eq!(classes.len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn nothing_resellable_is_an_empty_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let w = CropWorker::new(CropEngine::new(tmp.path().join("crops"), 0.3));
        match w.process(request(&tmp.path().join("missing.png"), DetectionSet::new())).await {
            StageResult::Cropped { crops, omissions, .. } => {
                assert!(crops.is_empty());
                assert!(omissions.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
