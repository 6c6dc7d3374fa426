//! Stage trackers.
//!
//! Each tracker is a pure reducer `(Session, StageResult) -> Reduction`.
//! Trackers never touch the store, the bus, or the filesystem; the
//! orchestrator applies their output. The `next` request in an
//! [`Reduction::Advanced`] is the one the producing worker is expected to
//! emit; the session's stage is moved to that request's running stage so
//! the next result is accepted and stale ones are not.
//!
//! Detect, evaluate and crop results land in the per-image slot of the
//! image they were produced for. A result for any other image of the
//! batch is stale.

use tracing::{debug, warn};

use declutter_types::detection::{DetectionSet, ResellableSet};
use declutter_types::message::{
    CropOmission, CropRecord, ListingRecord, PriceQuote, StageKind, StageRequest, StageResult,
};
use declutter_types::session::{
    CropSummary, DetectionSummary, EvaluationSummary, ImageResults, ReportSummary, Session,
    SessionStage,
};

/// Outcome of reducing one stage result into a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    /// The result was merged. `next` is `None` when the pipeline stops
    /// here by design and the session should be finalised as DONE.
    Advanced {
        session: Session,
        next: Option<StageRequest>,
    },
    /// A stage failure: finalise FAILED with `reason`.
    Failed { reason: String },
    /// Dropped without effect (stale, duplicate, or rejected input).
    Ignored { reason: String },
}

/// Reduce `result` into `session`.
pub fn reduce(session: &Session, result: &StageResult) -> Reduction {
    if session.is_terminal() {
        return ignored(format!("session already {}", session.stage));
    }
    if session.stage.awaiting() != Some(result.stage()) {
        return ignored(format!(
            "{} result while session is {}",
            result.stage(),
            session.stage
        ));
    }
    if !for_current_image(session, result) {
        return ignored(format!(
            "{} result for image {} is stale",
            result.stage(),
            result.job().image_index() + 1
        ));
    }

    match result {
        StageResult::Detected { detections, .. } => detection(session, result, detections),
        StageResult::Evaluated { resellable, .. } => evaluation(session, result, resellable),
        StageResult::Cropped {
            crops, omissions, ..
        } => crop(session, result, crops, omissions),
        StageResult::Reported {
            report_path, items, ..
        } => report(session, result, report_path, items),
        StageResult::Priced { quotes, .. } => pricing(session, result, quotes),
        StageResult::Listed { listings, .. } => listing(session, result, listings),
        StageResult::Failed { failure, .. } => Reduction::Failed {
            reason: failure.reason(),
        },
    }
}

/// Detection opens a new image slot; evaluation and crop fill the open one.
fn for_current_image(session: &Session, result: &StageResult) -> bool {
    let index = result.job().image_index();
    let opened = session.results.images.len();
    match result.stage() {
        StageKind::Detection => index == opened,
        StageKind::Evaluation | StageKind::Crop => index + 1 == opened,
        StageKind::Report | StageKind::Pricing | StageKind::Listing => true,
    }
}

/// Detection: reject an empty set unless the batch can move on without
/// this image; otherwise record raw detections, the largest instance per
/// class and the unique class list.
pub fn detection(
    session: &Session,
    result: &StageResult,
    detections: &DetectionSet,
) -> Reduction {
    let image = result.job().image.clone();
    if detections.is_empty() {
        if result.continuation().is_none() {
            warn!(session_id = %session.id, "nothing detected");
            return ignored("nothing detected".into());
        }
        warn!(
            session_id = %session.id,
            image = %image.file_name(),
            "nothing detected, image skipped"
        );
    }
    let largest = detections.largest_instances();
    let unique_classes = largest.unique_classes();
    debug!(
        session_id = %session.id,
        detections = detections.len(),
        classes = unique_classes.len(),
        "detection merged"
    );
    advance(session, result, StageKind::Detection, |s| {
        let mut slot = ImageResults::new(image);
        slot.detection = Some(DetectionSummary {
            detections: detections.clone(),
            largest,
            unique_classes,
        });
        s.results.images.push(slot);
    })
}

/// Evaluation: intersect the classifier's verdict with the detection set
/// stored for the image. An empty intersection is not a failure; the
/// session moves on to cropping with zero entries.
pub fn evaluation(
    session: &Session,
    result: &StageResult,
    resellable: &ResellableSet,
) -> Reduction {
    let Some(detected) = session
        .results
        .current_image()
        .and_then(|img| img.detection.as_ref())
    else {
        return ignored("evaluation without a recorded detection".into());
    };
    let filtered = detected.largest.filter_resellable(resellable);
    if filtered.is_empty() {
        debug!(session_id = %session.id, "no resellable items");
    }
    advance(session, result, StageKind::Evaluation, |s| {
        if let Some(slot) = s.results.images.last_mut() {
            slot.evaluation = Some(EvaluationSummary {
                resellable: resellable.clone(),
                filtered,
            });
        }
    })
}

/// Crop: per-item failures are carried as omissions.
pub fn crop(
    session: &Session,
    result: &StageResult,
    crops: &[CropRecord],
    omissions: &[CropOmission],
) -> Reduction {
    for o in omissions {
        warn!(
            session_id = %session.id,
            class = %o.class_name,
            reason = %o.reason,
            "crop omitted"
        );
    }
    advance(session, result, StageKind::Crop, |s| {
        if let Some(slot) = s.results.images.last_mut() {
            slot.crop = Some(CropSummary {
                crops: crops.to_vec(),
                omissions: omissions.to_vec(),
            });
        }
    })
}

pub fn report(
    session: &Session,
    result: &StageResult,
    path: &std::path::Path,
    items: &[String],
) -> Reduction {
    advance(session, result, StageKind::Report, |s| {
        s.results.report = Some(ReportSummary {
            path: path.to_path_buf(),
            items: items.to_vec(),
        });
    })
}

pub fn pricing(session: &Session, result: &StageResult, quotes: &[PriceQuote]) -> Reduction {
    advance(session, result, StageKind::Pricing, |s| {
        s.results.pricing = Some(quotes.to_vec());
    })
}

pub fn listing(session: &Session, result: &StageResult, listings: &[ListingRecord]) -> Reduction {
    advance(session, result, StageKind::Listing, |s| {
        s.results.listing = Some(listings.to_vec());
    })
}

fn advance(
    session: &Session,
    result: &StageResult,
    done: StageKind,
    merge: impl FnOnce(&mut Session),
) -> Reduction {
    let mut next_session = session.clone();
    merge(&mut next_session);
    next_session.complete(done);
    let next = result.continuation();
    if let Some(req) = &next {
        next_session.stage = SessionStage::running(req.stage());
    }
    Reduction::Advanced {
        session: next_session,
        next,
    }
}

fn ignored(reason: String) -> Reduction {
    Reduction::Ignored { reason }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use declutter_types::geometry::BoundingBox;
    use declutter_types::message::{FailureKind, ImageRef, Job, ListingOptions, StageFailure};

    use super::*;

    fn image(name: &str) -> ImageRef {
        ImageRef {
            path: PathBuf::from(name),
            captured_at_ms: 0,
        }
    }

    fn job(listing: bool) -> Job {
        Job::new("s1", image("capture.jpg"), 0).with_listing(listing.then(|| ListingOptions {
            platforms: vec!["ebay".into()],
            condition: "used".into(),
        }))
    }

    fn session_at(stage: SessionStage, listing: bool) -> Session {
        let mut s = Session::new(job(listing));
        s.stage = stage;
        s
    }

    fn detections() -> DetectionSet {
        [
            (BoundingBox::new(0, 0, 100, 100), "laptop".to_string()),
            (BoundingBox::new(0, 0, 50, 50), "laptop".to_string()),
            (BoundingBox::new(10, 10, 30, 30), "bottle".to_string()),
        ]
        .into_iter()
        .collect()
    }

    /// A session that has merged `detections()` for its first image.
    fn detected_session() -> Session {
        let s = session_at(SessionStage::Detecting, false);
        let r = StageResult::Detected {
            job: job(false),
            detections: detections(),
        };
        match reduce(&s, &r) {
            Reduction::Advanced { session, .. } => session,
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn advanced(reduction: Reduction) -> (Session, Option<StageRequest>) {
        match reduction {
            Reduction::Advanced { session, next } => (session, next),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn detection_advances_to_evaluation() {
        let session = detected_session();
        assert_eq!(session.stage, SessionStage::Evaluating);
        assert_eq!(session.completed, vec![StageKind::Detection]);
        let summary = session.results.images[0].detection.clone().unwrap();
        assert_eq!(summary.largest.len(), 2);
        assert_eq!(summary.unique_classes, vec!["laptop", "bottle"]);
    }

    #[test]
    fn empty_detection_is_rejected_without_advancing() {
        let s = session_at(SessionStage::Detecting, false);
        let r = StageResult::Detected {
            job: job(false),
            detections: DetectionSet::new(),
        };
        assert!(matches!(
            reduce(&s, &r),
            Reduction::Ignored { reason } if reason == "nothing detected"
        ));
    }

    #[test]
    fn zero_resellable_still_crops() {
        let r = StageResult::Evaluated {
            job: job(false),
            candidates: detections().largest_instances(),
            resellable: ResellableSet::default(),
        };
        let (session, next) = advanced(reduce(&detected_session(), &r));
        assert_eq!(session.stage, SessionStage::Cropping);
        let slot = &session.results.images[0];
        assert!(slot.evaluation.as_ref().unwrap().filtered.is_empty());
        assert_eq!(next.map(|n| n.stage()), Some(StageKind::Crop));
    }

    #[test]
    fn evaluation_intersects_the_stored_detections() {
        // The message's candidates disagree with what detection recorded.
        let r = StageResult::Evaluated {
            job: job(false),
            candidates: [(BoundingBox::new(1, 1, 9, 9), "mug".to_string())]
                .into_iter()
                .collect(),
            resellable: ResellableSet::from_labels(["Laptop", "mug"]),
        };
        let (session, _) = advanced(reduce(&detected_session(), &r));
        let filtered = &session.results.images[0].evaluation.as_ref().unwrap().filtered;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.label_of(&BoundingBox::new(0, 0, 100, 100)), Some("laptop"));
    }

    #[test]
    fn evaluation_without_detection_is_ignored() {
        let s = session_at(SessionStage::Evaluating, false);
        let r = StageResult::Evaluated {
            job: job(false),
            candidates: detections(),
            resellable: ResellableSet::from_labels(["laptop"]),
        };
        assert!(matches!(reduce(&s, &r), Reduction::Ignored { .. }));
    }

    #[test]
    fn batch_loops_back_to_detection_then_reports() {
        let batch = Job::for_batch("s1", vec![image("a.jpg"), image("b.jpg")], 0).unwrap();
        let mut s = Session::new(batch.clone());
        s.stage = SessionStage::Detecting;

        let (s, _) = advanced(reduce(
            &s,
            &StageResult::Detected {
                job: batch.clone(),
                detections: detections(),
            },
        ));
        let (s, _) = advanced(reduce(
            &s,
            &StageResult::Evaluated {
                job: batch.clone(),
                candidates: detections().largest_instances(),
                resellable: ResellableSet::from_labels(["laptop"]),
            },
        ));
        let cropped = StageResult::Cropped {
            job: batch.clone(),
            crops: vec![],
            omissions: vec![],
            classes: vec!["laptop".into(), "bottle".into()],
        };
        let (s, next) = advanced(reduce(&s, &cropped));
        assert_eq!(s.stage, SessionStage::Detecting);
        let second = match next {
            Some(StageRequest::Detect { job }) => job,
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(second.image.file_name(), "b.jpg");

        // A replayed detection for the first image is stale now.
        let replay = StageResult::Detected {
            job: batch,
            detections: detections(),
        };
        assert!(matches!(reduce(&s, &replay), Reduction::Ignored { .. }));

        // Nothing in the last image: the batch still reports.
        let (s, next) = advanced(reduce(
            &s,
            &StageResult::Detected {
                job: second,
                detections: DetectionSet::new(),
            },
        ));
        assert_eq!(s.stage, SessionStage::Reporting);
        assert_eq!(s.results.images.len(), 2);
        match next {
            Some(StageRequest::Report { job }) => assert_eq!(job.processed.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn report_without_listing_ends_pipeline() {
        let s = session_at(SessionStage::Reporting, false);
        let r = StageResult::Reported {
            job: job(false),
            report_path: PathBuf::from("s1_analysis_report.txt"),
            items: vec!["laptop".into()],
        };
        let (session, next) = advanced(reduce(&s, &r));
        assert!(next.is_none());
        assert_eq!(session.stage, SessionStage::Reporting);
        assert!(session.completed.contains(&StageKind::Report));
    }

    #[test]
    fn report_with_listing_moves_to_pricing() {
        let s = session_at(SessionStage::Reporting, true);
        let r = StageResult::Reported {
            job: job(true),
            report_path: PathBuf::from("r.txt"),
            items: vec!["laptop".into()],
        };
        let (session, _) = advanced(reduce(&s, &r));
        assert_eq!(session.stage, SessionStage::Pricing);
    }

    #[test]
    fn duplicate_result_is_ignored() {
        let s = session_at(SessionStage::Cropping, false);
        let dup = StageResult::Detected {
            job: job(false),
            detections: detections(),
        };
        assert!(matches!(reduce(&s, &dup), Reduction::Ignored { .. }));
    }

    #[test]
    fn terminal_session_ignores_everything() {
        let s = session_at(SessionStage::Done, false);
        let r = StageResult::failed(
            job(false),
            StageFailure::new(StageKind::Detection, FailureKind::Timeout, "late"),
        );
        assert!(matches!(reduce(&s, &r), Reduction::Ignored { .. }));
    }

    #[test]
    fn failure_for_awaited_stage_fails() {
        let s = session_at(SessionStage::Detecting, false);
        let r = StageResult::failed(
            job(false),
            StageFailure::new(
                StageKind::Detection,
                FailureKind::Unavailable,
                "detector unavailable",
            ),
        );
        match reduce(&s, &r) {
            Reduction::Failed { reason } => {
                assert_eq!(reason, "detection failed: UNAVAILABLE: detector unavailable")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn crop_records_omissions() {
        let mut s = detected_session();
        s.stage = SessionStage::Cropping;
        let omission = CropOmission {
            class_name: "laptop".into(),
            bbox: BoundingBox::new(5, 5, 5, 5),
            reason: "degenerate box".into(),
        };
        let r = StageResult::Cropped {
            job: job(false),
            crops: vec![],
            omissions: vec![omission.clone()],
            classes: vec!["laptop".into()],
        };
        let (session, next) = advanced(reduce(&s, &r));
        let slot = &session.results.images[0];
        assert_eq!(slot.crop.as_ref().unwrap().omissions, vec![omission]);
        assert_eq!(next.map(|n| n.stage()), Some(StageKind::Report));
    }
}
