//! Listing stage: post every priced item on every requested platform.
//!
//! The first failure stops the stage; its typed kind and message are
//! carried verbatim into the session's failure reason.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use declutter_types::message::{Job, StageKind, StageRequest, StageResult};

use super::{StageWorker, misrouted};
use crate::collaborator::{ListingDraft, Marketplace};

/// The photo `item` was cropped from; the session's last image otherwise.
fn photo_for(job: &Job, item: &str) -> PathBuf {
    job.processed
        .iter()
        .flat_map(|entry| &entry.crops)
        .find(|c| c.class_name.eq_ignore_ascii_case(item))
        .map(|c| c.source.clone())
        .unwrap_or_else(|| job.image.path.clone())
}

pub struct ListingWorker {
    marketplace: Arc<dyn Marketplace>,
}

impl ListingWorker {
    pub fn new(marketplace: Arc<dyn Marketplace>) -> Self {
        Self { marketplace }
    }
}

#[async_trait]
impl StageWorker for ListingWorker {
    fn stage(&self) -> StageKind {
        StageKind::Listing
    }

    async fn process(&self, request: StageRequest) -> StageResult {
        let (job, quotes) = match request {
            StageRequest::List { job, quotes } => (job, quotes),
            other => return misrouted(self.stage(), other),
        };
        let Some(options) = job.listing.clone() else {
            return StageResult::Listed {
                job,
                listings: Vec::new(),
            };
        };

        let mut listings = Vec::new();
        for quote in &quotes {
            for platform in &options.platforms {
                let draft = ListingDraft {
                    item: quote.item.clone(),
                    platform: platform.clone(),
                    condition: options.condition.clone(),
                    price: quote.asking_price(),
                    image_path: Some(photo_for(&job, &quote.item)),
                };
                match self.marketplace.post_listing(&draft).await {
                    Ok(record) => {
                        info!(
                            session_id = %job.session_id,
                            item = %record.item,
                            platform = %record.platform,
                            url = record.url.as_deref().unwrap_or("-"),
                            "listing created"
                        );
                        listings.push(record);
                    }
                    Err(e) => return StageResult::failed(job, e.into_failure(StageKind::Listing)),
                }
            }
        }
        StageResult::Listed { job, listings }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use declutter_types::BoundingBox;
    use declutter_types::message::{
        CropRecord, FailureKind, ImageEntry, ImageRef, ListingOptions, ListingRecord, PriceQuote,
        PriceSummary,
    };

    use super::*;
    use crate::collaborator::CollaboratorError;

    struct Fake;

    #[async_trait]
    impl Marketplace for Fake {
        async fn comparables(&self, _: &str, _: &str) -> Result<Vec<f64>, CollaboratorError> {
            unreachable!()
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
                listing_id: Some("42".into()),
                url: Some(format!("https://{}.example/42", draft.platform)),
                price: draft.price,
            })
        }
    }

    fn request(platforms: &[&str]) -> StageRequest {
        StageRequest::List {
            job: Job::new(
                "s1",
                ImageRef {
                    path: PathBuf::from("a.jpg"),
                    captured_at_ms: 0,
                },
                0,
            )
            .with_listing(Some(ListingOptions {
                platforms: platforms.iter().map(|s| s.to_string()).collect(),
                condition: "used".into(),
            })),
            quotes: vec![PriceQuote {
                item: "laptop".into(),
                summary: PriceSummary::from_prices(&[100.0, 300.0]),
            }],
        }
    }

    #[tokio::test]
    async fn lists_on_every_platform() {
        let w = ListingWorker::new(Arc::new(Fake));
        match w.process(request(&["ebay", "craigslist"])).await {
            StageResult::Listed { listings, .. } => {
                assert_eq!(listings.len(), 2);
                assert_eq!(listings[0].price, Some(200.0));
                assert_eq!(listings[1].platform, "craigslist");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_logged_in_is_preserved_verbatim() {
        let w = ListingWorker::new(Arc::new(Fake));
        match w.process(request(&["ebay", "facebook"])).await {
            StageResult::Failed { failure, .. } => {
                assert_eq!(
                    failure.reason(),
                    "listing failed: NOT_LOGGED_IN: facebook session expired"
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn draft_photo_is_the_source_of_the_crop() {
        let image = |name: &str| ImageRef {
            path: PathBuf::from(name),
            captured_at_ms: 0,
        };
        let chair = CropRecord {
            class_name: "chair".into(),
            source: PathBuf::from("b.jpg"),
            bbox: BoundingBox::new(0, 0, 10, 10),
            expanded: BoundingBox::new(0, 0, 13, 13),
            file_name: "s1_2_1_chair.jpg".into(),
            area: 100,
            border: (3, 3),
        };
        let job = Job::for_batch("s1", vec![image("a.jpg"), image("b.jpg")], 0).unwrap();
        let lamp = CropRecord {
            class_name: "lamp".into(),
            source: PathBuf::from("a.jpg"),
            file_name: "s1_1_1_lamp.jpg".into(),
            ..chair.clone()
        };
        let job = match job.finish_image(ImageEntry {
            crops: vec![lamp],
            ..ImageEntry::empty(image("a.jpg"))
        }) {
            StageRequest::Detect { job } => job,
            other => panic!("unexpected: {other:?}"),
        };
        let job = match job.finish_image(ImageEntry {
            crops: vec![chair],
            ..ImageEntry::empty(image("b.jpg"))
        }) {
            StageRequest::Report { job } => job,
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(photo_for(&job, "lamp"), PathBuf::from("a.jpg"));
        assert_eq!(photo_for(&job, "Chair"), PathBuf::from("b.jpg"));
        assert_eq!(photo_for(&job, "vase"), PathBuf::from("b.jpg"));
    }
}
