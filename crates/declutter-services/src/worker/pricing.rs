//! Pricing stage: comparable prices per resellable item.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use declutter_types::message::{PriceQuote, PriceSummary, StageKind, StageRequest, StageResult};

use super::{StageWorker, misrouted};
use crate::collaborator::Marketplace;

const DEFAULT_CONDITION: &str = "used";

pub struct PricingWorker {
    marketplace: Arc<dyn Marketplace>,
}

impl PricingWorker {
    pub fn new(marketplace: Arc<dyn Marketplace>) -> Self {
        Self { marketplace }
    }
}

#[async_trait]
impl StageWorker for PricingWorker {
    fn stage(&self) -> StageKind {
        StageKind::Pricing
    }

    async fn process(&self, request: StageRequest) -> StageResult {
        let (job, items) = match request {
            StageRequest::Price { job, items } => (job, items),
            other => return misrouted(self.stage(), other),
        };
        let condition = job
            .listing
            .as_ref()
            .map(|l| l.condition.clone())
            .unwrap_or_else(|| DEFAULT_CONDITION.to_string());

        let mut quotes = Vec::with_capacity(items.len());
        for item in items {
            match self.marketplace.comparables(&item, &condition).await {
                Ok(prices) => {
                    debug!(
                        session_id = %job.session_id,
                        item = %item,
                        comparables = prices.len(),
                        "priced item"
                    );
                    quotes.push(PriceQuote {
                        summary: PriceSummary::from_prices(&prices),
                        item,
                    });
                }
                Err(e) => return StageResult::failed(job, e.into_failure(StageKind::Pricing)),
            }
        }
        info!(session_id = %job.session_id, items = quotes.len(), "pricing complete");
        StageResult::Priced { job, quotes }
    }
}
