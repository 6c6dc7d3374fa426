//! Marketplace service client: price research and listing creation.
//!
//! Both endpoints answer `200` with a `success` flag. A `success: false`
//! body may carry an `error_type` (one of the [`FailureKind`] names) and an
//! `error_message`; without a type the failure is an `HTTP_ERROR`.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use declutter_types::config::MarketplaceConfig;
use declutter_types::message::{FailureKind, ListingRecord};

use super::{CollaboratorError, ListingDraft, Marketplace, http_client};

const SERVICE: &str = "marketplace";

#[derive(Serialize)]
struct ResearchBody<'a> {
    product_name: &'a str,
    condition_filter: &'a str,
    limit: u32,
}

#[derive(Deserialize)]
struct Comparable {
    price: f64,
}

#[derive(Deserialize)]
struct ResearchResponse {
    success: bool,
    #[serde(default)]
    comps: Vec<Comparable>,
    #[serde(default)]
    error_type: Option<FailureKind>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Serialize)]
struct ProductInfo<'a> {
    name: &'a str,
    condition: &'a str,
}

#[derive(Serialize)]
struct ListingBody<'a> {
    product: ProductInfo<'a>,
    platform: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    images: Vec<String>,
}

#[derive(Deserialize)]
struct ListingResponse {
    success: bool,
    #[serde(default)]
    listing_url: Option<String>,
    #[serde(default)]
    listing_id: Option<String>,
    #[serde(default)]
    error_type: Option<FailureKind>,
    #[serde(default)]
    error_message: Option<String>,
}

fn rejected(what: &str, kind: Option<FailureKind>, message: Option<String>) -> CollaboratorError {
    CollaboratorError::new(
        kind.unwrap_or(FailureKind::HttpError),
        message.unwrap_or_else(|| format!("{what} rejected by marketplace")),
    )
}

pub struct HttpMarketplace {
    client: reqwest::Client,
    base_url: String,
    max_comparables: u32,
}

impl HttpMarketplace {
    pub fn new(config: &MarketplaceConfig) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_comparables: config.max_comparables,
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, CollaboratorError> {
        let url = format!("{}/{endpoint}", self.base_url);
        debug!(url = %url, "marketplace request");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::from_status(SERVICE, status, &text));
        }
        response.json().await.map_err(|e| {
            CollaboratorError::invalid_response(format!("marketplace response unreadable: {e}"))
        })
    }
}

#[async_trait]
impl Marketplace for HttpMarketplace {
    async fn comparables(
        &self,
        item: &str,
        condition: &str,
    ) -> Result<Vec<f64>, CollaboratorError> {
        let resp: ResearchResponse = self
            .post(
                "research",
                &ResearchBody {
                    product_name: item,
                    condition_filter: condition,
                    limit: self.max_comparables,
                },
            )
            .await?;
        if !resp.success {
            return Err(rejected("price research", resp.error_type, resp.error_message));
        }
        Ok(resp
            .comps
            .into_iter()
            .map(|c| c.price)
            .filter(|p| p.is_finite() && *p > 0.0)
            .collect())
    }

    async fn post_listing(&self, draft: &ListingDraft) -> Result<ListingRecord, CollaboratorError> {
        let mut images = Vec::new();
        if let Some(path) = &draft.image_path {
            match tokio::fs::read(path).await {
                Ok(bytes) => images.push(base64::engine::general_purpose::STANDARD.encode(bytes)),
                Err(e) => debug!(path = %path.display(), error = %e, "listing image unreadable, posting without it"),
            }
        }
        let resp: ListingResponse = self
            .post(
                "listings",
                &ListingBody {
                    product: ProductInfo {
                        name: &draft.item,
                        condition: &draft.condition,
                    },
                    platform: &draft.platform,
                    price: draft.price,
                    images,
                },
            )
            .await?;
        if !resp.success {
            return Err(rejected(
                &format!("{} listing", draft.platform),
                resp.error_type,
                resp.error_message,
            ));
        }
        Ok(ListingRecord {
            item: draft.item.clone(),
            platform: draft.platform.clone(),
            listing_id: resp.listing_id,
            url: resp.listing_url,
            price: draft.price,
        })
    }
}
