//! HTTP object detector client.
//!
//! `POST {base_url}/detect` with a JSON body carrying the base64 image.
//! Two response shapes are accepted:
//!
//! ```json
//! {"detections": [{"label": "laptop", "bbox": [0, 0, 100, 100], "confidence": 0.91}]}
//! {"objects": {"(0, 0, 100, 100)": "laptop"}}
//! ```
//!
//! The keyed form has no confidences; every entry is taken at 1.0.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use declutter_types::config::DetectorConfig;
use declutter_types::detection::{Detection, DetectionSet};
use declutter_types::geometry::BoundingBox;
use declutter_types::message::ImageRef;

use super::{CollaboratorError, ObjectDetector, encode_image, http_client};

const SERVICE: &str = "detector";

#[derive(Serialize)]
struct DetectBody<'a> {
    model: &'a str,
    image: String,
    mime_type: &'a str,
    confidence: f32,
}

#[derive(Deserialize)]
struct RawDetection {
    label: String,
    bbox: [f64; 4],
    #[serde(default = "one")]
    confidence: f32,
}

fn one() -> f32 {
    1.0
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Option<Vec<RawDetection>>,
    #[serde(default)]
    objects: Option<BTreeMap<String, String>>,
}

/// Object detector reached over HTTP.
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        }
    }

    fn detect_url(&self) -> String {
        format!("{}/detect", self.base_url.trim_end_matches('/'))
    }
}

/// Turn a decoded response body into detections.
fn into_detections(resp: DetectResponse) -> Result<Vec<Detection>, CollaboratorError> {
    if let Some(raw) = resp.detections {
        return raw
            .into_iter()
            .map(|d| {
                let bbox = BoundingBox::try_from_f64(d.bbox).ok_or_else(|| {
                    CollaboratorError::invalid_response(format!(
                        "detector returned out-of-range box {:?} for {:?}",
                        d.bbox, d.label
                    ))
                })?;
                Ok(Detection {
                    label: d.label,
                    bbox,
                    confidence: d.confidence,
                })
            })
            .collect();
    }
    if let Some(objects) = resp.objects {
        let (set, _failures) = DetectionSet::from_keyed(objects);
        return Ok(set
            .iter()
            .map(|b| Detection {
                label: b.label.clone(),
                bbox: b.bbox,
                confidence: 1.0,
            })
            .collect());
    }
    Err(CollaboratorError::invalid_response(
        "detector response has neither `detections` nor `objects`",
    ))
}

#[async_trait]
impl ObjectDetector for HttpDetector {
    async fn detect(
        &self,
        image: &ImageRef,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, CollaboratorError> {
        let (mime_type, data) = encode_image(image).await?;
        let body = DetectBody {
            model: &self.model,
            image: data,
            mime_type,
            confidence: confidence_threshold,
        };

        debug!(url = %self.detect_url(), image = %image.path.display(), "sending detection request");
        let response = self
            .client
            .post(self.detect_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::from_status(SERVICE, status, &text));
        }

        let parsed: DetectResponse = response.json().await.map_err(|e| {
            CollaboratorError::invalid_response(format!("detector response unreadable: {e}"))
        })?;
        into_detections(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Vec<Detection>, CollaboratorError> {
        into_detections(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn structured_response() {
        let out = parse(
            r#"{"detections": [{"label": "laptop", "bbox": [0.9, 0, 100.7, 100], "confidence": 0.9}]}"#,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, BoundingBox::new(0, 0, 100, 100));
        assert_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn out_of_range_coordinates_are_invalid() {
        let err = parse(
            r#"{"detections": [
                {"label": "laptop", "bbox": [0, 0, 5, 5]},
                {"label": "laptop", "bbox": [-1e30, 0, 1e30, 10]}
            ]}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, declutter_types::message::FailureKind::InvalidResponse);
        assert!(err.message.contains("out-of-range"));
    }

    #[test]
    fn keyed_response_skips_bad_keys() {
        let out = parse(r#"{"objects": {"(0, 0, 10, 10)": "cup", "nonsense": "bowl"}}"#).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "cup");
        assert_eq!(out[0].confidence, 1.0);
    }

    #[test]
    fn empty_body_is_invalid() {
        let err = parse("{}").unwrap_err();
        assert_eq!(err.kind, declutter_types::message::FailureKind::InvalidResponse);
        assert!(err.message.contains("detector"));
    }

    #[test]
    fn url_trims_trailing_slash() {
        let det = HttpDetector::new(&DetectorConfig {
            base_url: "http://x:1/".into(),
            ..DetectorConfig::default()
        });
        assert_eq!(det.detect_url(), "http://x:1/detect");
    }
}
