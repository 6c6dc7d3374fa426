//! Vision-model resale classifier.
//!
//! Sends the captured image and the candidate class names to an
//! OpenAI-compatible chat-completions endpoint and asks for the subset
//! worth reselling, as a JSON array of strings.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use declutter_types::config::ClassifierConfig;
use declutter_types::detection::ResellableSet;
use declutter_types::message::{FailureKind, ImageRef};

use super::{CollaboratorError, ResaleClassifier, encode_image, http_client};

const SERVICE: &str = "classifier";

fn build_prompt(candidates: &[String]) -> String {
    format!(
        "You are an expert in decluttering and second-hand resale. \
         These generic objects were detected in the image: {candidates:?}. \
         Look at the image and decide which of them are worth the effort of reselling. \
         Be permissive: include functional electronics (for example laptop or keyboard), \
         quality bags, and anything that looks branded or in excellent condition. \
         Answer with a JSON array of names taken from the list above, for example \
         [\"laptop\", \"handbag\", \"book\"]. Do not add any other text."
    )
}

/// Parse the model's reply into a resellable set.
///
/// Accepts a bare JSON array of strings, optionally inside a Markdown code
/// fence. Anything else yields an empty set.
pub fn parse_resellable(reply: &str) -> ResellableSet {
    let trimmed = strip_fence(reply.trim());
    match serde_json::from_str::<Vec<String>>(trimmed) {
        Ok(labels) => ResellableSet::from_labels(labels),
        Err(e) => {
            warn!(error = %e, reply = %reply, "classifier reply is not a list of names");
            ResellableSet::default()
        }
    }
}

fn strip_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Resale classifier backed by a vision chat model.
pub struct VisionClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
    api_key: Option<String>,
}

impl VisionClassifier {
    /// Key is read from the environment variable named in the config.
    pub fn new(config: ClassifierConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: ClassifierConfig, api_key: Option<String>) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            config,
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ResaleClassifier for VisionClassifier {
    async fn classify(
        &self,
        image: &ImageRef,
        candidates: &[String],
    ) -> Result<ResellableSet, CollaboratorError> {
        if candidates.is_empty() {
            return Ok(ResellableSet::default());
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(CollaboratorError::new(
                FailureKind::NotLoggedIn,
                format!("classifier API key not set (env {})", self.config.api_key_env),
            ));
        };

        let (mime, data) = encode_image(image).await?;
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": build_prompt(candidates) },
                    { "type": "image_url", "image_url": { "url": format!("data:{mime};base64,{data}") } }
                ]
            }]
        });

        debug!(model = %self.config.model, candidates = candidates.len(), "sending classification request");
        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::from_status(SERVICE, status, &text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            CollaboratorError::invalid_response(format!("classifier response unreadable: {e}"))
        })?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(reply = %reply, "classifier replied");
        Ok(parse_resellable(&reply))
    }
}
