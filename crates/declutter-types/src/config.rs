//! Configuration schema types.
//!
//! All structs accept both `snake_case` and `camelCase` field names in JSON
//! via `#[serde(alias)]`. Every field has a default and unknown fields are
//! ignored, so an empty object `{}` is a complete configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeclutterError;
use crate::message::StageKind;

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for the declutter pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Logical stage name to worker address.
    #[serde(default)]
    pub routing: RoutingTable,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub marketplace: MarketplaceConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), DeclutterError> {
        self.routing.validate()?;
        let p = &self.pipeline;
        if p.sweep_interval_secs == 0 {
            return Err(invalid("pipeline.sweep_interval_secs must be > 0"));
        }
        if p.stall_timeout_secs == 0 {
            return Err(invalid("pipeline.stall_timeout_secs must be > 0"));
        }
        if !(0.0..=1.0).contains(&p.border_fraction) {
            return Err(invalid("pipeline.border_fraction must be within 0.0..=1.0"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(invalid("detector.confidence_threshold must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> DeclutterError {
    DeclutterError::ConfigInvalid {
        reason: reason.to_string(),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Session lifecycle and bus tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Non-terminal sessions older than this are failed as "stalled".
    #[serde(default = "default_stall_timeout", alias = "stallTimeoutSecs")]
    pub stall_timeout_secs: u64,

    /// Terminal sessions older than this are removed from the store.
    #[serde(default = "default_completed_grace", alias = "completedGraceSecs")]
    pub completed_grace_secs: u64,

    #[serde(default = "default_sweep_interval", alias = "sweepIntervalSecs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_message_ttl", alias = "messageTtlSecs")]
    pub message_ttl_secs: u64,

    #[serde(default = "default_inbox_capacity", alias = "inboxCapacity")]
    pub inbox_capacity: usize,

    /// Crop dilation as a fraction of the box's own width/height per side.
    #[serde(default = "default_border_fraction", alias = "borderFraction")]
    pub border_fraction: f64,
}

fn default_stall_timeout() -> u64 {
    300
}
fn default_completed_grace() -> u64 {
    600
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_message_ttl() -> u64 {
    300
}
fn default_inbox_capacity() -> usize {
    256
}
fn default_border_fraction() -> f64 {
    0.3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stall_timeout_secs: default_stall_timeout(),
            completed_grace_secs: default_completed_grace(),
            sweep_interval_secs: default_sweep_interval(),
            message_ttl_secs: default_message_ttl(),
            inbox_capacity: default_inbox_capacity(),
            border_fraction: default_border_fraction(),
        }
    }
}

impl PipelineConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
    pub fn completed_grace(&self) -> Duration {
        Duration::from_secs(self.completed_grace_secs)
    }
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }
}

// ── Storage ──────────────────────────────────────────────────────────────

/// On-disk locations for uploads, crops and reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir", alias = "uploadDir")]
    pub upload_dir: String,

    #[serde(default = "default_crop_dir", alias = "cropDir")]
    pub crop_dir: String,

    #[serde(default = "default_report_dir", alias = "reportDir")]
    pub report_dir: String,

    #[serde(default = "default_max_upload_bytes", alias = "maxUploadBytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_allowed_extensions", alias = "allowedExtensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_upload_dir() -> String {
    "~/.declutter/uploads".into()
}
fn default_crop_dir() -> String {
    "~/.declutter/cropped_resellables".into()
}
fn default_report_dir() -> String {
    "~/.declutter/reports".into()
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    vec!["jpg".into(), "jpeg".into(), "png".into()]
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            crop_dir: default_crop_dir(),
            report_dir: default_report_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl StorageConfig {
    pub fn upload_path(&self) -> PathBuf {
        expand_home(&self.upload_dir)
    }
    pub fn crop_path(&self) -> PathBuf {
        expand_home(&self.crop_dir)
    }
    pub fn report_path(&self) -> PathBuf {
        expand_home(&self.report_dir)
    }
}

// ── Routing ──────────────────────────────────────────────────────────────

/// Worker addresses on the bus, resolved once at startup and passed to
/// every component that sends messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    #[serde(default = "default_coordinator_addr")]
    pub coordinator: String,
    #[serde(default = "default_detector_addr")]
    pub detector: String,
    #[serde(default = "default_evaluator_addr")]
    pub evaluator: String,
    #[serde(default = "default_processor_addr")]
    pub processor: String,
    #[serde(default = "default_reporter_addr")]
    pub reporter: String,
    #[serde(default = "default_pricer_addr")]
    pub pricer: String,
    #[serde(default = "default_lister_addr")]
    pub lister: String,
}

fn default_coordinator_addr() -> String {
    "coordinator".into()
}
fn default_detector_addr() -> String {
    "detector".into()
}
fn default_evaluator_addr() -> String {
    "evaluator".into()
}
fn default_processor_addr() -> String {
    "processor".into()
}
fn default_reporter_addr() -> String {
    "reporter".into()
}
fn default_pricer_addr() -> String {
    "pricer".into()
}
fn default_lister_addr() -> String {
    "lister".into()
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            coordinator: default_coordinator_addr(),
            detector: default_detector_addr(),
            evaluator: default_evaluator_addr(),
            processor: default_processor_addr(),
            reporter: default_reporter_addr(),
            pricer: default_pricer_addr(),
            lister: default_lister_addr(),
        }
    }
}

impl RoutingTable {
    /// Address of the worker that handles requests of `stage`.
    pub fn address_for(&self, stage: StageKind) -> &str {
        match stage {
            StageKind::Detection => &self.detector,
            StageKind::Evaluation => &self.evaluator,
            StageKind::Crop => &self.processor,
            StageKind::Report => &self.reporter,
            StageKind::Pricing => &self.pricer,
            StageKind::Listing => &self.lister,
        }
    }

    fn all(&self) -> [(&'static str, &str); 7] {
        [
            ("coordinator", &self.coordinator),
            ("detector", &self.detector),
            ("evaluator", &self.evaluator),
            ("processor", &self.processor),
            ("reporter", &self.reporter),
            ("pricer", &self.pricer),
            ("lister", &self.lister),
        ]
    }

    /// Every address must be non-empty and distinct.
    pub fn validate(&self) -> Result<(), DeclutterError> {
        let all = self.all();
        for (i, (name, addr)) in all.iter().enumerate() {
            if addr.trim().is_empty() {
                return Err(invalid(&format!("routing.{name} must not be empty")));
            }
            if let Some((other, _)) = all[..i].iter().find(|(_, a)| a == addr) {
                return Err(invalid(&format!(
                    "routing.{name} duplicates routing.{other} ({addr})"
                )));
            }
        }
        Ok(())
    }
}

// ── Collaborators ────────────────────────────────────────────────────────

/// Object detector HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_url", alias = "baseUrl")]
    pub base_url: String,

    #[serde(default = "default_detector_model")]
    pub model: String,

    #[serde(default = "default_confidence", alias = "confidenceThreshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_detector_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,
}

fn default_detector_url() -> String {
    "http://127.0.0.1:8001".into()
}
fn default_detector_model() -> String {
    "yolov8n".into()
}
fn default_confidence() -> f32 {
    0.25
}
fn default_detector_timeout() -> u64 {
    30
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_detector_url(),
            model: default_detector_model(),
            confidence_threshold: default_confidence(),
            timeout_secs: default_detector_timeout(),
        }
    }
}

/// Vision model used as the resale-worthiness classifier.
///
/// Speaks the OpenAI-compatible chat-completions protocol. The API key is
/// read from the environment variable named by `api_key_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_url", alias = "baseUrl")]
    pub base_url: String,

    #[serde(default = "default_classifier_model")]
    pub model: String,

    #[serde(default = "default_api_key_env", alias = "apiKeyEnv")]
    pub api_key_env: String,

    #[serde(default = "default_classifier_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,

    #[serde(default = "default_classifier_max_tokens", alias = "maxTokens")]
    pub max_tokens: u32,
}

fn default_classifier_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".into()
}
fn default_classifier_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_classifier_timeout() -> u64 {
    60
}
fn default_classifier_max_tokens() -> u32 {
    512
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_classifier_url(),
            model: default_classifier_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_classifier_timeout(),
            max_tokens: default_classifier_max_tokens(),
        }
    }
}

/// Price research and listing HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    #[serde(default = "default_marketplace_url", alias = "baseUrl")]
    pub base_url: String,

    #[serde(default = "default_marketplace_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_comparables", alias = "maxComparables")]
    pub max_comparables: u32,
}

fn default_marketplace_url() -> String {
    "http://127.0.0.1:8002".into()
}
fn default_marketplace_timeout() -> u64 {
    120
}
fn default_max_comparables() -> u32 {
    20
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: default_marketplace_url(),
            timeout_secs: default_marketplace_timeout(),
            max_comparables: default_max_comparables(),
        }
    }
}

// ── API ──────────────────────────────────────────────────────────────────

/// Upload/status HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Allowed CORS origins; empty means permissive.
    #[serde(default, alias = "corsOrigins")]
    pub cors_origins: Vec<String>,
}

fn default_api_host() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_complete_config() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.pipeline.stall_timeout_secs, 300);
        assert_eq!(cfg.pipeline.border_fraction, 0.3);
        assert_eq!(cfg.detector.confidence_threshold, 0.25);
        assert_eq!(cfg.routing, RoutingTable::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn camel_case_aliases() {
        let json = r#"{
            "pipeline": { "stallTimeoutSecs": 5, "completedGraceSecs": 7 },
            "classifier": { "apiKeyEnv": "MY_KEY" },
            "api": { "corsOrigins": ["http://localhost:3000"] }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.pipeline.stall_timeout_secs, 5);
        assert_eq!(cfg.pipeline.completed_grace_secs, 7);
        assert_eq!(cfg.classifier.api_key_env, "MY_KEY");
        assert_eq!(cfg.api.cors_origins.len(), 1);
    }

    #[test]
    fn unknown_fields_ignored() {
        let cfg: Config = serde_json::from_str(r#"{"future": 1, "api": {"x": true}}"#).unwrap();
        assert_eq!(cfg.api.port, 8080);
    }

    #[test]
    fn routing_address_for_each_stage() {
        let table = RoutingTable {
            detector: "yolo-1".into(),
            ..RoutingTable::default()
        };
        assert_eq!(table.address_for(StageKind::Detection), "yolo-1");
        assert_eq!(table.address_for(StageKind::Crop), "processor");
        assert_eq!(table.address_for(StageKind::Listing), "lister");
    }

    #[test]
    fn routing_rejects_duplicates_and_empty() {
        let dup = RoutingTable {
            pricer: "detector".into(),
            ..RoutingTable::default()
        };
        let err = dup.validate().unwrap_err().to_string();
        assert!(err.contains("routing.pricer"), "{err}");

        let empty = RoutingTable {
            reporter: " ".into(),
            ..RoutingTable::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_pipeline_values() {
        let mut cfg = Config::default();
        cfg.pipeline.sweep_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.pipeline.border_fraction = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/data"), PathBuf::from("/var/data"));
    }
}
