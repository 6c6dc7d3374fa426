//! Configuration file discovery and loading.
//!
//! Discovery order:
//! 1. `DECLUTTER_CONFIG` environment variable (path).
//! 2. `~/.declutter/config.json`
//! 3. Built-in defaults (an empty JSON object).
//!
//! JSON keys are normalised from camelCase to snake_case before
//! deserialising into [`Config`].

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use declutter_types::config::Config;
use declutter_types::error::{DeclutterError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "DECLUTTER_CONFIG";

/// Pick the config file path. `env_path` is the value of
/// [`CONFIG_ENV_VAR`], if set. Returns `None` when nothing applies.
pub fn discover_config_path(
    env_path: Option<String>,
    home_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(p) = env_path.filter(|p| !p.trim().is_empty()) {
        return Some(PathBuf::from(p));
    }
    let candidate = home_dir?.join(".declutter").join("config.json");
    candidate.exists().then_some(candidate)
}

/// Load, normalise and validate configuration.
///
/// An explicit `override_path` (e.g. from `--config`) wins over discovery.
pub async fn load_config(override_path: Option<&Path>) -> Result<Config> {
    let path = match override_path {
        Some(p) => Some(p.to_path_buf()),
        None => discover_config_path(std::env::var(CONFIG_ENV_VAR).ok(), dirs::home_dir()),
    };

    let raw = match path {
        None => {
            info!("no config file found, using defaults");
            Value::Object(serde_json::Map::new())
        }
        Some(path) if !path.exists() => {
            warn!(path = %path.display(), "config path does not exist, using defaults");
            Value::Object(serde_json::Map::new())
        }
        Some(path) => {
            debug!(path = %path.display(), "loading config file");
            let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
                DeclutterError::ConfigInvalid {
                    reason: format!("failed to read {}: {e}", path.display()),
                }
            })?;
            serde_json::from_str(&contents).map_err(|e| DeclutterError::ConfigInvalid {
                reason: format!("failed to parse {}: {e}", path.display()),
            })?
        }
    };

    config_from_value(raw)
}

/// Deserialise a raw JSON document into a validated [`Config`].
pub fn config_from_value(raw: Value) -> Result<Config> {
    let config: Config = serde_json::from_value(normalize_keys(raw))?;
    config.validate()?;
    Ok(config)
}

/// Convert camelCase JSON object keys to snake_case, recursively.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (camel_to_snake(&k), normalize_keys(v)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

/// `"stallTimeoutSecs"` -> `"stall_timeout_secs"`, `"HTTPPort"` -> `"http_port"`.
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut result = String::with_capacity(name.len() + 4);

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            // camelCase boundary, or the end of an acronym run.
            if prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next.is_some_and(|c| c.is_lowercase()))
            {
                result.push('_');
            }
        }
        result.push(ch.to_ascii_lowercase());
    }
    result
}
