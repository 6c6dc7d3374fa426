//! CLI command implementations for `declutter`.
//!
//! - [`serve`] -- Long-running pipeline plus HTTP API.
//! - [`run`] -- One-shot in-process run.
//! - [`status`] -- Client for the status endpoints.
//! - [`config_cmd`] -- Configuration display.

pub mod config_cmd;
pub mod run;
pub mod serve;
pub mod status;

use std::path::Path;

use declutter_types::config::Config;

/// Load configuration from the given path override or via auto-discovery.
///
/// An explicit path must exist. Without one, discovery is:
/// 1. `DECLUTTER_CONFIG` env var
/// 2. `~/.declutter/config.json`
/// 3. built-in defaults
pub async fn load_config(config_override: Option<&str>) -> anyhow::Result<Config> {
    if let Some(path_str) = config_override {
        let path = Path::new(path_str);
        if !path.exists() {
            anyhow::bail!("config file not found: {path_str}");
        }
        return Ok(declutter_core::config_loader::load_config(Some(path)).await?);
    }
    Ok(declutter_core::config_loader::load_config(None).await?)
}
