//! `declutter serve` -- run the pipeline and the HTTP API.
//!
//! # Lifecycle
//!
//! ```text
//! 1. Load config
//! 2. Start the pipeline (bus, workers, coordinator, sweeper)
//! 3. Start the API on the configured address
//! 4. Wait for Ctrl+C, then cancel everything and wait for it to stop
//! ```

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use declutter_services::api::{self, ApiState, UploadStore};
use declutter_services::{Collaborators, Pipeline};

use super::load_config;

/// Arguments for the `declutter serve` subcommand.
#[derive(Args)]
pub struct ServeArgs {
    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,

    /// Listen address as `host:port` (overrides `api.host` / `api.port`).
    #[arg(long)]
    pub bind: Option<String>,
}

/// Split `host:port`; the port must be numeric.
fn parse_bind(bind: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = bind
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("--bind must be host:port, got {bind:?}"))?;
    let port = port
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid port in --bind {bind:?}: {e}"))?;
    Ok((host.trim_matches(['[', ']']).to_string(), port))
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref()).await?;
    if let Some(bind) = &args.bind {
        let (host, port) = parse_bind(bind)?;
        config.api.host = host;
        config.api.port = port;
    }

    let cancel = CancellationToken::new();
    let collaborators = Collaborators::from_config(&config);
    let pipeline = Pipeline::start(&config, collaborators, cancel.clone()).await?;

    let state = ApiState::new(
        pipeline.orchestrator().clone(),
        UploadStore::from_config(&config.storage),
    );
    let api_config = config.api.clone();
    let api_cancel = cancel.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(&api_config, state, api_cancel.clone()).await {
            error!(error = %e, "api server exited with error");
            api_cancel.cancel();
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received Ctrl+C, shutting down"),
        _ = cancel.cancelled() => info!("shutting down"),
    }
    cancel.cancel();
    pipeline.shutdown().await;
    if let Err(e) = api_handle.await {
        error!(error = %e, "api task panicked");
    }
    Ok(())
}
