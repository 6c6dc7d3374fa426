//! `declutter run` -- images through an in-process pipeline.
//!
//! Starts the same workers `serve` does, submits the images as one
//! session, waits for the session's outcome and prints it as JSON. Exits
//! non-zero when the session fails.
//!
//! ```text
//! declutter run ./shelf.jpg
//! declutter run ./shelf.jpg ./desk.jpg --list-on ebay --condition good
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use declutter_services::{Collaborators, Pipeline};
use declutter_types::message::{ImageRef, ListingOptions};
use declutter_types::session::{PipelineOutcome, PipelineRequest};

use super::load_config;

/// Arguments for the `declutter run` subcommand.
#[derive(Args)]
pub struct RunArgs {
    /// Images to process, in capture order.
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,

    /// Session id (generated when omitted).
    #[arg(long)]
    pub session_id: Option<String>,

    /// Price and list resellable items on this platform (repeatable).
    #[arg(long = "list-on")]
    pub list_on: Vec<String>,

    /// Item condition used for pricing and listing.
    #[arg(long, default_value = "used")]
    pub condition: String,

    /// Give up waiting after this many seconds.
    #[arg(long, default_value = "600")]
    pub timeout_secs: u64,
}

impl RunArgs {
    fn request(&self) -> anyhow::Result<PipelineRequest> {
        let now_ms = Utc::now().timestamp_millis();
        let mut images = Vec::with_capacity(self.images.len());
        for (i, image) in self.images.iter().enumerate() {
            let path = std::fs::canonicalize(image)
                .map_err(|e| anyhow::anyhow!("cannot open {}: {e}", image.display()))?;
            images.push(ImageRef {
                path,
                captured_at_ms: now_ms + i as i64,
            });
        }
        let mut request = PipelineRequest::for_batch(images);
        if let Some(id) = &self.session_id {
            request = request.with_session_id(id.clone());
        }
        if !self.list_on.is_empty() {
            request = request.with_listing(ListingOptions {
                platforms: self.list_on.clone(),
                condition: self.condition.clone(),
            });
        }
        Ok(request)
    }
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref()).await?;
    let request = args.request()?;

    let pipeline = Pipeline::start(
        &config,
        Collaborators::from_config(&config),
        CancellationToken::new(),
    )
    .await?;
    let orchestrator = pipeline.orchestrator().clone();
    let mut outcomes = orchestrator.subscribe();
    let id = orchestrator.start(request).await?;

    let waited = tokio::time::timeout(Duration::from_secs(args.timeout_secs), async {
        loop {
            match outcomes.recv().await {
                Ok(outcome) if outcome.session_id == id => return Some(outcome),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "outcome stream lagged"),
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await;

    // Timed out: the session may still have finished just now.
    let outcome = match waited {
        Ok(Some(outcome)) => outcome,
        _ => match orchestrator.session(&id).await {
            Ok(session) if session.is_terminal() => PipelineOutcome::from_session(&session),
            _ => {
                pipeline.shutdown().await;
                anyhow::bail!("session {id} did not finish within {}s", args.timeout_secs);
            }
        },
    };
    pipeline.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.success {
        anyhow::bail!(
            "session {id} failed: {}",
            outcome.reason.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}
