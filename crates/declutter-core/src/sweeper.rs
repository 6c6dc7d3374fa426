//! Timeout / cleanup sweeper.
//!
//! Runs [`Orchestrator::sweep`] on a fixed period until cancelled. This is
//! what guarantees every session terminates even if a worker never replies.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use declutter_types::config::PipelineConfig;

use crate::orchestrator::Orchestrator;
use crate::store::SweepReport;

pub struct Sweeper {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    stalled_after: Duration,
    completed_grace: Duration,
}

impl Sweeper {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &PipelineConfig) -> Self {
        Self {
            orchestrator,
            interval: config.sweep_interval(),
            stalled_after: config.stall_timeout(),
            completed_grace: config.completed_grace(),
        }
    }

    /// One sweep at the current time.
    pub async fn sweep_once(&self) -> SweepReport {
        self.orchestrator
            .sweep(Utc::now(), self.stalled_after, self.completed_grace)
            .await
    }

    /// Sweep every interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            stall_secs = self.stalled_after.as_secs(),
            grace_secs = self.completed_grace.as_secs(),
            "sweeper started"
        );
        let mut interval = tokio::time::interval(self.interval);
        // First tick is immediate; skip it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sweeper shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }
}
