//! Pipeline orchestrator.
//!
//! The [`Orchestrator`] is the only writer of session state. It
//!
//! - validates and records a new session in [`Orchestrator::start`] and
//!   dispatches the first (detection) request;
//! - folds every stage result into its session through the pure trackers
//!   ([`Orchestrator::handle_result`]);
//! - finalises sessions exactly once ([`Orchestrator::finalize`]) and
//!   broadcasts a [`PipelineOutcome`] to subscribers.
//!
//! It never re-dispatches work after `start`: the worker that finished a
//! stage emits the next request itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use declutter_types::bus::{BusMessage, Envelope};
use declutter_types::config::{PipelineConfig, RoutingTable};
use declutter_types::error::{DeclutterError, Result};
use declutter_types::message::{Job, StageKind, StageRequest, StageResult};
use declutter_types::session::{
    PipelineOutcome, PipelineRequest, Session, SessionStage, SessionSummary,
};

use crate::bus::WorkerBus;
use crate::security::{generate_session_id, validate_session_id};
use crate::store::{SessionStore, SweepReport};
use crate::tracker::{self, Reduction};

const OUTCOME_CHANNEL_CAPACITY: usize = 256;

/// Counters exposed by [`Orchestrator::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub tracked: usize,
    pub active: usize,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped_results: u64,
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Drives sessions through the stage state machine.
pub struct Orchestrator {
    store: SessionStore,
    bus: WorkerBus,
    routing: RoutingTable,
    message_ttl: Duration,
    outcomes: broadcast::Sender<PipelineOutcome>,
    counters: Counters,
}

impl Orchestrator {
    pub fn new(
        store: SessionStore,
        bus: WorkerBus,
        routing: RoutingTable,
        pipeline: &PipelineConfig,
    ) -> Arc<Self> {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Arc::new(Self {
            store,
            bus,
            routing,
            message_ttl: pipeline.message_ttl(),
            outcomes,
            counters: Counters::default(),
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Subscribe to finalised outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineOutcome> {
        self.outcomes.subscribe()
    }

    /// Record a new session and dispatch its detection request.
    ///
    /// Returns as soon as the request is queued. A repeated id returns the
    /// existing session's id without dispatching again. A dispatch failure
    /// does not error: the session is finalised FAILED and its id returned,
    /// so the caller can read the reason from the status endpoint.
    ///
    /// # Errors
    ///
    /// [`DeclutterError::InvalidRequest`] when no image is given,
    /// [`DeclutterError::InvalidSessionId`] for an unsafe caller id.
    pub async fn start(&self, request: PipelineRequest) -> Result<String> {
        let session_id = match request.session_id {
            Some(id) => {
                validate_session_id(&id)?;
                id
            }
            None => generate_session_id(),
        };

        let now_ms = Utc::now().timestamp_millis();
        let Some(job) = Job::for_batch(session_id.clone(), request.images, now_ms) else {
            return Err(DeclutterError::InvalidRequest {
                reason: "image payload is required".into(),
            });
        };
        let job = job.with_listing(request.listing);

        let created = self.store.create(job.clone()).await;
        if !created.is_new() {
            info!(session_id = %session_id, "start for existing session ignored");
            return Ok(session_id);
        }
        self.counters.started.fetch_add(1, Ordering::Relaxed);

        self.store
            .update(&session_id, |s| s.stage = SessionStage::Detecting)
            .await;

        let request = StageRequest::Detect { job };
        let to = self.routing.address_for(StageKind::Detection).to_string();
        let env = Envelope::new(
            self.routing.coordinator.clone(),
            to.clone(),
            BusMessage::Request(request),
            self.message_ttl,
        );
        match self.bus.send(env).await {
            Ok(()) => {
                info!(session_id = %session_id, to = %to, "session started");
            }
            Err(e) => {
                error!(session_id = %session_id, to = %to, error = %e, "failed to dispatch detection");
                self.finalize(
                    &session_id,
                    false,
                    Some(format!("detection failed: UNAVAILABLE: detector unavailable: {e}")),
                )
                .await;
            }
        }
        Ok(session_id)
    }

    /// Fold a stage result into its session.
    ///
    /// Returns the outcome when this result finalised the session. Results
    /// for unknown, terminal, or not-currently-awaited stages are dropped
    /// with a warning and leave the session untouched.
    pub async fn handle_result(&self, result: StageResult) -> Option<PipelineOutcome> {
        let session_id = result.session_id().to_string();
        let stage = result.stage();

        let reduction = self
            .store
            .update(&session_id, |session| {
                let reduction = tracker::reduce(session, &result);
                if let Reduction::Advanced { session: next, .. } = &reduction {
                    *session = next.clone();
                }
                reduction
            })
            .await;

        match reduction {
            None => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(Reduction::Ignored { reason }) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(session_id = %session_id, stage = %stage, reason = %reason, "stage result dropped");
                None
            }
            Some(Reduction::Failed { reason }) => {
                error!(session_id = %session_id, stage = %stage, reason = %reason, "stage failed");
                self.finalize(&session_id, false, Some(reason)).await
            }
            Some(Reduction::Advanced { next: None, .. }) => {
                info!(session_id = %session_id, stage = %stage, "final stage complete");
                self.finalize(&session_id, true, None).await
            }
            Some(Reduction::Advanced {
                session,
                next: Some(next),
            }) => {
                info!(
                    session_id = %session_id,
                    stage = %stage,
                    next = %next.stage(),
                    now = %session.stage,
                    "stage complete"
                );
                None
            }
        }
    }

    /// Move a session to DONE or FAILED. Idempotent: a terminal or unknown
    /// session yields `None` and nothing is published. Earlier stage
    /// results are kept.
    pub async fn finalize(
        &self,
        session_id: &str,
        success: bool,
        reason: Option<String>,
    ) -> Option<PipelineOutcome> {
        let now = Utc::now();
        let outcome = self
            .store
            .update(session_id, |s| {
                s.stage = if success {
                    SessionStage::Done
                } else {
                    SessionStage::Failed
                };
                s.error = reason;
                s.finished_at = Some(now);
                PipelineOutcome::from_session(s)
            })
            .await?;
        self.publish(&outcome);
        Some(outcome)
    }

    /// Fail stalled sessions and drop finished ones past the grace window.
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        stalled_after: Duration,
        completed_grace: Duration,
    ) -> SweepReport {
        let report = self.store.sweep(now, stalled_after, completed_grace).await;
        for session in &report.stalled {
            warn!(
                session_id = %session.id,
                completed = session.completed.len(),
                "session stalled"
            );
            self.publish(&PipelineOutcome::from_session(session));
        }
        report
    }

    pub async fn session(&self, id: &str) -> Result<Session> {
        self.store.get(id).await
    }

    pub async fn sessions(&self) -> Vec<SessionSummary> {
        self.store.list().await
    }

    pub async fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            tracked: self.store.len().await,
            active: self.store.active().await,
            started: self.counters.started.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped_results: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, outcome: &PipelineOutcome) {
        if outcome.success {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
            info!(
                session_id = %outcome.session_id,
                elapsed_ms = outcome.elapsed_ms,
                "session done"
            );
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            info!(
                session_id = %outcome.session_id,
                reason = outcome.reason.as_deref().unwrap_or(""),
                "session failed"
            );
        }
        // No subscribers is fine.
        let _ = self.outcomes.send(outcome.clone());
    }
}
