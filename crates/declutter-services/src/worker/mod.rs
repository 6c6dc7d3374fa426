//! Stage workers.
//!
//! Each worker owns one inbox on the [`WorkerBus`] and handles one request
//! at a time. After processing it:
//!
//! 1. sends its [`StageResult`] to the coordinator, then
//! 2. derives the next request with [`StageResult::continuation`] and sends
//!    it straight to the next worker.
//!
//! The ordering matters: the coordinator must see the result (and move
//! the session to the next stage) before any result of the next stage can
//! reach it. If the downstream send fails, a `Failed` result for the next
//! stage goes to the coordinator instead.

pub mod crop;
pub mod detection;
pub mod evaluation;
pub mod listing;
pub mod pricing;
pub mod report;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use declutter_core::bus::{WorkerBus, WorkerInbox};
use declutter_types::bus::{BusMessage, Envelope};
use declutter_types::config::RoutingTable;
use declutter_types::message::{FailureKind, StageFailure, StageKind, StageRequest, StageResult};

use crate::error::{Result, ServiceError};

pub use crop::CropWorker;
pub use detection::DetectionWorker;
pub use evaluation::EvaluationWorker;
pub use listing::ListingWorker;
pub use pricing::PricingWorker;
pub use report::ReportWorker;

/// A pipeline stage: turns one request into one result.
///
/// Implementations never return errors; every failure is encoded as
/// [`StageResult::Failed`].
#[async_trait]
pub trait StageWorker: Send + Sync {
    fn stage(&self) -> StageKind;

    async fn process(&self, request: StageRequest) -> StageResult;
}

/// Result for a request delivered to the wrong worker.
pub(crate) fn misrouted(stage: StageKind, request: StageRequest) -> StageResult {
    let message = format!("{stage} worker received a {} request", request.stage());
    let job = match request {
        StageRequest::Detect { job }
        | StageRequest::Evaluate { job, .. }
        | StageRequest::Crop { job, .. }
        | StageRequest::Report { job, .. }
        | StageRequest::Price { job, .. }
        | StageRequest::List { job, .. } => job,
    };
    StageResult::failed(
        job,
        StageFailure::new(stage, FailureKind::InvalidResponse, message),
    )
}

/// Drives one [`StageWorker`] from its bus inbox.
pub struct WorkerRunner {
    worker: Arc<dyn StageWorker>,
    inbox: WorkerInbox,
    bus: WorkerBus,
    routing: RoutingTable,
    message_ttl: Duration,
}

impl WorkerRunner {
    /// Register the worker's inbox under its routed address.
    pub async fn register(
        worker: Arc<dyn StageWorker>,
        bus: WorkerBus,
        routing: RoutingTable,
        message_ttl: Duration,
    ) -> Self {
        let inbox = bus.register(routing.address_for(worker.stage())).await;
        Self {
            worker,
            inbox,
            bus,
            routing,
            message_ttl,
        }
    }

    pub fn address(&self) -> &str {
        self.inbox.address()
    }

    /// Process messages until cancelled or the inbox closes.
    ///
    /// On cancellation the address is unregistered, so later sends to it
    /// fail with `AddressNotFound` instead of queueing for nobody.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let stage = self.worker.stage();
        info!(stage = %stage, address = %self.inbox.address(), "stage worker started");

        loop {
            let env = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(stage = %stage, "stage worker shutting down");
                    self.bus.unregister(self.inbox.address()).await;
                    return Ok(());
                }
                env = self.inbox.recv() => env,
            };
            let Some(env) = env else {
                warn!(stage = %stage, "inbox closed");
                return Err(ServiceError::ChannelClosed);
            };
            self.handle(env).await;
        }
    }

    async fn handle(&self, env: Envelope) {
        let stage = self.worker.stage();
        let request = match env.message {
            BusMessage::Request(req) => req,
            BusMessage::Result(res) => {
                warn!(
                    stage = %stage,
                    session_id = %res.session_id(),
                    from = %env.from,
                    "stage worker received a result, dropping"
                );
                return;
            }
        };

        let session_id = request.session_id().to_string();
        debug!(stage = %stage, session_id = %session_id, "processing request");
        let result = if request.stage() == stage {
            self.worker.process(request).await
        } else {
            warn!(
                stage = %stage,
                session_id = %session_id,
                got = %request.stage(),
                "misrouted request"
            );
            misrouted(stage, request)
        };

        if let StageResult::Failed { failure, .. } = &result {
            error!(session_id = %session_id, reason = %failure.reason(), "stage failed");
        }
        let next = result.continuation();
        self.send_result(result).await;

        let Some(next) = next else {
            return;
        };
        let next_stage = next.stage();
        let to = self.routing.address_for(next_stage).to_string();
        let job = next.job().clone();
        let env = Envelope::new(
            self.inbox.address(),
            to.clone(),
            BusMessage::Request(next),
            self.message_ttl,
        );
        if let Err(e) = self.bus.send(env).await {
            warn!(session_id = %session_id, to = %to, error = %e, "downstream dispatch failed");
            let failure = StageFailure::new(
                next_stage,
                FailureKind::Unavailable,
                format!("{to} unavailable: {e}"),
            );
            self.send_result(StageResult::failed(job, failure)).await;
        }
    }

    async fn send_result(&self, result: StageResult) {
        let session_id = result.session_id().to_string();
        let env = Envelope::new(
            self.inbox.address(),
            self.routing.coordinator.clone(),
            BusMessage::Result(result),
            self.message_ttl,
        );
        if let Err(e) = self.bus.send(env).await {
            error!(session_id = %session_id, error = %e, "could not deliver result to coordinator");
        }
    }
}
