//! Coordinator actor: the only consumer of stage results.
//!
//! Reads the coordinator inbox and feeds every result to
//! [`Orchestrator::handle_result`]. Results for one session arrive in the
//! order the workers sent them, so per-session updates are serialised.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use declutter_core::bus::{WorkerBus, WorkerInbox};
use declutter_core::orchestrator::Orchestrator;
use declutter_types::bus::BusMessage;

use crate::error::{Result, ServiceError};

pub struct Coordinator {
    orchestrator: Arc<Orchestrator>,
    inbox: WorkerInbox,
}

impl Coordinator {
    /// Register the coordinator inbox under its routed address.
    pub async fn register(orchestrator: Arc<Orchestrator>, bus: &WorkerBus) -> Self {
        let inbox = bus.register(&orchestrator.routing().coordinator).await;
        Self {
            orchestrator,
            inbox,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(address = %self.inbox.address(), "coordinator started");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("coordinator shutting down");
                    return Ok(());
                }

                env = self.inbox.recv() => {
                    let Some(env) = env else {
                        warn!("coordinator inbox closed");
                        return Err(ServiceError::ChannelClosed);
                    };
                    match env.message {
                        BusMessage::Result(result) => {
                            debug!(
                                session_id = %result.session_id(),
                                stage = %result.stage(),
                                from = %env.from,
                                "stage result received"
                            );
                            self.orchestrator.handle_result(result).await;
                        }
                        BusMessage::Request(req) => {
                            warn!(
                                session_id = %req.session_id(),
                                from = %env.from,
                                "coordinator received a request, dropping"
                            );
                        }
                    }
                }
            }
        }
    }
}
