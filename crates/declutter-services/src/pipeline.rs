//! Pipeline assembly.
//!
//! Builds the bus, orchestrator, stage workers, coordinator and sweeper
//! from a [`Config`] and runs each in its own task under one
//! [`CancellationToken`].
//!
//! ```text
//! API / CLI --start--> Orchestrator --Detect--> detector
//!                                               |  result -> coordinator
//!                                               v
//!                      evaluator -> processor -> reporter [-> pricer -> lister]
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use declutter_core::bus::WorkerBus;
use declutter_core::crop::CropEngine;
use declutter_core::orchestrator::Orchestrator;
use declutter_core::report::ReportWriter;
use declutter_core::store::SessionStore;
use declutter_core::sweeper::Sweeper;
use declutter_types::config::Config;

use crate::collaborator::{
    HttpDetector, HttpMarketplace, Marketplace, ObjectDetector, ResaleClassifier,
    VisionClassifier,
};
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::worker::{
    CropWorker, DetectionWorker, EvaluationWorker, ListingWorker, PricingWorker, ReportWorker,
    StageWorker, WorkerRunner,
};

/// External services the workers call.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn ObjectDetector>,
    pub classifier: Arc<dyn ResaleClassifier>,
    pub marketplace: Arc<dyn Marketplace>,
}

impl Collaborators {
    /// HTTP clients configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            detector: Arc::new(HttpDetector::new(&config.detector)),
            classifier: Arc::new(VisionClassifier::new(config.classifier.clone())),
            marketplace: Arc::new(HttpMarketplace::new(&config.marketplace)),
        }
    }
}

/// A running pipeline.
pub struct Pipeline {
    orchestrator: Arc<Orchestrator>,
    bus: WorkerBus,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Validate `config`, register every inbox, then spawn all loops.
    ///
    /// Inboxes are registered before anything runs, so the first
    /// `Orchestrator::start` always finds the detector.
    pub async fn start(
        config: &Config,
        collaborators: Collaborators,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline_cfg = &config.pipeline;
        let bus = WorkerBus::with_capacity(pipeline_cfg.inbox_capacity);
        let orchestrator = Orchestrator::new(
            SessionStore::new(),
            bus.clone(),
            config.routing.clone(),
            pipeline_cfg,
        );

        let workers: Vec<Arc<dyn StageWorker>> = vec![
            Arc::new(DetectionWorker::new(
                collaborators.detector,
                config.detector.confidence_threshold,
            )),
            Arc::new(EvaluationWorker::new(collaborators.classifier)),
            Arc::new(CropWorker::new(CropEngine::new(
                config.storage.crop_path(),
                pipeline_cfg.border_fraction,
            ))),
            Arc::new(ReportWorker::new(ReportWriter::new(config.storage.report_path()))),
            Arc::new(PricingWorker::new(collaborators.marketplace.clone())),
            Arc::new(ListingWorker::new(collaborators.marketplace)),
        ];

        let mut runners = Vec::with_capacity(workers.len());
        for worker in workers {
            runners.push(
                WorkerRunner::register(
                    worker,
                    bus.clone(),
                    config.routing.clone(),
                    pipeline_cfg.message_ttl(),
                )
                .await,
            );
        }
        let coordinator = Coordinator::register(orchestrator.clone(), &bus).await;
        let sweeper = Sweeper::new(orchestrator.clone(), pipeline_cfg);

        let mut handles = Vec::with_capacity(runners.len() + 2);
        for runner in runners {
            let address = runner.address().to_string();
            let c = cancel.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = runner.run(c).await {
                    error!(address = %address, error = %e, "stage worker exited with error");
                }
            }));
        }
        let c = cancel.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = coordinator.run(c).await {
                error!(error = %e, "coordinator exited with error");
            }
        }));
        let c = cancel.clone();
        handles.push(tokio::spawn(async move {
            sweeper.run(c).await;
        }));

        info!(addresses = ?bus.registered().await, "pipeline started");
        Ok(Self {
            orchestrator,
            bus,
            cancel,
            handles,
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn bus(&self) -> &WorkerBus {
        &self.bus
    }

    /// Cancel every loop and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "pipeline task panicked");
            }
        }
        info!("pipeline stopped");
    }
}
