//! Evaluation stage: ask the classifier which candidate classes resell.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use declutter_types::message::{StageKind, StageRequest, StageResult};

use super::{StageWorker, misrouted};
use crate::collaborator::ResaleClassifier;

pub struct EvaluationWorker {
    classifier: Arc<dyn ResaleClassifier>,
}

impl EvaluationWorker {
    pub fn new(classifier: Arc<dyn ResaleClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl StageWorker for EvaluationWorker {
    fn stage(&self) -> StageKind {
        StageKind::Evaluation
    }

    async fn process(&self, request: StageRequest) -> StageResult {
        let (job, candidates, classes) = match request {
            StageRequest::Evaluate {
                job,
                candidates,
                classes,
            } => (job, candidates, classes),
            other => return misrouted(self.stage(), other),
        };
        match self.classifier.classify(&job.image, &classes).await {
            Ok(resellable) => {
                info!(
                    session_id = %job.session_id,
                    candidates = classes.len(),
                    resellable = resellable.len(),
                    "evaluation complete"
                );
                StageResult::Evaluated {
                    job,
                    candidates,
                    resellable,
                }
            }
            Err(e) => StageResult::failed(job, e.into_failure(StageKind::Evaluation)),
        }
    }
}
