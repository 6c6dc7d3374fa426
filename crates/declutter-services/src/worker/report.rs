//! Report stage: write the session's analysis report.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use declutter_core::report::{ReportWriter, SessionReport};
use declutter_types::message::{FailureKind, StageFailure, StageKind, StageRequest, StageResult};

use super::{StageWorker, misrouted};

pub struct ReportWorker {
    writer: ReportWriter,
}

impl ReportWorker {
    pub fn new(writer: ReportWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl StageWorker for ReportWorker {
    fn stage(&self) -> StageKind {
        StageKind::Report
    }

    async fn process(&self, request: StageRequest) -> StageResult {
        let job = match request {
            StageRequest::Report { job } => job,
            other => return misrouted(self.stage(), other),
        };

        let now = Utc::now();
        let elapsed_ms = (now.timestamp_millis() - job.started_at_ms).max(0) as u64;
        let report = SessionReport {
            session_id: job.session_id.clone(),
            generated_at: now,
            entries: job.processed.clone(),
            duration: Duration::from_millis(elapsed_ms),
        };
        let items = report.items();

        match self.writer.write(&report).await {
            Ok(report_path) => StageResult::Reported {
                job,
                report_path,
                items,
            },
            Err(e) => StageResult::failed(
                job,
                StageFailure::new(
                    StageKind::Report,
                    FailureKind::Unavailable,
                    format!(
                        "report directory {} unwritable: {e}",
                        self.writer.report_dir().display()
                    ),
                ),
            ),
        }
    }
}
