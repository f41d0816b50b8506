// Export job controller - submits an export, polls it to a terminal state and
// downloads the result once
use crate::application::analysis_repository::ExportQueue;
use crate::domain::TestId;
use crate::domain::export::{
    export_file_name, ExportArtifact, ExportJob, ExportRequest, ExportStatus, ExportTimeRange,
};
use crate::domain::segment::Segment;
use crate::error::{AnalysisError, Result};
use crate::infrastructure::config::ExportSettings;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Progress of the session's single tracked export, as shown to the operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum ExportProgress {
    #[default]
    Idle,
    Submitting,
    Running {
        job_id: String,
        status: ExportStatus,
        progress: u8,
    },
    Ready {
        job_id: String,
        file_name: String,
    },
    Failed {
        job_id: Option<String>,
        reason: String,
    },
}

impl ExportProgress {
    pub fn ready(artifact: &ExportArtifact) -> Self {
        ExportProgress::Ready {
            job_id: artifact.job_id.clone(),
            file_name: artifact.file_name.clone(),
        }
    }

    /// Submitting, polling, or completed with the artifact not yet stored; a new export must wait.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ExportProgress::Submitting | ExportProgress::Running { .. }
        )
    }
}

#[derive(Clone)]
pub struct ExportController {
    queue: Arc<dyn ExportQueue>,
    poll_interval: Duration,
    clear_delay: Duration,
}

impl ExportController {
    pub fn new(queue: Arc<dyn ExportQueue>, settings: &ExportSettings) -> Self {
        Self {
            queue,
            poll_interval: settings.poll_interval(),
            clear_delay: settings.clear_delay(),
        }
    }

    /// Checks a request before anything is sent. A segment-scoped export needs
    /// the segment itself, and the segment must span a positive time range.
    pub fn validate(&self, request: &ExportRequest, segment: Option<&Segment>) -> Result<()> {
        request.validate()?;
        if request.time_range == ExportTimeRange::Segment {
            let segment = segment.ok_or_else(|| match request.segment_id {
                Some(id) => AnalysisError::UnknownSegment(id),
                None => AnalysisError::validation("select a segment to export"),
            })?;
            if !segment.is_well_formed() {
                return Err(AnalysisError::validation(format!(
                    "segment '{}' starts after it ends and cannot be exported",
                    segment.name
                )));
            }
        }
        Ok(())
    }

    /// Runs one export to completion, publishing every state change on `progress`.
    /// Status polling stops at the first terminal status or the first local error.
    /// A successful run leaves the progress at `Running` with status `Completed`;
    /// whoever stores the artifact publishes `Ready`.
    pub async fn run(
        &self,
        test_id: TestId,
        request: ExportRequest,
        segment: Option<Segment>,
        progress: &watch::Sender<ExportProgress>,
    ) -> Result<ExportArtifact> {
        let request = request.scoped();
        let segment = segment.filter(|_| request.time_range == ExportTimeRange::Segment);
        if let Err(e) = self.validate(&request, segment.as_ref()) {
            progress.send_replace(ExportProgress::Failed {
                job_id: None,
                reason: e.to_string(),
            });
            return Err(e);
        }

        progress.send_replace(ExportProgress::Submitting);
        let job_id = match self.queue.submit_export(test_id, &request).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Export submission for test {} failed: {}", test_id, e);
                progress.send_replace(ExportProgress::Failed {
                    job_id: None,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        tracing::info!("Export job {} submitted for test {}", job_id, test_id);

        let mut job = ExportJob::new(job_id);
        progress.send_replace(running(&job));

        while !job.status.is_terminal() {
            tokio::time::sleep(self.poll_interval).await;
            match self.queue.export_status(&job.id).await {
                Ok(report) => {
                    if !job.advance(&report) {
                        tracing::warn!(
                            "Ignoring out-of-order status {:?} for export job {}",
                            report.status,
                            job.id
                        );
                    }
                    tracing::debug!(
                        "Export job {} is {:?} at {}%",
                        job.id,
                        job.status,
                        job.progress
                    );
                    progress.send_replace(running(&job));
                }
                Err(e) => {
                    tracing::error!("Status check for export job {} failed: {}", job.id, e);
                    progress.send_replace(ExportProgress::Failed {
                        job_id: Some(job.id.clone()),
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        if job.status == ExportStatus::Failed {
            let reason = job.error.clone().unwrap_or_default();
            tracing::error!("Export job {} failed: {}", job.id, reason);
            progress.send_replace(ExportProgress::Failed {
                job_id: Some(job.id.clone()),
                reason: reason.clone(),
            });
            return Err(AnalysisError::JobFailed {
                job_id: job.id,
                reason,
            });
        }

        let payload = match self.queue.download_export(&job.id).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Download of export job {} failed: {}", job.id, e);
                progress.send_replace(ExportProgress::Failed {
                    job_id: Some(job.id.clone()),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let file_name = export_file_name(
            test_id,
            request.data_type,
            segment.as_ref().map(|s| s.name.as_str()),
            Utc::now(),
            &payload.content_type,
        );
        tracing::info!(
            "Export job {} ready as {} ({} bytes)",
            job.id,
            file_name,
            payload.bytes.len()
        );

        Ok(ExportArtifact {
            job_id: job.id,
            file_name,
            content_type: payload.content_type,
            bytes: payload.bytes,
        })
    }

    /// Returns the indicator to idle once the terminal state has been on screen
    /// for the configured delay.
    pub async fn clear_after_delay(&self, progress: &watch::Sender<ExportProgress>) {
        tokio::time::sleep(self.clear_delay).await;
        progress.send_if_modified(|current| {
            if current.is_active() || *current == ExportProgress::Idle {
                return false;
            }
            *current = ExportProgress::Idle;
            true
        });
    }
}

fn running(job: &ExportJob) -> ExportProgress {
    ExportProgress::Running {
        job_id: job.id.clone(),
        status: job.status,
        progress: job.progress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fake_backend::{at, status, FakeBackend};
    use crate::domain::export::ExportDataType;

    fn settings() -> ExportSettings {
        ExportSettings {
            poll_interval_ms: 1000,
            clear_delay_ms: 3000,
        }
    }

    fn segment(start: i64, end: i64) -> Segment {
        Segment {
            id: 7,
            test_id: 1,
            name: "warm up".to_string(),
            start_time: at(start),
            end_time: at(end),
            created_at: None,
            last_modified_at: None,
        }
    }

    fn whole(data_type: ExportDataType) -> ExportRequest {
        ExportRequest {
            data_type,
            time_range: ExportTimeRange::Whole,
            segment_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_job_polls_three_times_and_downloads_once() {
        let backend = Arc::new(FakeBackend::new().with_status_script(vec![
            Ok(status(ExportStatus::Queued, 0.0)),
            Ok(status(ExportStatus::Processing, 45.0)),
            Ok(status(ExportStatus::Completed, 100.0)),
        ]));
        let controller = ExportController::new(backend.clone(), &settings());
        let (tx, mut rx) = watch::channel(ExportProgress::Idle);

        let artifact = controller
            .run(1, whole(ExportDataType::Aggregated), None, &tx)
            .await
            .unwrap();

        assert_eq!(backend.status_polls(), 3);
        assert_eq!(backend.downloads(), 1);
        assert_eq!(artifact.job_id, "job-1");
        assert!(artifact.file_name.starts_with("test_1_aggregated_"));
        assert!(artifact.file_name.ends_with(".csv"));
        // still active until the artifact has been stored
        assert_eq!(
            *rx.borrow_and_update(),
            ExportProgress::Running {
                job_id: "job-1".to_string(),
                status: ExportStatus::Completed,
                progress: 100,
            }
        );
        assert!(rx.borrow().is_active());

        // no further polls once the loop has stopped
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.status_polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_whole_export_makes_no_network_call() {
        let backend = Arc::new(FakeBackend::new());
        let controller = ExportController::new(backend.clone(), &settings());
        let (tx, rx) = watch::channel(ExportProgress::Idle);

        let result = controller.run(1, whole(ExportDataType::Raw), None, &tx).await;

        assert!(matches!(result, Err(AnalysisError::Validation(_))));
        assert_eq!(backend.submissions(), 0);
        assert_eq!(backend.status_polls(), 0);
        assert!(matches!(&*rx.borrow(), ExportProgress::Failed { job_id: None, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_failure_is_surfaced() {
        let mut failed = status(ExportStatus::Failed, 10.0);
        failed.error = Some("disk full".to_string());
        let backend = Arc::new(FakeBackend::new().with_status_script(vec![
            Ok(status(ExportStatus::Processing, 10.0)),
            Ok(failed),
        ]));
        let controller = ExportController::new(backend.clone(), &settings());
        let (tx, rx) = watch::channel(ExportProgress::Idle);

        let result = controller
            .run(1, whole(ExportDataType::Aggregated), None, &tx)
            .await;

        assert_eq!(
            result,
            Err(AnalysisError::JobFailed {
                job_id: "job-1".to_string(),
                reason: "disk full".to_string(),
            })
        );
        assert_eq!(backend.status_polls(), 2);
        assert_eq!(backend.downloads(), 0);
        assert_eq!(
            *rx.borrow(),
            ExportProgress::Failed {
                job_id: Some("job-1".to_string()),
                reason: "disk full".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_error_terminates_polling() {
        let backend = Arc::new(FakeBackend::new().with_status_script(vec![
            Ok(status(ExportStatus::Processing, 20.0)),
            Err(AnalysisError::Decode("unexpected body".to_string())),
            Ok(status(ExportStatus::Completed, 100.0)),
        ]));
        let controller = ExportController::new(backend.clone(), &settings());
        let (tx, _rx) = watch::channel(ExportProgress::Idle);

        let result = controller
            .run(1, whole(ExportDataType::Aggregated), None, &tx)
            .await;

        assert!(matches!(result, Err(AnalysisError::Decode(_))));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.status_polls(), 2);
        assert_eq!(backend.downloads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_segment_export_names_file_after_segment() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_status_script(vec![Ok(status(ExportStatus::Completed, 100.0))]),
        );
        let controller = ExportController::new(backend.clone(), &settings());
        let (tx, _rx) = watch::channel(ExportProgress::Idle);
        let request = ExportRequest {
            data_type: ExportDataType::Raw,
            time_range: ExportTimeRange::Segment,
            segment_id: Some(7),
        };

        let artifact = controller
            .run(1, request, Some(segment(10, 20)), &tx)
            .await
            .unwrap();
        assert!(artifact.file_name.starts_with("test_1_raw_warm_up_"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_whole_export_ignores_segment() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_status_script(vec![Ok(status(ExportStatus::Completed, 100.0))]),
        );
        let controller = ExportController::new(backend.clone(), &settings());
        let (tx, _rx) = watch::channel(ExportProgress::Idle);
        let request = ExportRequest {
            data_type: ExportDataType::Aggregated,
            time_range: ExportTimeRange::Whole,
            segment_id: Some(7),
        };

        let artifact = controller
            .run(1, request, Some(segment(10, 20)), &tx)
            .await
            .unwrap();
        assert!(artifact.file_name.starts_with("test_1_aggregated_2"));
        assert!(!artifact.file_name.contains("warm_up"));
        let sent = backend.last_submission().unwrap();
        assert_eq!(sent.1.time_range, ExportTimeRange::Whole);
        assert_eq!(sent.1.segment_id, None);
    }

    #[test]
    fn test_malformed_segment_is_rejected() {
        let controller = ExportController::new(Arc::new(FakeBackend::new()), &settings());
        let request = ExportRequest {
            data_type: ExportDataType::Raw,
            time_range: ExportTimeRange::Segment,
            segment_id: Some(7),
        };
        assert!(matches!(
            controller.validate(&request, Some(&segment(20, 10))),
            Err(AnalysisError::Validation(_))
        ));
        assert_eq!(
            controller.validate(&request, None),
            Err(AnalysisError::UnknownSegment(7))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_clears_after_delay() {
        let controller = ExportController::new(Arc::new(FakeBackend::new()), &settings());
        let (tx, rx) = watch::channel(ExportProgress::Ready {
            job_id: "job-1".to_string(),
            file_name: "f.csv".to_string(),
        });
        controller.clear_after_delay(&tx).await;
        assert_eq!(*rx.borrow(), ExportProgress::Idle);
    }
}
