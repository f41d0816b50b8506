// Analysis service - use cases over per-test analysis sessions
use crate::application::analysis_repository::{
    fetch_series, CropOutcome, ExportQueue, MeasurementStore, SegmentStore,
};
use crate::application::crop_workflow::CropPreview;
use crate::application::export_controller::{ExportController, ExportProgress};
use crate::application::frame::{ChartFrame, ViewOptions};
use crate::application::notices::Notice;
use crate::application::segment_manager::SegmentEdit;
use crate::application::selection::SelectGesture;
use crate::application::session::{AnalysisSession, FetchPlan, FetchResults};
use crate::domain::export::{ExportArtifact, ExportRequest, ExportTimeRange};
use crate::domain::measurement::TimeBounds;
use crate::domain::segment::{Segment, SegmentDraft};
use crate::domain::{SegmentId, SensorId, TestId};
use crate::error::{AnalysisError, Result};
use crate::infrastructure::config::{AnalysisSettings, ExportSettings};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};

type SessionHandle = Arc<Mutex<AnalysisSession>>;

#[derive(Clone)]
pub struct AnalysisService {
    sessions: Arc<RwLock<HashMap<TestId, SessionHandle>>>,
    measurements: Arc<dyn MeasurementStore>,
    segment_store: Arc<dyn SegmentStore>,
    exports: ExportController,
    settings: AnalysisSettings,
}

impl AnalysisService {
    pub fn new(
        measurements: Arc<dyn MeasurementStore>,
        segment_store: Arc<dyn SegmentStore>,
        export_queue: Arc<dyn ExportQueue>,
        settings: AnalysisSettings,
        export_settings: &ExportSettings,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            measurements,
            segment_store,
            exports: ExportController::new(export_queue, export_settings),
            settings,
        }
    }

    async fn session(&self, test_id: TestId) -> Result<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(&test_id)
            .cloned()
            .ok_or(AnalysisError::SessionNotFound(test_id))
    }

    /// Loads the test's sensors and segments, batch-loads every sensor and
    /// replaces any session already open for the test.
    pub async fn open_session(&self, test_id: TestId, viewport_height: Option<u32>) -> Result<ChartFrame> {
        let start = Instant::now();
        let (sensors, segments) = tokio::try_join!(
            self.measurements.list_test_sensors(test_id),
            self.segment_store.list_segments(test_id),
        )?;
        tracing::info!(
            "Opening test {} with {} sensors and {} segments",
            test_id,
            sensors.len(),
            segments.len()
        );

        let mut session = AnalysisSession::new(test_id, sensors, segments, &self.settings);
        let plan = session.initial_plan();
        let results = self.fetch_all(&plan).await;
        session.apply(&plan, results);
        if self.settings.select_all_on_open {
            session.select_loaded();
        }
        let frame = session.frame(viewport_height);

        let previous = self
            .sessions
            .write()
            .await
            .insert(test_id, Arc::new(Mutex::new(session)));
        if let Some(previous) = previous {
            previous.lock().await.close();
        }
        tracing::info!("Test {} ready in {:?}", test_id, start.elapsed());
        Ok(frame)
    }

    pub async fn close_session(&self, test_id: TestId) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(&test_id)
            .ok_or(AnalysisError::SessionNotFound(test_id))?;
        session.lock().await.close();
        Ok(())
    }

    pub async fn frame(&self, test_id: TestId, viewport_height: Option<u32>) -> Result<ChartFrame> {
        let session = self.session(test_id).await?;
        let frame = session.lock().await.frame(viewport_height);
        Ok(frame)
    }

    pub async fn toggle_sensor(
        &self,
        test_id: TestId,
        sensor_id: SensorId,
        gesture: SelectGesture,
    ) -> Result<ChartFrame> {
        let session = self.session(test_id).await?;
        let plan = session.lock().await.toggle_sensor(sensor_id, gesture)?;
        self.execute(&session, plan).await;
        let frame = session.lock().await.frame(None);
        Ok(frame)
    }

    pub async fn set_view(&self, test_id: TestId, view: ViewOptions) -> Result<ChartFrame> {
        let session = self.session(test_id).await?;
        let plan = session.lock().await.set_view(view);
        self.execute(&session, plan).await;
        let frame = session.lock().await.frame(None);
        Ok(frame)
    }

    pub async fn refresh(&self, test_id: TestId) -> Result<ChartFrame> {
        let session = self.session(test_id).await?;
        let plan = session.lock().await.refresh();
        self.execute(&session, plan).await;
        let frame = session.lock().await.frame(None);
        Ok(frame)
    }

    /// Runs a plan without holding the session lock, then merges the results
    /// in one step once every fetch has resolved.
    async fn execute(&self, session: &SessionHandle, plan: Option<FetchPlan>) {
        let Some(plan) = plan else {
            return;
        };
        let results = self.fetch_all(&plan).await;
        session.lock().await.apply(&plan, results);
    }

    async fn fetch_all(&self, plan: &FetchPlan) -> FetchResults {
        tracing::debug!(
            "Fetching {} sensors ({}) for epoch {}",
            plan.sensor_ids.len(),
            plan.mode.as_str(),
            plan.epoch
        );
        let fetches = plan.sensor_ids.iter().map(|sensor_id| async move {
            let result =
                fetch_series(self.measurements.as_ref(), *sensor_id, plan.mode, &self.settings)
                    .await;
            (*sensor_id, result)
        });
        join_all(fetches).await
    }

    /// Re-reads the segment list; the store is the source of truth.
    pub async fn list_segments(&self, test_id: TestId) -> Result<Vec<Segment>> {
        let session = self.session(test_id).await?;
        self.reload_segments(test_id, &session).await
    }

    async fn reload_segments(&self, test_id: TestId, session: &SessionHandle) -> Result<Vec<Segment>> {
        let result = self.segment_store.list_segments(test_id).await;
        let segments = surface(session, "Failed to load segments", result).await?;
        let mut guard = session.lock().await;
        guard.segments_mut().replace_all(segments);
        Ok(guard.segments().segments().to_vec())
    }

    pub async fn create_segment(&self, test_id: TestId, draft: SegmentDraft) -> Result<Segment> {
        let session = self.session(test_id).await?;
        draft.validate()?;
        let result = self.segment_store.create_segment(test_id, &draft).await;
        let created = surface(&session, "Failed to create segment", result).await?;
        tracing::info!("Created segment {} on test {}", created.id, test_id);
        self.reload_segments(test_id, &session).await?;
        Ok(created)
    }

    pub async fn update_segment(
        &self,
        test_id: TestId,
        segment_id: SegmentId,
        draft: SegmentDraft,
    ) -> Result<Segment> {
        let session = self.session(test_id).await?;
        session.lock().await.segments().require(segment_id)?;
        draft.validate()?;
        let result = self.segment_store.update_segment(segment_id, &draft).await;
        let updated = surface(&session, "Failed to update segment", result).await?;
        session.lock().await.segments_mut().finish_edit(segment_id);
        self.reload_segments(test_id, &session).await?;
        Ok(updated)
    }

    pub async fn delete_segment(&self, test_id: TestId, segment_id: SegmentId) -> Result<()> {
        let session = self.session(test_id).await?;
        session.lock().await.segments().require(segment_id)?;
        let result = self.segment_store.delete_segment(segment_id).await;
        surface(&session, "Failed to delete segment", result).await?;
        tracing::info!("Deleted segment {} on test {}", segment_id, test_id);
        self.reload_segments(test_id, &session).await?;
        Ok(())
    }

    /// Returns the highlighted segment after the click.
    pub async fn click_segment(&self, test_id: TestId, segment_id: SegmentId) -> Result<Option<SegmentId>> {
        let session = self.session(test_id).await?;
        let mut guard = session.lock().await;
        guard.segments_mut().click(segment_id)
    }

    pub async fn begin_segment_edit(&self, test_id: TestId, segment_id: SegmentId) -> Result<SegmentEdit> {
        let session = self.session(test_id).await?;
        let mut guard = session.lock().await;
        guard.segments_mut().begin_edit(segment_id).cloned()
    }

    pub async fn cancel_segment_edit(&self, test_id: TestId) -> Result<Option<SegmentEdit>> {
        let session = self.session(test_id).await?;
        let mut guard = session.lock().await;
        Ok(guard.segments_mut().cancel_edit())
    }

    pub async fn begin_crop(&self, test_id: TestId) -> Result<TimeBounds> {
        let session = self.session(test_id).await?;
        let mut guard = session.lock().await;
        guard.begin_crop()
    }

    pub async fn set_crop_bounds(
        &self,
        test_id: TestId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CropPreview> {
        let session = self.session(test_id).await?;
        let mut guard = session.lock().await;
        guard.set_crop_bounds(start, end)
    }

    /// Issues the irreversible delete-outside-range, then refetches every selected sensor.
    pub async fn confirm_crop(&self, test_id: TestId, confirmed: bool) -> Result<CropOutcome> {
        let session = self.session(test_id).await?;
        let command = session.lock().await.crop_command(confirmed)?;
        tracing::info!(
            "Cropping test {} to {} .. {}",
            test_id,
            command.start,
            command.end
        );
        let result = self
            .measurements
            .crop(test_id, command.start, command.end)
            .await;
        if result.is_err() {
            session.lock().await.crop_failed();
        }
        let outcome = surface(&session, "Crop failed", result).await?;
        tracing::info!("Crop of test {} deleted {} rows", test_id, outcome.total_deleted);

        let plan = session.lock().await.complete_crop(&outcome);
        self.execute(&session, plan).await;
        Ok(outcome)
    }

    pub async fn cancel_crop(&self, test_id: TestId) -> Result<()> {
        let session = self.session(test_id).await?;
        session.lock().await.cancel_crop()
    }

    /// Validates and submits an export, then polls it in the background.
    /// A second export while one is in flight is rejected.
    pub async fn submit_export(&self, test_id: TestId, request: ExportRequest) -> Result<()> {
        let session = self.session(test_id).await?;
        let mut guard = session.lock().await;

        let request = request.scoped();
        let segment = match request.time_range {
            ExportTimeRange::Segment => request
                .segment_id
                .and_then(|id| guard.segments().get(id).cloned()),
            ExportTimeRange::Whole => None,
        };
        if let Err(e) = self.exports.validate(&request, segment.as_ref()) {
            tracing::warn!("Rejected export for test {}: {}", test_id, e);
            guard.notices_mut().error(format!("Export rejected: {}", e));
            return Err(e);
        }
        let progress = guard.begin_export()?;

        let controller = self.exports.clone();
        let owner = session.clone();
        let task = tokio::spawn(async move {
            let result = controller.run(test_id, request, segment, &progress).await;
            owner.lock().await.finish_export(result);
            controller.clear_after_delay(&progress).await;
        });
        guard.track_export(task);
        Ok(())
    }

    pub async fn export_progress(&self, test_id: TestId) -> Result<watch::Receiver<ExportProgress>> {
        let session = self.session(test_id).await?;
        let receiver = session.lock().await.export_progress();
        Ok(receiver)
    }

    /// Hands over the completed export once.
    pub async fn take_export(&self, test_id: TestId) -> Result<ExportArtifact> {
        let session = self.session(test_id).await?;
        let artifact = session.lock().await.take_artifact();
        artifact.ok_or_else(|| AnalysisError::conflict("no completed export is waiting to be saved"))
    }

    pub async fn notices(&self, test_id: TestId) -> Result<Vec<Notice>> {
        let session = self.session(test_id).await?;
        let notices = session.lock().await.notices().list();
        Ok(notices)
    }

    pub async fn dismiss_notice(&self, test_id: TestId, notice_id: u64) -> Result<bool> {
        let session = self.session(test_id).await?;
        let dismissed = session.lock().await.notices_mut().dismiss(notice_id);
        Ok(dismissed)
    }
}

/// Posts backend failures to the session's notice board before passing them on.
async fn surface<T>(session: &SessionHandle, context: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        tracing::error!("{}: {}", context, e);
        session
            .lock()
            .await
            .notices_mut()
            .error(format!("{}: {}", context, e));
    }
    result
}
