// Analysis session - all state for one test under analysis, owned by one session
use crate::application::analysis_repository::CropOutcome;
use crate::application::crop_workflow::{CropCommand, CropPreview, CropWorkflow};
use crate::application::export_controller::ExportProgress;
use crate::application::frame::{ChartFrame, SensorStatus, ViewOptions};
use crate::application::layout_builder::LayoutBuilder;
use crate::application::notices::NoticeBoard;
use crate::application::segment_manager::SegmentManager;
use crate::application::selection::{SelectGesture, SelectionController};
use crate::application::series_cache::SeriesCache;
use crate::application::trace_builder::TraceBuilder;
use crate::domain::export::ExportArtifact;
use crate::domain::measurement::{DataMode, Measurements, TimeBounds};
use crate::domain::segment::Segment;
use crate::domain::sensor::{sort_for_display, Sensor};
use crate::domain::{SensorId, TestId};
use crate::error::{AnalysisError, Result};
use crate::infrastructure::config::AnalysisSettings;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Sensors to fetch, tagged with the epoch and mode current when the plan was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub epoch: u64,
    pub mode: DataMode,
    pub sensor_ids: Vec<SensorId>,
    /// The load on open; its failures are reported whether or not the sensor is selected.
    pub batch: bool,
}

pub type FetchResults = Vec<(SensorId, Result<Measurements>)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Applied {
        rendered: Vec<SensorId>,
        failed: Vec<SensorId>,
    },
    /// The view changed while the fetch was in flight; nothing was applied.
    Stale,
}

/// The session's one export slot. Dropping it aborts the poll task.
pub struct ExportTracker {
    progress: Arc<watch::Sender<ExportProgress>>,
    task: Option<JoinHandle<()>>,
    artifact: Option<ExportArtifact>,
}

impl Default for ExportTracker {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(ExportProgress::Idle);
        Self {
            progress: Arc::new(tx),
            task: None,
            artifact: None,
        }
    }
}

impl ExportTracker {
    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ExportTracker {
    fn drop(&mut self) {
        self.abort();
    }
}

pub struct AnalysisSession {
    test_id: TestId,
    /// Display order: by type, then name.
    sensors: Vec<Sensor>,
    view: ViewOptions,
    /// Bumped whenever in-flight fetches stop being relevant.
    epoch: u64,
    cache: SeriesCache,
    selection: SelectionController,
    segments: SegmentManager,
    crop: CropWorkflow,
    builder: TraceBuilder,
    layout: LayoutBuilder,
    notices: NoticeBoard,
    export: ExportTracker,
}

impl AnalysisSession {
    pub fn new(
        test_id: TestId,
        mut sensors: Vec<Sensor>,
        segments: Vec<Segment>,
        settings: &AnalysisSettings,
    ) -> Self {
        sort_for_display(&mut sensors);
        Self {
            test_id,
            sensors,
            view: ViewOptions::default(),
            epoch: 0,
            cache: SeriesCache::new(),
            selection: SelectionController::new(),
            segments: SegmentManager::new(segments),
            crop: CropWorkflow::default(),
            builder: TraceBuilder::default(),
            layout: LayoutBuilder::new(settings),
            notices: NoticeBoard::new(),
            export: ExportTracker::default(),
        }
    }

    #[cfg(test)]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[cfg(test)]
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn sensor(&self, sensor_id: SensorId) -> Result<&Sensor> {
        self.sensors
            .iter()
            .find(|s| s.id == sensor_id)
            .ok_or(AnalysisError::UnknownSensor(sensor_id))
    }

    #[cfg(test)]
    pub fn cache(&self) -> &SeriesCache {
        &self.cache
    }

    #[cfg(test)]
    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn segments(&self) -> &SegmentManager {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut SegmentManager {
        &mut self.segments
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn notices_mut(&mut self) -> &mut NoticeBoard {
        &mut self.notices
    }

    fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        tracing::debug!("Test {} moved to epoch {}", self.test_id, self.epoch);
    }

    /// Every sensor of the test in the current mode; used for the batch load on open.
    pub fn initial_plan(&self) -> FetchPlan {
        FetchPlan {
            epoch: self.epoch,
            mode: self.view.mode,
            sensor_ids: self.sensors.iter().map(|s| s.id).collect(),
            batch: true,
        }
    }

    /// Applies a selection gesture. Cached series render immediately; a miss
    /// marks the sensor loading and returns the fetch to run.
    pub fn toggle_sensor(
        &mut self,
        sensor_id: SensorId,
        gesture: SelectGesture,
    ) -> Result<Option<FetchPlan>> {
        self.sensor(sensor_id)?;
        let change = self.selection.toggle(sensor_id, gesture);
        if !change.removed.is_empty() {
            tracing::debug!("Deselected sensors {:?}", change.removed);
        }
        let Some(added) = change.added else {
            return Ok(None);
        };

        if self.cache.contains(added, self.view.mode) {
            tracing::debug!("Cache hit for sensor {} ({})", added, self.view.mode.as_str());
            self.render_or_fail(added);
            return Ok(None);
        }
        if self.selection.is_loading(added, self.epoch) {
            return Ok(None);
        }
        tracing::debug!("Cache miss for sensor {} ({})", added, self.view.mode.as_str());
        self.selection.mark_loading(added, self.epoch);
        Ok(Some(FetchPlan {
            epoch: self.epoch,
            mode: self.view.mode,
            sensor_ids: vec![added],
            batch: false,
        }))
    }

    /// Switches data mode and/or aggregation type and rebuilds every selected sensor.
    pub fn set_view(&mut self, view: ViewOptions) -> Option<FetchPlan> {
        if view == self.view {
            return None;
        }
        tracing::info!(
            "Test {} view changed to {} / {:?}",
            self.test_id,
            view.mode.as_str(),
            view.aggregation
        );
        self.view = view;
        self.bump_epoch();
        self.rebuild()
    }

    /// Drops the current mode's cached series for the selected sensors and refetches them.
    pub fn refresh(&mut self) -> Option<FetchPlan> {
        let mode = self.view.mode;
        for sensor_id in self.selection.selected().to_vec() {
            self.cache.invalidate(sensor_id, mode);
        }
        self.bump_epoch();
        self.rebuild()
    }

    /// Full-list replace: every selected sensor is re-rendered from cache or queued for fetch.
    fn rebuild(&mut self) -> Option<FetchPlan> {
        self.selection.reset_traces();
        let mut missing = Vec::new();
        for sensor_id in self.selection.selected().to_vec() {
            if self.cache.contains(sensor_id, self.view.mode) {
                self.render_or_fail(sensor_id);
            } else {
                self.selection.mark_loading(sensor_id, self.epoch);
                missing.push(sensor_id);
            }
        }
        if missing.is_empty() {
            return None;
        }
        Some(FetchPlan {
            epoch: self.epoch,
            mode: self.view.mode,
            sensor_ids: missing,
            batch: false,
        })
    }

    /// Merges one plan's results. Results from an older epoch are discarded whole.
    pub fn apply(&mut self, plan: &FetchPlan, results: FetchResults) -> PlanOutcome {
        if plan.epoch != self.epoch || plan.mode != self.view.mode {
            tracing::warn!(
                "Discarding {} stale results from epoch {} (current {})",
                results.len(),
                plan.epoch,
                self.epoch
            );
            return PlanOutcome::Stale;
        }

        let mut rendered = Vec::new();
        let mut failed = Vec::new();
        for (sensor_id, result) in results {
            match result {
                Ok(data) => {
                    self.cache.put(sensor_id, data);
                    if self.selection.is_selected(sensor_id) && self.render_or_fail(sensor_id) {
                        rendered.push(sensor_id);
                    }
                }
                Err(e) => {
                    tracing::error!("Fetching sensor {} failed: {}", sensor_id, e);
                    if plan.batch || self.selection.is_selected(sensor_id) {
                        self.fail_sensor(sensor_id, &e);
                    } else {
                        tracing::debug!("Sensor {} was deselected; not reporting", sensor_id);
                    }
                    failed.push(sensor_id);
                }
            }
        }
        PlanOutcome::Applied { rendered, failed }
    }

    /// Selects every sensor with data in the current mode, in display order.
    pub fn select_loaded(&mut self) -> Vec<SensorId> {
        let loaded: Vec<SensorId> = self
            .sensors
            .iter()
            .map(|s| s.id)
            .filter(|id| self.cache.contains(*id, self.view.mode))
            .collect();
        for sensor_id in &loaded {
            self.selection.select(*sensor_id);
            self.render_or_fail(*sensor_id);
        }
        loaded
    }

    fn render(&mut self, sensor_id: SensorId) -> Result<bool> {
        let mode = self.view.mode;
        let Some(data) = self.cache.get(sensor_id, mode) else {
            return Ok(false);
        };
        let sensor = self
            .sensors
            .iter()
            .find(|s| s.id == sensor_id)
            .ok_or(AnalysisError::UnknownSensor(sensor_id))?;
        let aggregation = self.view.aggregation;
        let channels = TraceBuilder::channels(data);
        let registry = self.selection.colors_mut();
        // first render takes a consecutive block; later ones reuse recorded slots
        let traces = match registry.reserve(sensor_id, &channels) {
            Some(start) => self.builder.build(sensor, data, start, mode, aggregation)?,
            None => {
                let colors = registry.assign(sensor_id, &channels);
                self.builder
                    .build_with_colors(sensor, data, &colors, mode, aggregation)?
            }
        };
        Ok(self.selection.attach(sensor_id, traces))
    }

    fn render_or_fail(&mut self, sensor_id: SensorId) -> bool {
        match self.render(sensor_id) {
            Ok(attached) => attached,
            Err(e) => {
                self.fail_sensor(sensor_id, &e);
                false
            }
        }
    }

    fn fail_sensor(&mut self, sensor_id: SensorId, error: &AnalysisError) {
        let name = self
            .sensors
            .iter()
            .find(|s| s.id == sensor_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("sensor {sensor_id}"));
        self.selection.mark_failed(sensor_id, error.to_string());
        self.notices
            .error(format!("Failed to load data for {}: {}", name, error));
    }

    pub fn begin_crop(&mut self) -> Result<TimeBounds> {
        let bounds = self.crop.begin(&self.cache)?;
        tracing::info!(
            "Test {} entered crop mode with {} to {}",
            self.test_id,
            bounds.start,
            bounds.end
        );
        Ok(bounds)
    }

    pub fn set_crop_bounds(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<CropPreview> {
        self.crop.set_range(start, end)?;
        self.crop_preview()
    }

    pub fn crop_preview(&self) -> Result<CropPreview> {
        self.crop.preview(&self.cache, self.segments.segments())
    }

    /// Claims the crop for one backend call; a second confirmation is a conflict.
    pub fn crop_command(&mut self, confirmed: bool) -> Result<CropCommand> {
        self.crop.command(confirmed)
    }

    /// The backend refused the crop; the range stays editable.
    pub fn crop_failed(&mut self) {
        self.crop.reopen();
    }

    /// After the backend deleted data outside the range: nothing cached is
    /// trustworthy any more, so every selected sensor is refetched.
    pub fn complete_crop(&mut self, outcome: &CropOutcome) -> Option<FetchPlan> {
        self.crop.finish();
        self.cache.invalidate_all();
        self.bump_epoch();
        self.notices.success(format!(
            "Crop complete: {} rows deleted ({} raw, {} aggregated)",
            outcome.total_deleted, outcome.raw_deleted, outcome.avg_deleted
        ));
        self.rebuild()
    }

    pub fn cancel_crop(&mut self) -> Result<()> {
        self.crop.cancel()?;
        self.notices.info("Crop cancelled, no data was deleted");
        Ok(())
    }

    pub fn export_progress(&self) -> watch::Receiver<ExportProgress> {
        self.export.progress.subscribe()
    }

    pub fn export_in_flight(&self) -> bool {
        self.export.progress.borrow().is_active()
    }

    /// Claims the export slot. Only one export is tracked per session.
    pub fn begin_export(&mut self) -> Result<Arc<watch::Sender<ExportProgress>>> {
        if self.export_in_flight() {
            return Err(AnalysisError::conflict(
                "an export is already in progress for this test",
            ));
        }
        // a finished job may still be waiting to clear its indicator
        self.export.abort();
        self.export.artifact = None;
        self.export.progress.send_replace(ExportProgress::Submitting);
        Ok(self.export.progress.clone())
    }

    pub fn track_export(&mut self, task: JoinHandle<()>) {
        self.export.abort();
        self.export.task = Some(task);
    }

    pub fn finish_export(&mut self, result: Result<ExportArtifact>) {
        match result {
            Ok(artifact) => {
                self.notices
                    .success(format!("Export ready: {}", artifact.file_name));
                let ready = ExportProgress::ready(&artifact);
                self.export.artifact = Some(artifact);
                // ready only once the artifact can be taken
                self.export.progress.send_replace(ready);
            }
            Err(e) => {
                self.notices.error(format!("Export failed: {}", e));
            }
        }
    }

    pub fn take_artifact(&mut self) -> Option<ExportArtifact> {
        self.export.artifact.take()
    }

    /// Stops background work owned by the session.
    pub fn close(&mut self) {
        self.export.abort();
        tracing::info!("Closed analysis session for test {}", self.test_id);
    }

    pub fn frame(&self, viewport_height: Option<u32>) -> ChartFrame {
        let rows: Vec<(&Sensor, _)> = self
            .selection
            .selected()
            .iter()
            .filter_map(|id| self.sensors.iter().find(|s| s.id == *id))
            .map(|s| (s, self.selection.colors().colors_for(s.id)))
            .collect();
        let layout = self
            .layout
            .build(&rows, &self.builder, &self.segments, viewport_height);

        ChartFrame {
            test_id: self.test_id,
            epoch: self.epoch,
            view: self.view,
            loading: self.selection.is_busy(),
            traces: self.selection.traces().to_vec(),
            layout,
            sensors: self
                .sensors
                .iter()
                .map(|s| SensorStatus {
                    sensor: s.clone(),
                    selected: self.selection.is_selected(s.id),
                    render: self.selection.render_state(s.id),
                })
                .collect(),
            segments: self.segments.segments().to_vec(),
            selected_segment: self.segments.selected(),
            editing: self.segments.editing().cloned(),
            crop: self.crop.state().clone(),
            export: self.export.progress.borrow().clone(),
            notices: self.notices.list(),
        }
    }
}
