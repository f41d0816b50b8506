// In-memory scripted backend for tests
use crate::application::analysis_repository::{
    AggregateQuery, CropOutcome, ExportPayload, ExportQueue, MeasurementStore, RawQuery,
    SegmentStore,
};
use crate::domain::export::{ExportRequest, ExportStatus, JobStatusReport};
use crate::domain::measurement::{DataMode, MeasurementAggregate, MeasurementRaw};
use crate::domain::segment::{Segment, SegmentDraft};
use crate::domain::sensor::Sensor;
use crate::domain::{SegmentId, SensorId, TestId};
use crate::error::{AnalysisError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

pub fn raw_rows(times: &[i64], value: f64) -> Vec<MeasurementRaw> {
    times
        .iter()
        .map(|&t| MeasurementRaw {
            timestamp: at(t),
            channel: None,
            value,
        })
        .collect()
}

pub fn aggregate_rows(times: &[i64]) -> Vec<MeasurementAggregate> {
    times
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let base = i as f64;
            MeasurementAggregate {
                timestamp: at(t),
                channel: None,
                min_value: base,
                max_value: base + 2.0,
                avg_value: base + 1.0,
                min_abs_value: base,
                max_abs_value: base + 2.0,
                avg_abs_value: base + 1.0,
            }
        })
        .collect()
}

pub fn status(status: ExportStatus, progress: f64) -> JobStatusReport {
    JobStatusReport {
        status,
        progress,
        error: None,
    }
}

fn transport(what: &str) -> AnalysisError {
    AnalysisError::Transport {
        url: format!("fake://{what}"),
        message: "connection refused".to_string(),
    }
}

#[derive(Default)]
struct FakeState {
    sensors: Vec<Sensor>,
    raw: HashMap<SensorId, Vec<MeasurementRaw>>,
    aggregate: HashMap<SensorId, Vec<MeasurementAggregate>>,
    failing: HashSet<SensorId>,
    fetches: HashMap<(SensorId, DataMode), usize>,
    segments: Vec<Segment>,
    next_segment_id: SegmentId,
    crops: Vec<(TestId, DateTime<Utc>, DateTime<Utc>)>,
    refuse_crops: bool,
    submissions: Vec<(TestId, ExportRequest)>,
    status_script: VecDeque<Result<JobStatusReport>>,
    status_polls: usize,
    downloads: usize,
}

/// Serves fixed sensors, measurements and segments; export status replies are
/// taken from a script, the last entry repeating once the script runs out.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensor(
        self,
        sensor: Sensor,
        aggregate: Vec<MeasurementAggregate>,
        raw: Vec<MeasurementRaw>,
    ) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.aggregate.insert(sensor.id, aggregate);
            state.raw.insert(sensor.id, raw);
            state.sensors.push(sensor);
        }
        self
    }

    pub fn with_segment(self, segment: Segment) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_segment_id = state.next_segment_id.max(segment.id);
            state.segments.push(segment);
        }
        self
    }

    pub fn with_status_script(self, script: Vec<Result<JobStatusReport>>) -> Self {
        self.state.lock().unwrap().status_script = script.into();
        self
    }

    pub fn fail_sensor(&self, sensor_id: SensorId) {
        self.state.lock().unwrap().failing.insert(sensor_id);
    }

    pub fn heal_sensor(&self, sensor_id: SensorId) {
        self.state.lock().unwrap().failing.remove(&sensor_id);
    }

    pub fn refuse_crops(&self) {
        self.state.lock().unwrap().refuse_crops = true;
    }

    pub fn fetch_count(&self, sensor_id: SensorId, mode: DataMode) -> usize {
        let state = self.state.lock().unwrap();
        state.fetches.get(&(sensor_id, mode)).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.state.lock().unwrap().fetches.values().sum()
    }

    pub fn crops(&self) -> Vec<(TestId, DateTime<Utc>, DateTime<Utc>)> {
        self.state.lock().unwrap().crops.clone()
    }

    pub fn submissions(&self) -> usize {
        self.state.lock().unwrap().submissions.len()
    }

    pub fn last_submission(&self) -> Option<(TestId, ExportRequest)> {
        self.state.lock().unwrap().submissions.last().cloned()
    }

    pub fn status_polls(&self) -> usize {
        self.state.lock().unwrap().status_polls
    }

    pub fn downloads(&self) -> usize {
        self.state.lock().unwrap().downloads
    }

    fn record_fetch(&self, sensor_id: SensorId, mode: DataMode) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        *state.fetches.entry((sensor_id, mode)).or_default() += 1;
        if state.failing.contains(&sensor_id) {
            return Err(transport(&format!("measurements/{sensor_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl MeasurementStore for FakeBackend {
    async fn list_test_sensors(&self, _test_id: TestId) -> Result<Vec<Sensor>> {
        Ok(self.state.lock().unwrap().sensors.clone())
    }

    async fn fetch_raw(&self, sensor_id: SensorId, query: RawQuery) -> Result<Vec<MeasurementRaw>> {
        self.record_fetch(sensor_id, DataMode::Raw)?;
        let state = self.state.lock().unwrap();
        let mut rows = state.raw.get(&sensor_id).cloned().unwrap_or_default();
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn fetch_aggregate(
        &self,
        sensor_id: SensorId,
        query: AggregateQuery,
    ) -> Result<Vec<MeasurementAggregate>> {
        self.record_fetch(sensor_id, DataMode::Aggregated)?;
        let state = self.state.lock().unwrap();
        let mut rows = state.aggregate.get(&sensor_id).cloned().unwrap_or_default();
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn crop(
        &self,
        test_id: TestId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CropOutcome> {
        let mut state = self.state.lock().unwrap();
        state.crops.push((test_id, start, end));
        if state.refuse_crops {
            return Err(transport("crop"));
        }
        let mut raw_deleted = 0;
        for rows in state.raw.values_mut() {
            let before = rows.len();
            rows.retain(|r| r.timestamp >= start && r.timestamp <= end);
            raw_deleted += (before - rows.len()) as u64;
        }
        let mut avg_deleted = 0;
        for rows in state.aggregate.values_mut() {
            let before = rows.len();
            rows.retain(|r| r.timestamp >= start && r.timestamp <= end);
            avg_deleted += (before - rows.len()) as u64;
        }
        Ok(CropOutcome {
            raw_deleted,
            avg_deleted,
            total_deleted: raw_deleted + avg_deleted,
        })
    }
}

#[async_trait]
impl SegmentStore for FakeBackend {
    async fn list_segments(&self, test_id: TestId) -> Result<Vec<Segment>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .segments
            .iter()
            .filter(|s| s.test_id == test_id)
            .cloned()
            .collect())
    }

    async fn create_segment(&self, test_id: TestId, draft: &SegmentDraft) -> Result<Segment> {
        let mut state = self.state.lock().unwrap();
        state.next_segment_id += 1;
        let segment = Segment {
            id: state.next_segment_id,
            test_id,
            name: draft.name.clone(),
            start_time: draft.start_time,
            end_time: draft.end_time,
            created_at: Some(Utc::now()),
            last_modified_at: None,
        };
        state.segments.push(segment.clone());
        Ok(segment)
    }

    async fn update_segment(&self, segment_id: SegmentId, draft: &SegmentDraft) -> Result<Segment> {
        let mut state = self.state.lock().unwrap();
        let segment = state
            .segments
            .iter_mut()
            .find(|s| s.id == segment_id)
            .ok_or(AnalysisError::Server {
                status: 404,
                body: "segment not found".to_string(),
            })?;
        segment.name = draft.name.clone();
        segment.start_time = draft.start_time;
        segment.end_time = draft.end_time;
        segment.last_modified_at = Some(Utc::now());
        Ok(segment.clone())
    }

    async fn delete_segment(&self, segment_id: SegmentId) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .segments
            .retain(|s| s.id != segment_id);
        Ok(())
    }
}

#[async_trait]
impl ExportQueue for FakeBackend {
    async fn submit_export(&self, test_id: TestId, request: &ExportRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.submissions.push((test_id, request.clone()));
        Ok(format!("job-{}", state.submissions.len()))
    }

    async fn export_status(&self, _job_id: &str) -> Result<JobStatusReport> {
        let mut state = self.state.lock().unwrap();
        state.status_polls += 1;
        if state.status_script.len() > 1 {
            if let Some(next) = state.status_script.pop_front() {
                return next;
            }
        }
        state
            .status_script
            .front()
            .cloned()
            .unwrap_or_else(|| Ok(status(ExportStatus::Queued, 0.0)))
    }

    async fn download_export(&self, _job_id: &str) -> Result<ExportPayload> {
        self.state.lock().unwrap().downloads += 1;
        Ok(ExportPayload {
            content_type: "text/csv".to_string(),
            bytes: Bytes::from_static(b"timestamp,value\n"),
        })
    }
}
