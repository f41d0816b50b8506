// Repository traits for the measurement backend, segment store and export queue
use crate::domain::export::{ExportRequest, JobStatusReport};
use crate::domain::measurement::{DataMode, MeasurementAggregate, MeasurementRaw, Measurements};
use crate::domain::segment::{Segment, SegmentDraft};
use crate::domain::sensor::Sensor;
use crate::domain::{SegmentId, SensorId, TestId};
use crate::error::Result;
use crate::infrastructure::config::AnalysisSettings;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawQuery {
    pub limit: usize,
    pub last_minutes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateQuery {
    pub limit: usize,
}

/// Row counts removed by a crop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropOutcome {
    #[serde(default, alias = "rawDeleted")]
    pub raw_deleted: u64,
    #[serde(default, alias = "avgDeleted")]
    pub avg_deleted: u64,
    #[serde(default, alias = "totalDeleted")]
    pub total_deleted: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportPayload {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Measurement data access. Errors are passed through unmodified; nothing retries.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Sensors attached to a test, one per test relation
    async fn list_test_sensors(&self, test_id: TestId) -> Result<Vec<Sensor>>;

    async fn fetch_raw(&self, sensor_id: SensorId, query: RawQuery) -> Result<Vec<MeasurementRaw>>;

    async fn fetch_aggregate(
        &self,
        sensor_id: SensorId,
        query: AggregateQuery,
    ) -> Result<Vec<MeasurementAggregate>>;

    /// Deletes every raw and aggregated row of the test outside `[start, end]`.
    /// There is no undo.
    async fn crop(
        &self,
        test_id: TestId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CropOutcome>;
}

#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn list_segments(&self, test_id: TestId) -> Result<Vec<Segment>>;

    async fn create_segment(&self, test_id: TestId, draft: &SegmentDraft) -> Result<Segment>;

    async fn update_segment(&self, segment_id: SegmentId, draft: &SegmentDraft) -> Result<Segment>;

    async fn delete_segment(&self, segment_id: SegmentId) -> Result<()>;
}

#[async_trait]
pub trait ExportQueue: Send + Sync {
    /// Returns the job id
    async fn submit_export(&self, test_id: TestId, request: &ExportRequest) -> Result<String>;

    async fn export_status(&self, job_id: &str) -> Result<JobStatusReport>;

    async fn download_export(&self, job_id: &str) -> Result<ExportPayload>;
}

/// Fetch one sensor's series in the given mode with the configured row caps.
pub async fn fetch_series(
    store: &dyn MeasurementStore,
    sensor_id: SensorId,
    mode: DataMode,
    settings: &AnalysisSettings,
) -> Result<Measurements> {
    match mode {
        DataMode::Aggregated => {
            let query = AggregateQuery {
                limit: settings.aggregate_limit,
            };
            Ok(Measurements::Aggregated(
                store.fetch_aggregate(sensor_id, query).await?,
            ))
        }
        DataMode::Raw => {
            let query = RawQuery {
                limit: settings.raw_limit,
                last_minutes: settings.raw_last_minutes,
            };
            Ok(Measurements::Raw(store.fetch_raw(sensor_id, query).await?))
        }
    }
}
