// Export job domain models and the client-side file naming convention
use super::{SegmentId, TestId};
use crate::error::{AnalysisError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportDataType {
    Aggregated,
    Raw,
}

impl ExportDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportDataType::Aggregated => "aggregated",
            ExportDataType::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportTimeRange {
    Whole,
    Segment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub data_type: ExportDataType,
    pub time_range: ExportTimeRange,
    #[serde(default)]
    pub segment_id: Option<SegmentId>,
}

impl ExportRequest {
    pub fn validate(&self) -> Result<()> {
        match (self.data_type, self.time_range, self.segment_id) {
            (ExportDataType::Raw, ExportTimeRange::Whole, _) => Err(AnalysisError::validation(
                "raw exports must be limited to a segment",
            )),
            (_, ExportTimeRange::Segment, None) => {
                Err(AnalysisError::validation("select a segment to export"))
            }
            _ => Ok(()),
        }
    }

    /// The request as sent to the backend: a whole-test export carries no segment.
    pub fn scoped(mut self) -> Self {
        if self.time_range == ExportTimeRange::Whole {
            self.segment_id = None;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Completed | ExportStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            ExportStatus::Queued => 0,
            ExportStatus::Processing => 1,
            ExportStatus::Completed | ExportStatus::Failed => 2,
        }
    }
}

/// One status poll response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub status: ExportStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportJob {
    pub id: String,
    pub status: ExportStatus,
    pub progress: u8,
    pub result_ref: Option<String>,
    pub error: Option<String>,
}

impl ExportJob {
    pub fn new(id: String) -> Self {
        Self {
            id,
            status: ExportStatus::Queued,
            progress: 0,
            result_ref: None,
            error: None,
        }
    }

    /// Applies a poll result. Status only moves forward and terminal states are
    /// final; returns false when the report was ignored.
    pub fn advance(&mut self, report: &JobStatusReport) -> bool {
        if self.status.is_terminal() || report.status.rank() < self.status.rank() {
            return false;
        }
        self.status = report.status;
        let reported = report.progress.clamp(0.0, 100.0).round() as u8;
        self.progress = self.progress.max(reported);
        match report.status {
            ExportStatus::Completed => {
                self.progress = 100;
                self.result_ref = Some(self.id.clone());
            }
            ExportStatus::Failed => {
                self.error = Some(
                    report
                        .error
                        .clone()
                        .unwrap_or_else(|| "export failed".to_string()),
                );
            }
            _ => {}
        }
        true
    }
}

/// Downloaded result of a completed job, ready to be saved by the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub job_id: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// `test_{id}_{dataType}[_{segmentName}]_{timestamp}.{ext}`
pub fn export_file_name(
    test_id: TestId,
    data_type: ExportDataType,
    segment_name: Option<&str>,
    at: DateTime<Utc>,
    content_type: &str,
) -> String {
    let mut name = format!("test_{}_{}", test_id, data_type.as_str());
    if let Some(segment) = segment_name.map(sanitize_name).filter(|s| !s.is_empty()) {
        name.push('_');
        name.push_str(&segment);
    }
    format!(
        "{}_{}.{}",
        name,
        at.format("%Y%m%d_%H%M%S"),
        extension_for(content_type)
    )
}

fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence {
        "text/csv" => "csv",
        "application/zip" | "application/x-zip-compressed" => "zip",
        "application/vnd.apache.parquet" | "application/x-parquet" => "parquet",
        "application/json" => "json",
        _ => "bin",
    }
}

fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
