// Segment domain model - named time ranges annotated on a test
use super::measurement::{deserialize_optional_timestamp, deserialize_timestamp};
use super::{SegmentId, TestId};
use crate::error::{AnalysisError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub test_id: TestId,
    #[serde(alias = "segment_name")]
    pub name: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub end_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl Segment {
    /// The store does not enforce ordering, so callers spanning segments check this.
    pub fn is_well_formed(&self) -> bool {
        self.start_time < self.end_time
    }

    pub fn draft(&self) -> SegmentDraft {
        SegmentDraft {
            name: self.name.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Operator-editable fields of a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDraft {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl SegmentDraft {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AnalysisError::validation("segment name is required"));
        }
        if self.start_time >= self.end_time {
            return Err(AnalysisError::validation(
                "segment start time must be before its end time",
            ));
        }
        Ok(())
    }
}
