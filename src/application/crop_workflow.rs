// Crop workflow - narrow the test to a time range and delete everything outside it
use crate::application::series_cache::SeriesCache;
use crate::domain::SegmentId;
use crate::domain::measurement::TimeBounds;
use crate::domain::segment::Segment;
use crate::error::{AnalysisError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CropState {
    #[default]
    Idle,
    Cropping {
        /// Global bounds of the loaded data when cropping began.
        data_bounds: TimeBounds,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// The delete has been sent; the range is frozen until the backend answers.
    Submitting {
        data_bounds: TimeBounds,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Warning shown before the operator confirms. Counts are computed from
/// cached data only; the backend decides what is actually deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropPreview {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub points_outside: usize,
    pub points_total: usize,
    /// Segments reaching outside the new range.
    pub segments_cut: Vec<SegmentId>,
    /// Segments whose start is not before their end.
    pub malformed_segments: Vec<SegmentId>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropCommand {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct CropWorkflow {
    state: CropState,
}

impl CropWorkflow {
    pub fn state(&self) -> &CropState {
        &self.state
    }

    /// Enters cropping with the earliest and latest cached timestamps across
    /// every loaded series as the default range.
    pub fn begin(&mut self, cache: &SeriesCache) -> Result<TimeBounds> {
        if matches!(self.state, CropState::Submitting { .. }) {
            return Err(submitting());
        }
        let bounds = cache
            .time_bounds()
            .ok_or_else(|| AnalysisError::validation("no measurement data is loaded to crop"))?;
        self.state = CropState::Cropping {
            data_bounds: bounds,
            start: bounds.start,
            end: bounds.end,
        };
        Ok(bounds)
    }

    /// Moves the range. A reversed or empty range is rejected and the previous
    /// range is kept.
    pub fn set_range(&mut self, new_start: DateTime<Utc>, new_end: DateTime<Utc>) -> Result<()> {
        match &mut self.state {
            CropState::Cropping { start, end, .. } => {
                if !TimeBounds::new(new_start, new_end).is_ordered() {
                    return Err(unordered());
                }
                *start = new_start;
                *end = new_end;
                Ok(())
            }
            CropState::Submitting { .. } => Err(submitting()),
            CropState::Idle => Err(not_cropping()),
        }
    }

    fn range(&self) -> Result<TimeBounds> {
        match &self.state {
            CropState::Cropping { start, end, .. } => {
                let range = TimeBounds::new(*start, *end);
                if !range.is_ordered() {
                    return Err(unordered());
                }
                Ok(range)
            }
            CropState::Submitting { .. } => Err(submitting()),
            CropState::Idle => Err(not_cropping()),
        }
    }

    pub fn preview(&self, cache: &SeriesCache, segments: &[Segment]) -> Result<CropPreview> {
        let range = self.range()?;
        let (points_outside, points_total) = cache.count_outside(&range);
        let malformed_segments: Vec<SegmentId> = segments
            .iter()
            .filter(|s| !s.is_well_formed())
            .map(|s| s.id)
            .collect();
        let segments_cut: Vec<SegmentId> = segments
            .iter()
            .filter(|s| s.is_well_formed())
            .filter(|s| !(range.contains(s.start_time) && range.contains(s.end_time)))
            .map(|s| s.id)
            .collect();

        let mut message = format!(
            "{} of {} loaded points fall outside {} to {} and will be permanently deleted.",
            points_outside,
            points_total,
            range.start.format("%Y-%m-%d %H:%M:%S"),
            range.end.format("%Y-%m-%d %H:%M:%S"),
        );
        if !segments_cut.is_empty() {
            message.push_str(&format!(
                " {} segment(s) extend beyond the new range.",
                segments_cut.len()
            ));
        }
        if !malformed_segments.is_empty() {
            message.push_str(&format!(
                " {} segment(s) have a start after their end.",
                malformed_segments.len()
            ));
        }
        message.push_str(" This cannot be undone.");

        Ok(CropPreview {
            start: range.start,
            end: range.end,
            points_outside,
            points_total,
            segments_cut,
            malformed_segments,
            message,
        })
    }

    /// The delete command for the current range. Requires explicit confirmation
    /// and freezes the range until [`CropWorkflow::finish`] or [`CropWorkflow::reopen`].
    pub fn command(&mut self, confirmed: bool) -> Result<CropCommand> {
        let range = self.range()?;
        if !confirmed {
            return Err(AnalysisError::validation(
                "cropping deletes data permanently and must be confirmed",
            ));
        }
        if let CropState::Cropping { data_bounds, .. } = self.state {
            self.state = CropState::Submitting {
                data_bounds,
                start: range.start,
                end: range.end,
            };
        }
        Ok(CropCommand {
            start: range.start,
            end: range.end,
        })
    }

    /// The backend refused the delete; the operator may adjust and retry.
    pub fn reopen(&mut self) {
        if let CropState::Submitting {
            data_bounds,
            start,
            end,
        } = self.state
        {
            self.state = CropState::Cropping {
                data_bounds,
                start,
                end,
            };
        }
    }

    /// Back to idle after the backend accepted the crop.
    pub fn finish(&mut self) {
        self.state = CropState::Idle;
    }

    pub fn cancel(&mut self) -> Result<()> {
        if matches!(self.state, CropState::Submitting { .. }) {
            return Err(submitting());
        }
        self.state = CropState::Idle;
        Ok(())
    }
}

fn unordered() -> AnalysisError {
    AnalysisError::validation("crop start must be before crop end")
}

fn not_cropping() -> AnalysisError {
    AnalysisError::conflict("crop mode is not active")
}

fn submitting() -> AnalysisError {
    AnalysisError::conflict("a crop is already being applied")
}
