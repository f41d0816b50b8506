// Chart frame - everything a rendering surface needs for one redraw
use crate::application::crop_workflow::CropState;
use crate::application::export_controller::ExportProgress;
use crate::application::notices::Notice;
use crate::application::segment_manager::SegmentEdit;
use crate::application::selection::SensorRenderState;
use crate::domain::layout::LayoutHints;
use crate::domain::measurement::{AggregationType, DataMode};
use crate::domain::segment::Segment;
use crate::domain::sensor::Sensor;
use crate::domain::trace::Trace;
use crate::domain::{SegmentId, TestId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOptions {
    #[serde(default)]
    pub mode: DataMode,
    #[serde(default)]
    pub aggregation: AggregationType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus {
    pub sensor: Sensor,
    pub selected: bool,
    #[serde(flatten)]
    pub render: SensorRenderState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartFrame {
    pub test_id: TestId,
    pub epoch: u64,
    pub view: ViewOptions,
    /// True while any selected sensor is waiting on a fetch.
    pub loading: bool,
    pub traces: Vec<Trace>,
    pub layout: LayoutHints,
    pub sensors: Vec<SensorStatus>,
    pub segments: Vec<Segment>,
    pub selected_segment: Option<SegmentId>,
    pub editing: Option<SegmentEdit>,
    pub crop: CropState,
    pub export: ExportProgress,
    pub notices: Vec<Notice>,
}
