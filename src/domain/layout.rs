// Layout hints handed to the rendering surface alongside the traces
use super::{SegmentId, SensorId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subplot {
    pub sensor_id: SensorId,
    pub index: usize,
    pub x_axis: String,
    pub y_axis: String,
    /// Axis this subplot's x axis is linked to; `None` for the first subplot.
    pub x_matches: Option<String>,
    /// Vertical paper-coordinate domain `[bottom, top]`.
    pub domain: [f64; 2],
    pub show_tick_labels: bool,
    pub y_title: String,
}

/// Rectangle spanning a segment's time range over a subplot's full height.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shape {
    pub segment_id: SegmentId,
    pub x_ref: String,
    pub y_ref: String,
    pub x0_ms: i64,
    pub x1_ms: i64,
    pub y0: f64,
    pub y1: f64,
    pub fill_color: String,
    pub line_color: String,
    pub line_width: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub channel: String,
    pub color: String,
}

/// Caption placed at the top of a subplot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub sensor_id: SensorId,
    pub text: String,
    /// Labelled channels only; the unlabeled channel has no entry.
    pub legend: Vec<LegendEntry>,
    pub y_ref: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayoutHints {
    pub subplots: Vec<Subplot>,
    pub shapes: Vec<Shape>,
    pub annotations: Vec<Annotation>,
    pub height: u32,
}

/// Axis ids for a subplot: `x`/`y` for the first, `x{n}`/`y{n}` after that.
pub fn axis_ids(index: usize) -> (String, String) {
    if index == 0 {
        ("x".to_string(), "y".to_string())
    } else {
        (format!("x{}", index + 1), format!("y{}", index + 1))
    }
}
