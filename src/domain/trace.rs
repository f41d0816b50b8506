// Renderable trace models derived from measurements
use super::SensorId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    /// Closed min/max polygon.
    Range,
    Min,
    Max,
    Avg,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineDash {
    Solid,
    Dot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStyle {
    pub color: String,
    pub width: f32,
    pub dash: LineDash,
    pub marker_size: Option<f32>,
    /// Fill colour for closed polygons.
    pub fill: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub sensor_id: SensorId,
    pub channel: Option<String>,
    pub statistic: Statistic,
    pub name: String,
    pub unit: Option<String>,
    pub points: Vec<TimeSeriesPoint>,
    pub style: TraceStyle,
}

impl Trace {
    #[cfg(test)]
    pub fn is_line(&self) -> bool {
        self.statistic != Statistic::Range
    }
}
