// Trace builder - measurement rows to renderable line and band traces
use crate::domain::measurement::{
    channel_key, AggregationType, DataMode, MeasurementAggregate, MeasurementRaw, Measurements,
};
use crate::domain::palette::{hex_to_rgba, RANGE_FILL_ALPHA, SENSOR_COLORS};
use crate::domain::sensor::Sensor;
use crate::domain::trace::{LineDash, Statistic, TimeSeriesPoint, Trace, TraceStyle};
use crate::error::{AnalysisError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

const RAW_LINE_WIDTH: f32 = 1.0;
const BAND_LINE_WIDTH: f32 = 1.0;
const AVG_LINE_WIDTH: f32 = 2.0;
const AVG_MARKER_SIZE: f32 = 4.0;

/// Palette index per channel; `None` is the unlabeled channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelColors {
    by_channel: BTreeMap<Option<String>, usize>,
}

impl ChannelColors {
    /// Consecutive indices starting at `start`, in channel order.
    pub fn sequential(channels: &[Option<String>], start: usize) -> Self {
        let by_channel = channels
            .iter()
            .enumerate()
            .map(|(offset, channel)| (channel.clone(), start + offset))
            .collect();
        Self { by_channel }
    }

    pub fn insert(&mut self, channel: Option<String>, index: usize) {
        self.by_channel.insert(channel, index);
    }

    pub fn index_for(&self, channel: &Option<String>) -> Option<usize> {
        self.by_channel.get(channel).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Option<String>, usize)> {
        self.by_channel.iter().map(|(channel, index)| (channel, *index))
    }
}

#[derive(Debug, Clone)]
pub struct TraceBuilder {
    palette: Vec<String>,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new(SENSOR_COLORS.iter().map(|c| c.to_string()).collect())
    }
}

impl TraceBuilder {
    pub fn new(palette: Vec<String>) -> Self {
        if palette.is_empty() {
            return Self::default();
        }
        Self { palette }
    }

    /// Palette colour for an index, wrapping around.
    pub fn color(&self, index: usize) -> &str {
        &self.palette[index % self.palette.len()]
    }

    /// Distinct channel keys present in the data, in ascending order.
    pub fn channels(measurements: &Measurements) -> Vec<Option<String>> {
        let keys: Box<dyn Iterator<Item = Option<&str>> + '_> = match measurements {
            Measurements::Aggregated(rows) => {
                Box::new(rows.iter().map(|r| channel_key(r.channel.as_deref())))
            }
            Measurements::Raw(rows) => {
                Box::new(rows.iter().map(|r| channel_key(r.channel.as_deref())))
            }
        };
        let mut channels: Vec<Option<String>> = keys.map(|k| k.map(str::to_string)).collect();
        channels.sort();
        channels.dedup();
        channels
    }

    /// Builds every trace for one sensor. Channel colours come from consecutive
    /// palette slots starting at `color_index`.
    pub fn build(
        &self,
        sensor: &Sensor,
        measurements: &Measurements,
        color_index: usize,
        mode: DataMode,
        aggregation: AggregationType,
    ) -> Result<Vec<Trace>> {
        let colors = ChannelColors::sequential(&Self::channels(measurements), color_index);
        self.build_with_colors(sensor, measurements, &colors, mode, aggregation)
    }

    /// Like [`TraceBuilder::build`], with colours looked up per channel.
    /// Channels missing from `colors` take their position in channel order.
    pub fn build_with_colors(
        &self,
        sensor: &Sensor,
        measurements: &Measurements,
        colors: &ChannelColors,
        mode: DataMode,
        aggregation: AggregationType,
    ) -> Result<Vec<Trace>> {
        if measurements.mode() != mode {
            return Err(AnalysisError::validation(format!(
                "cannot build {} traces from {} measurements",
                mode.as_str(),
                measurements.mode().as_str()
            )));
        }

        let mut traces = Vec::new();
        match measurements {
            Measurements::Raw(rows) => {
                for (position, (channel, rows)) in group_by_channel(rows, |r| &r.channel, |r| r.timestamp)
                    .into_iter()
                    .enumerate()
                {
                    let color = self.channel_color(colors, &channel, position);
                    traces.push(raw_trace(sensor, channel, &rows, color));
                }
            }
            Measurements::Aggregated(rows) => {
                for (position, (channel, rows)) in group_by_channel(rows, |r| &r.channel, |r| r.timestamp)
                    .into_iter()
                    .enumerate()
                {
                    let color = self.channel_color(colors, &channel, position);
                    traces.extend(aggregate_traces(sensor, channel, &rows, color, aggregation));
                }
            }
        }
        Ok(traces)
    }

    fn channel_color(&self, colors: &ChannelColors, channel: &Option<String>, position: usize) -> String {
        let index = colors.index_for(channel).unwrap_or(position);
        self.color(index).to_string()
    }
}

/// Groups rows by folded channel key and sorts each group by timestamp.
/// The sort is stable so equal timestamps keep their input order.
fn group_by_channel<'a, T>(
    rows: &'a [T],
    channel: impl Fn(&T) -> &Option<String>,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> BTreeMap<Option<String>, Vec<&'a T>> {
    let mut groups: BTreeMap<Option<String>, Vec<&T>> = BTreeMap::new();
    for row in rows {
        let key = channel_key(channel(row).as_deref()).map(str::to_string);
        groups.entry(key).or_default().push(row);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|row: &&T| timestamp(*row));
    }
    groups
}

fn line_style(color: &str, width: f32, dash: LineDash, marker_size: Option<f32>) -> TraceStyle {
    TraceStyle {
        color: color.to_string(),
        width,
        dash,
        marker_size,
        fill: None,
    }
}

fn raw_trace(sensor: &Sensor, channel: Option<String>, rows: &[&MeasurementRaw], color: String) -> Trace {
    let points = rows
        .iter()
        .map(|r| TimeSeriesPoint::new(r.timestamp.timestamp_millis(), r.value))
        .collect();
    Trace {
        sensor_id: sensor.id,
        name: sensor.trace_label(channel.as_deref()),
        channel,
        statistic: Statistic::Raw,
        unit: sensor.unit.clone(),
        points,
        style: line_style(&color, RAW_LINE_WIDTH, LineDash::Solid, None),
    }
}

/// Range band, max line, min line and average line for one channel.
fn aggregate_traces(
    sensor: &Sensor,
    channel: Option<String>,
    rows: &[&MeasurementAggregate],
    color: String,
    aggregation: AggregationType,
) -> Vec<Trace> {
    let label = sensor.trace_label(channel.as_deref());
    let stats: Vec<(i64, f64, f64, f64)> = rows
        .iter()
        .map(|r| {
            let s = r.statistics(aggregation);
            (r.timestamp.timestamp_millis(), s.min, s.max, s.avg)
        })
        .collect();

    let maxima: Vec<TimeSeriesPoint> = stats.iter().map(|&(t, _, max, _)| TimeSeriesPoint::new(t, max)).collect();
    let minima: Vec<TimeSeriesPoint> = stats.iter().map(|&(t, min, _, _)| TimeSeriesPoint::new(t, min)).collect();
    let averages: Vec<TimeSeriesPoint> = stats.iter().map(|&(t, _, _, avg)| TimeSeriesPoint::new(t, avg)).collect();
    let polygon: Vec<TimeSeriesPoint> = maxima.iter().chain(minima.iter().rev()).copied().collect();

    let trace = |statistic: Statistic, name: String, points: Vec<TimeSeriesPoint>, style: TraceStyle| Trace {
        sensor_id: sensor.id,
        channel: channel.clone(),
        statistic,
        name,
        unit: sensor.unit.clone(),
        points,
        style,
    };

    let band = TraceStyle {
        color: color.clone(),
        width: 0.0,
        dash: LineDash::Solid,
        marker_size: None,
        fill: Some(hex_to_rgba(&color, RANGE_FILL_ALPHA)),
    };

    vec![
        trace(Statistic::Range, format!("{} range", label), polygon, band),
        trace(
            Statistic::Max,
            format!("{} max", label),
            maxima,
            line_style(&color, BAND_LINE_WIDTH, LineDash::Dot, None),
        ),
        trace(
            Statistic::Min,
            format!("{} min", label),
            minima,
            line_style(&color, BAND_LINE_WIDTH, LineDash::Dot, None),
        ),
        trace(
            Statistic::Avg,
            label.clone(),
            averages,
            line_style(&color, AVG_LINE_WIDTH, LineDash::Solid, Some(AVG_MARKER_SIZE)),
        ),
    ]
}
