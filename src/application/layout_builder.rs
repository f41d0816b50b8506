// Layout builder - stacked subplots, captions and segment overlays
use crate::application::segment_manager::SegmentManager;
use crate::application::trace_builder::{ChannelColors, TraceBuilder};
use crate::domain::layout::{axis_ids, Annotation, LayoutHints, LegendEntry, Subplot};
use crate::domain::sensor::Sensor;
use crate::infrastructure::config::AnalysisSettings;

const SUBPLOT_GAP: f64 = 0.01;
const CAPTION_X: f64 = 0.5;
const CAPTION_Y: f64 = 0.98;

#[derive(Debug, Clone, Copy)]
pub struct LayoutBuilder {
    min_subplot_height: u32,
    viewport_chrome: u32,
}

impl LayoutBuilder {
    pub fn new(settings: &AnalysisSettings) -> Self {
        Self {
            min_subplot_height: settings.min_subplot_height,
            viewport_chrome: settings.viewport_chrome,
        }
    }

    /// `rows` are the charted sensors in selection order with their channel colours.
    pub fn build(
        &self,
        rows: &[(&Sensor, ChannelColors)],
        palette: &TraceBuilder,
        segments: &SegmentManager,
        viewport_height: Option<u32>,
    ) -> LayoutHints {
        let n = rows.len();
        let mut subplots = Vec::with_capacity(n);
        let mut annotations = Vec::with_capacity(n);

        for (index, (sensor, colors)) in rows.iter().enumerate() {
            let (x_axis, y_axis) = axis_ids(index);
            subplots.push(Subplot {
                sensor_id: sensor.id,
                index,
                x_axis,
                y_axis: y_axis.clone(),
                x_matches: (index > 0).then(|| "x".to_string()),
                domain: row_domain(index, n),
                show_tick_labels: index + 1 == n,
                y_title: sensor.unit.clone().unwrap_or_default(),
            });

            let legend: Vec<LegendEntry> = colors
                .iter()
                .filter_map(|(channel, color_index)| {
                    channel.as_ref().map(|c| LegendEntry {
                        channel: c.to_uppercase(),
                        color: palette.color(color_index).to_string(),
                    })
                })
                .collect();
            let legend_text = legend
                .iter()
                .map(|e| format!("● {}", e.channel))
                .collect::<Vec<_>>()
                .join("  ");
            annotations.push(Annotation {
                sensor_id: sensor.id,
                text: format!(
                    "{} • {} • {}",
                    sensor.name,
                    sensor.location_label(),
                    legend_text
                ),
                legend,
                y_ref: format!("{} domain", y_axis),
                x: CAPTION_X,
                y: CAPTION_Y,
            });
        }

        let shapes = segments.shapes(&subplots);
        LayoutHints {
            subplots,
            shapes,
            annotations,
            height: self.height(n, viewport_height),
        }
    }

    /// Each subplot gets at least the minimum height; a taller viewport is filled.
    pub fn height(&self, subplots: usize, viewport_height: Option<u32>) -> u32 {
        let stacked = self.min_subplot_height.saturating_mul(subplots as u32);
        match viewport_height {
            Some(v) => stacked.max(v.saturating_sub(self.viewport_chrome)),
            None => stacked,
        }
    }
}

/// Row `i` of `n`, counted from the top, with a small gap below each row.
fn row_domain(index: usize, n: usize) -> [f64; 2] {
    let n = n as f64;
    let top = 1.0 - index as f64 / n;
    let bottom = (top - (1.0 / n - SUBPLOT_GAP)).max(0.0);
    [bottom, top]
}
