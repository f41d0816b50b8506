// Segment manager - local copy of a test's segments, highlight and inline edit state
use crate::domain::SegmentId;
use crate::domain::layout::{Shape, Subplot};
use crate::domain::palette::{hex_to_rgba, SEGMENT_BORDER_ALPHA, SEGMENT_COLORS, SEGMENT_FILL_ALPHA};
use crate::domain::segment::{Segment, SegmentDraft};
use crate::error::{AnalysisError, Result};
use serde::Serialize;

const SELECTED_BORDER_WIDTH: f32 = 3.0;
const BORDER_WIDTH: f32 = 1.0;

/// Inline edit buffer for one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentEdit {
    pub segment_id: SegmentId,
    pub draft: SegmentDraft,
}

#[derive(Debug, Default)]
pub struct SegmentManager {
    /// Creation order.
    segments: Vec<Segment>,
    selected: Option<SegmentId>,
    editing: Option<SegmentEdit>,
}

impl SegmentManager {
    pub fn new(segments: Vec<Segment>) -> Self {
        let mut manager = Self::default();
        manager.replace_all(segments);
        manager
    }

    /// Replaces the local copy with a fresh listing from the store. Selection
    /// and edit state survive only if their segment still exists.
    pub fn replace_all(&mut self, mut segments: Vec<Segment>) {
        segments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.segments = segments;
        if self.selected.is_some_and(|id| self.get(id).is_none()) {
            self.selected = None;
        }
        if self
            .editing
            .as_ref()
            .is_some_and(|edit| self.get(edit.segment_id).is_none())
        {
            self.editing = None;
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get(&self, segment_id: SegmentId) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == segment_id)
    }

    pub fn require(&self, segment_id: SegmentId) -> Result<&Segment> {
        self.get(segment_id)
            .ok_or(AnalysisError::UnknownSegment(segment_id))
    }

    pub fn selected(&self) -> Option<SegmentId> {
        self.selected
    }

    /// Row click: highlights the segment, or clears the highlight when it is
    /// already highlighted. A segment under edit cannot be highlighted.
    pub fn click(&mut self, segment_id: SegmentId) -> Result<Option<SegmentId>> {
        self.require(segment_id)?;
        if self.is_editing(segment_id) {
            return Err(AnalysisError::conflict(
                "segment is being edited and cannot be selected",
            ));
        }
        self.selected = if self.selected == Some(segment_id) {
            None
        } else {
            Some(segment_id)
        };
        Ok(self.selected)
    }

    pub fn begin_edit(&mut self, segment_id: SegmentId) -> Result<&SegmentEdit> {
        let draft = self.require(segment_id)?.draft();
        if self.selected == Some(segment_id) {
            self.selected = None;
        }
        Ok(&*self.editing.insert(SegmentEdit { segment_id, draft }))
    }

    pub fn editing(&self) -> Option<&SegmentEdit> {
        self.editing.as_ref()
    }

    pub fn is_editing(&self, segment_id: SegmentId) -> bool {
        self.editing
            .as_ref()
            .is_some_and(|edit| edit.segment_id == segment_id)
    }

    pub fn cancel_edit(&mut self) -> Option<SegmentEdit> {
        self.editing.take()
    }

    /// Ends the edit if it belongs to `segment_id`.
    pub fn finish_edit(&mut self, segment_id: SegmentId) {
        if self.is_editing(segment_id) {
            self.editing = None;
        }
    }

    /// One rectangle per segment per subplot, spanning the subplot's height.
    pub fn shapes(&self, subplots: &[Subplot]) -> Vec<Shape> {
        let mut shapes = Vec::with_capacity(self.segments.len() * subplots.len());
        for (position, segment) in self.segments.iter().enumerate() {
            let color = SEGMENT_COLORS[position % SEGMENT_COLORS.len()];
            let line_width = if self.selected == Some(segment.id) {
                SELECTED_BORDER_WIDTH
            } else {
                BORDER_WIDTH
            };
            for subplot in subplots {
                shapes.push(Shape {
                    segment_id: segment.id,
                    x_ref: subplot.x_axis.clone(),
                    y_ref: format!("{} domain", subplot.y_axis),
                    x0_ms: segment.start_time.timestamp_millis(),
                    x1_ms: segment.end_time.timestamp_millis(),
                    y0: 0.0,
                    y1: 1.0,
                    fill_color: hex_to_rgba(color, SEGMENT_FILL_ALPHA),
                    line_color: hex_to_rgba(color, SEGMENT_BORDER_ALPHA),
                    line_width,
                });
            }
        }
        shapes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layout::axis_ids;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn segment(id: SegmentId, start: i64, end: i64, created: i64) -> Segment {
        Segment {
            id,
            test_id: 1,
            name: format!("seg {}", id),
            start_time: at(start),
            end_time: at(end),
            created_at: Some(at(created)),
            last_modified_at: None,
        }
    }

    fn subplot(index: usize) -> Subplot {
        let (x_axis, y_axis) = axis_ids(index);
        Subplot {
            sensor_id: index as i64 + 1,
            index,
            x_axis,
            y_axis,
            x_matches: None,
            domain: [0.0, 1.0],
            show_tick_labels: true,
            y_title: String::new(),
        }
    }

    #[test]
    fn test_listing_is_kept_in_creation_order() {
        let manager = SegmentManager::new(vec![segment(2, 0, 10, 200), segment(1, 50, 60, 100)]);
        let ids: Vec<SegmentId> = manager.segments().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_click_toggles_and_switches() {
        let mut manager = SegmentManager::new(vec![segment(1, 0, 10, 1), segment(2, 10, 20, 2)]);
        assert_eq!(manager.click(1).unwrap(), Some(1));
        assert_eq!(manager.click(2).unwrap(), Some(2));
        assert_eq!(manager.click(2).unwrap(), None);
        assert!(matches!(manager.click(9), Err(AnalysisError::UnknownSegment(9))));
    }

    #[test]
    fn test_edited_segment_cannot_be_selected() {
        let mut manager = SegmentManager::new(vec![segment(1, 0, 10, 1)]);
        manager.click(1).unwrap();
        let edit = manager.begin_edit(1).unwrap();
        assert_eq!(edit.draft.name, "seg 1");
        assert_eq!(manager.selected(), None);
        assert!(matches!(manager.click(1), Err(AnalysisError::Conflict(_))));

        manager.cancel_edit();
        assert_eq!(manager.click(1).unwrap(), Some(1));
    }

    #[test]
    fn test_replace_all_drops_state_for_deleted_segments() {
        let mut manager = SegmentManager::new(vec![segment(1, 0, 10, 1), segment(2, 10, 20, 2)]);
        manager.click(1).unwrap();
        manager.begin_edit(2).unwrap();
        manager.replace_all(vec![segment(2, 10, 20, 2)]);
        assert_eq!(manager.selected(), None);
        assert!(manager.is_editing(2));
    }

    #[test]
    fn test_shapes_cover_every_subplot_with_thicker_selected_border() {
        let mut manager = SegmentManager::new(vec![segment(1, 0, 10, 1), segment(2, 10, 20, 2)]);
        manager.click(2).unwrap();
        let shapes = manager.shapes(&[subplot(0), subplot(1), subplot(2)]);
        assert_eq!(shapes.len(), 6);
        assert_eq!(shapes[1].y_ref, "y2 domain");
        assert_eq!(shapes[1].x_ref, "x2");
        assert_eq!(shapes[0].x0_ms, 0);
        assert_eq!(shapes[0].x1_ms, 10_000);
        assert!(shapes.iter().filter(|s| s.segment_id == 1).all(|s| s.line_width == BORDER_WIDTH));
        assert!(shapes.iter().filter(|s| s.segment_id == 2).all(|s| s.line_width == SELECTED_BORDER_WIDTH));
        assert_ne!(shapes[0].fill_color, shapes[3].fill_color);
    }
}
