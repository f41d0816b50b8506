// Selection controller - which sensors are charted and their live traces
use crate::application::trace_builder::ChannelColors;
use crate::domain::SensorId;
use crate::domain::trace::Trace;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectGesture {
    /// Plain click: replaces the selection.
    #[default]
    Single,
    /// Modifier click: toggles one sensor, leaving the rest.
    Multi,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SensorRenderState {
    Idle,
    Loading,
    Rendered,
    Failed { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionChange {
    /// Newly selected sensor that still needs traces.
    pub added: Option<SensorId>,
    pub removed: Vec<SensorId>,
}

/// Palette slots handed out per `(sensor, channel)` the first time the pair is
/// seen. Slots are never reused, so re-adding a sensor restores its colours
/// and leaves everyone else's alone.
#[derive(Debug, Default)]
pub struct ColorRegistry {
    next: usize,
    assigned: HashMap<(SensorId, Option<String>), usize>,
}

impl ColorRegistry {
    pub fn assign(&mut self, sensor_id: SensorId, channels: &[Option<String>]) -> ChannelColors {
        let mut colors = ChannelColors::default();
        for channel in channels {
            let next = &mut self.next;
            let index = *self
                .assigned
                .entry((sensor_id, channel.clone()))
                .or_insert_with(|| {
                    let index = *next;
                    *next += 1;
                    index
                });
            colors.insert(channel.clone(), index);
        }
        colors
    }

    /// Consecutive slots for a sensor that holds none yet, returning the first.
    /// `None` once the sensor has slots; [`ColorRegistry::assign`] then reuses them.
    pub fn reserve(&mut self, sensor_id: SensorId, channels: &[Option<String>]) -> Option<usize> {
        if self.assigned.keys().any(|(owner, _)| *owner == sensor_id) {
            return None;
        }
        let start = self.next;
        for (offset, channel) in channels.iter().enumerate() {
            self.assigned.insert((sensor_id, channel.clone()), start + offset);
        }
        self.next += channels.len();
        Some(start)
    }

    pub fn colors_for(&self, sensor_id: SensorId) -> ChannelColors {
        let mut colors = ChannelColors::default();
        for ((owner, channel), index) in &self.assigned {
            if *owner == sensor_id {
                colors.insert(channel.clone(), *index);
            }
        }
        colors
    }
}

#[derive(Debug, Default)]
pub struct SelectionController {
    /// Selection order; drives subplot order.
    selected: Vec<SensorId>,
    traces: Vec<Trace>,
    rendered: HashSet<SensorId>,
    /// Epoch of the fetch each loading sensor is waiting on.
    pending: HashMap<SensorId, u64>,
    failed: HashMap<SensorId, String>,
    colors: ColorRegistry,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggle(&mut self, sensor_id: SensorId, gesture: SelectGesture) -> SelectionChange {
        let mut change = SelectionChange::default();
        match gesture {
            SelectGesture::Multi => {
                if self.is_selected(sensor_id) {
                    self.deselect(sensor_id);
                    change.removed.push(sensor_id);
                } else {
                    self.selected.push(sensor_id);
                    change.added = Some(sensor_id);
                }
            }
            SelectGesture::Single => {
                if self.selected == [sensor_id] {
                    change.removed = self.selected.clone();
                    self.clear();
                } else {
                    let others: Vec<SensorId> = self
                        .selected
                        .iter()
                        .copied()
                        .filter(|id| *id != sensor_id)
                        .collect();
                    for id in &others {
                        self.deselect(*id);
                    }
                    change.removed = others;
                    if !self.is_selected(sensor_id) {
                        self.selected.push(sensor_id);
                        change.added = Some(sensor_id);
                    }
                }
            }
        }
        if let Some(id) = change.added {
            self.failed.remove(&id);
        }
        change
    }

    pub fn select(&mut self, sensor_id: SensorId) {
        if !self.is_selected(sensor_id) {
            self.selected.push(sensor_id);
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.traces.clear();
        self.rendered.clear();
        self.pending.clear();
        self.failed.clear();
    }

    fn deselect(&mut self, sensor_id: SensorId) {
        self.selected.retain(|id| *id != sensor_id);
        self.remove_traces(sensor_id);
        self.pending.remove(&sensor_id);
        self.failed.remove(&sensor_id);
    }

    pub fn is_selected(&self, sensor_id: SensorId) -> bool {
        self.selected.contains(&sensor_id)
    }

    pub fn selected(&self) -> &[SensorId] {
        &self.selected
    }

    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    /// Drops one sensor's traces without touching the others.
    pub fn remove_traces(&mut self, sensor_id: SensorId) {
        self.traces.retain(|t| t.sensor_id != sensor_id);
        self.rendered.remove(&sensor_id);
    }

    /// Replaces one sensor's traces, keeping the list in selection order.
    /// Returns false (and drops the traces) if the sensor is no longer selected.
    pub fn attach(&mut self, sensor_id: SensorId, traces: Vec<Trace>) -> bool {
        let Some(rank) = self.rank(sensor_id) else {
            return false;
        };
        self.remove_traces(sensor_id);
        let position = self
            .traces
            .iter()
            .position(|t| self.rank(t.sensor_id).is_some_and(|r| r > rank))
            .unwrap_or(self.traces.len());
        let tail = self.traces.split_off(position);
        self.traces.extend(traces);
        self.traces.extend(tail);
        self.rendered.insert(sensor_id);
        self.pending.remove(&sensor_id);
        self.failed.remove(&sensor_id);
        true
    }

    /// Drops every trace ahead of a full rebuild; the selection is kept.
    pub fn reset_traces(&mut self) {
        self.traces.clear();
        self.rendered.clear();
    }

    fn rank(&self, sensor_id: SensorId) -> Option<usize> {
        self.selected.iter().position(|id| *id == sensor_id)
    }

    pub fn mark_loading(&mut self, sensor_id: SensorId, epoch: u64) {
        self.pending.insert(sensor_id, epoch);
        self.failed.remove(&sensor_id);
    }

    pub fn is_loading(&self, sensor_id: SensorId, epoch: u64) -> bool {
        self.pending.get(&sensor_id) == Some(&epoch)
    }

    pub fn is_busy(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn mark_failed(&mut self, sensor_id: SensorId, message: String) {
        self.pending.remove(&sensor_id);
        if self.is_selected(sensor_id) {
            self.failed.insert(sensor_id, message);
        }
    }

    pub fn render_state(&self, sensor_id: SensorId) -> SensorRenderState {
        if let Some(message) = self.failed.get(&sensor_id) {
            SensorRenderState::Failed {
                message: message.clone(),
            }
        } else if self.pending.contains_key(&sensor_id) {
            SensorRenderState::Loading
        } else if self.rendered.contains(&sensor_id) {
            SensorRenderState::Rendered
        } else {
            SensorRenderState::Idle
        }
    }

    pub fn colors(&self) -> &ColorRegistry {
        &self.colors
    }

    pub fn colors_mut(&mut self) -> &mut ColorRegistry {
        &mut self.colors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trace::{LineDash, Statistic, TraceStyle};
    use std::collections::BTreeSet;

    fn trace(sensor_id: SensorId, name: &str) -> Trace {
        Trace {
            sensor_id,
            channel: None,
            statistic: Statistic::Raw,
            name: name.to_string(),
            unit: None,
            points: Vec::new(),
            style: TraceStyle {
                color: "#000000".to_string(),
                width: 1.0,
                dash: LineDash::Solid,
                marker_size: None,
                fill: None,
            },
        }
    }

    fn sensor_ids(traces: &[Trace]) -> Vec<SensorId> {
        traces.iter().map(|t| t.sensor_id).collect()
    }

    #[test]
    fn test_multi_toggle_twice_restores_traces() {
        let mut selection = SelectionController::new();
        selection.toggle(1, SelectGesture::Multi);
        selection.attach(1, vec![trace(1, "a")]);
        let before: BTreeSet<SensorId> = sensor_ids(selection.traces()).into_iter().collect();

        let added = selection.toggle(2, SelectGesture::Multi);
        assert_eq!(added.added, Some(2));
        selection.attach(2, vec![trace(2, "b"), trace(2, "c")]);
        let removed = selection.toggle(2, SelectGesture::Multi);
        assert_eq!(removed.removed, vec![2]);

        let after: BTreeSet<SensorId> = sensor_ids(selection.traces()).into_iter().collect();
        assert_eq!(before, after);
        assert_eq!(selection.selected(), &[1]);
    }

    #[test]
    fn test_single_select_replaces_selection() {
        let mut selection = SelectionController::new();
        selection.toggle(1, SelectGesture::Single);
        selection.attach(1, vec![trace(1, "a")]);
        let change = selection.toggle(2, SelectGesture::Single);
        assert_eq!(change.removed, vec![1]);
        assert_eq!(change.added, Some(2));
        selection.attach(2, vec![trace(2, "b")]);

        assert_eq!(selection.selected(), &[2]);
        assert_eq!(sensor_ids(selection.traces()), vec![2]);
    }

    #[test]
    fn test_single_select_on_sole_selection_clears() {
        let mut selection = SelectionController::new();
        selection.toggle(1, SelectGesture::Single);
        selection.attach(1, vec![trace(1, "a")]);
        let change = selection.toggle(1, SelectGesture::Single);
        assert_eq!(change.removed, vec![1]);
        assert!(selection.selected().is_empty());
        assert!(selection.traces().is_empty());
    }

    #[test]
    fn test_single_select_keeps_already_selected_traces() {
        let mut selection = SelectionController::new();
        selection.toggle(1, SelectGesture::Multi);
        selection.toggle(2, SelectGesture::Multi);
        selection.attach(1, vec![trace(1, "a")]);
        selection.attach(2, vec![trace(2, "b")]);

        let change = selection.toggle(2, SelectGesture::Single);
        assert_eq!(change.added, None);
        assert_eq!(change.removed, vec![1]);
        assert_eq!(sensor_ids(selection.traces()), vec![2]);
    }

    #[test]
    fn test_attach_keeps_selection_order_and_drops_stale() {
        let mut selection = SelectionController::new();
        selection.toggle(1, SelectGesture::Multi);
        selection.toggle(2, SelectGesture::Multi);
        selection.attach(2, vec![trace(2, "b")]);
        selection.attach(1, vec![trace(1, "a")]);
        assert_eq!(sensor_ids(selection.traces()), vec![1, 2]);

        assert!(!selection.attach(9, vec![trace(9, "z")]));
        assert_eq!(sensor_ids(selection.traces()), vec![1, 2]);
    }

    #[test]
    fn test_render_states() {
        let mut selection = SelectionController::new();
        selection.toggle(1, SelectGesture::Multi);
        assert_eq!(selection.render_state(1), SensorRenderState::Idle);
        selection.mark_loading(1, 3);
        assert!(selection.is_loading(1, 3));
        assert!(!selection.is_loading(1, 4));
        assert_eq!(selection.render_state(1), SensorRenderState::Loading);
        selection.mark_failed(1, "boom".to_string());
        assert_eq!(
            selection.render_state(1),
            SensorRenderState::Failed { message: "boom".to_string() }
        );
        assert!(selection.is_selected(1));
        assert!(selection.traces().is_empty());
    }

    #[test]
    fn test_color_registry_is_stable_across_readd() {
        let mut registry = ColorRegistry::default();
        let x = Some("x".to_string());
        let y = Some("y".to_string());
        let first = registry.assign(1, &[x.clone(), y.clone()]);
        let second = registry.assign(2, &[None]);
        let again = registry.assign(1, &[x.clone(), y.clone()]);

        assert_eq!(first.index_for(&x), Some(0));
        assert_eq!(first.index_for(&y), Some(1));
        assert_eq!(second.index_for(&None), Some(2));
        assert_eq!(first, again);
        assert_eq!(registry.colors_for(1), first);
    }

    #[test]
    fn test_reserve_hands_out_one_block_per_sensor() {
        let mut registry = ColorRegistry::default();
        let x = Some("x".to_string());
        let y = Some("y".to_string());
        assert_eq!(registry.reserve(1, &[x.clone(), y.clone()]), Some(0));
        assert_eq!(registry.reserve(2, &[None]), Some(2));
        assert_eq!(registry.reserve(1, &[x.clone()]), None);

        let colors = registry.assign(1, &[x.clone(), y.clone()]);
        assert_eq!(colors, ChannelColors::sequential(&[x, y], 0));
        assert_eq!(registry.assign(3, &[None]).index_for(&None), Some(3));
    }
}
