// Series cache - fetched measurement arrays keyed by (sensor, mode)
use crate::domain::SensorId;
use crate::domain::measurement::{DataMode, Measurements, TimeBounds};
use std::collections::HashMap;

/// Plain key-value store with no eviction and no notion of staleness.
/// Entries live until invalidated.
#[derive(Debug, Default)]
pub struct SeriesCache {
    entries: HashMap<(SensorId, DataMode), Measurements>,
}

impl SeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sensor_id: SensorId, mode: DataMode) -> Option<&Measurements> {
        self.entries.get(&(sensor_id, mode))
    }

    pub fn contains(&self, sensor_id: SensorId, mode: DataMode) -> bool {
        self.entries.contains_key(&(sensor_id, mode))
    }

    /// Stores `data` under `(sensor_id, data.mode())`, replacing any previous entry.
    pub fn put(&mut self, sensor_id: SensorId, data: Measurements) {
        tracing::debug!(
            "Caching {} {} rows for sensor {}",
            data.len(),
            data.mode().as_str(),
            sensor_id
        );
        self.entries.insert((sensor_id, data.mode()), data);
    }

    pub fn invalidate(&mut self, sensor_id: SensorId, mode: DataMode) -> bool {
        self.entries.remove(&(sensor_id, mode)).is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest and latest timestamp across every cached series.
    pub fn time_bounds(&self) -> Option<TimeBounds> {
        self.entries
            .values()
            .filter_map(Measurements::time_bounds)
            .reduce(TimeBounds::merge)
    }

    /// `(outside, total)` point counts over every cached series.
    pub fn count_outside(&self, bounds: &TimeBounds) -> (usize, usize) {
        self.entries.values().fold((0, 0), |(outside, total), data| {
            (outside + data.count_outside(bounds), total + data.len())
        })
    }
}
