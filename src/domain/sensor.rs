// Sensor domain model - read-through copy of a test's sensor relation
use super::SensorId;
use serde::{Deserialize, Serialize};

const UNKNOWN_TYPE: &str = "Unknown";
const NO_LOCATION: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    #[serde(alias = "sensor_name")]
    pub name: String,
    #[serde(default, alias = "sensor_type_name")]
    pub type_name: Option<String>,
    #[serde(default, alias = "sensor_type_unit")]
    pub unit: Option<String>,
    #[serde(default, alias = "sensor_location")]
    pub location: Option<String>,
    #[serde(default, alias = "sensor_is_online")]
    pub is_online: bool,
}

impl Sensor {
    pub fn new(id: SensorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            type_name: None,
            unit: None,
            location: None,
            is_online: false,
        }
    }

    pub fn location_label(&self) -> &str {
        match self.location.as_deref() {
            Some(l) if !l.trim().is_empty() => l,
            _ => NO_LOCATION,
        }
    }

    pub fn type_label(&self) -> &str {
        match self.type_name.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => UNKNOWN_TYPE,
        }
    }

    /// Trace label for one channel; `None` is the unlabeled main channel.
    pub fn trace_label(&self, channel: Option<&str>) -> String {
        match channel {
            None => format!("{} ({})", self.name, self.location_label()),
            Some(c) => format!(
                "{} - {} ({})",
                self.name,
                c.to_uppercase(),
                self.location_label()
            ),
        }
    }
}

/// Orders sensors by type name, then by sensor name.
pub fn sort_for_display(sensors: &mut [Sensor]) {
    sensors.sort_by(|a, b| {
        a.type_label()
            .cmp(b.type_label())
            .then_with(|| a.name.cmp(&b.name))
    });
}
