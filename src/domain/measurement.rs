// Measurement domain models - raw readings and fixed-width aggregate buckets
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Channel label the backend stores for single-stream sensors.
pub const MAIN_CHANNEL: &str = "main";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    #[default]
    Aggregated,
    Raw,
}

impl DataMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataMode::Aggregated => "aggregated",
            DataMode::Raw => "raw",
        }
    }
}

/// Selects whether plotted statistics come from signed or absolute values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    #[default]
    Regular,
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRaw {
    #[serde(alias = "measurement_timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "measurement_channel")]
    pub channel: Option<String>,
    #[serde(alias = "measurement_value")]
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementAggregate {
    #[serde(alias = "measurement_timestamp", alias = "bucket", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "measurement_channel")]
    pub channel: Option<String>,
    pub min_value: f64,
    pub max_value: f64,
    pub avg_value: f64,
    pub min_abs_value: f64,
    pub max_abs_value: f64,
    pub avg_abs_value: f64,
}

/// The min/max/avg triple read from one bucket for a given aggregation type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl MeasurementAggregate {
    pub fn statistics(&self, aggregation: AggregationType) -> BucketStats {
        match aggregation {
            AggregationType::Regular => BucketStats {
                min: self.min_value,
                max: self.max_value,
                avg: self.avg_value,
            },
            AggregationType::Absolute => BucketStats {
                min: self.min_abs_value,
                max: self.max_abs_value,
                avg: self.avg_abs_value,
            },
        }
    }
}

/// A fetched measurement array, tagged with the mode it was fetched in.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurements {
    Aggregated(Vec<MeasurementAggregate>),
    Raw(Vec<MeasurementRaw>),
}

impl Measurements {
    pub fn mode(&self) -> DataMode {
        match self {
            Measurements::Aggregated(_) => DataMode::Aggregated,
            Measurements::Raw(_) => DataMode::Raw,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Measurements::Aggregated(rows) => rows.len(),
            Measurements::Raw(rows) => rows.len(),
        }
    }

    pub fn timestamps(&self) -> Box<dyn Iterator<Item = DateTime<Utc>> + '_> {
        match self {
            Measurements::Aggregated(rows) => Box::new(rows.iter().map(|r| r.timestamp)),
            Measurements::Raw(rows) => Box::new(rows.iter().map(|r| r.timestamp)),
        }
    }

    pub fn time_bounds(&self) -> Option<TimeBounds> {
        TimeBounds::from_timestamps(self.timestamps())
    }

    /// Number of rows whose timestamp lies outside the inclusive range.
    pub fn count_outside(&self, bounds: &TimeBounds) -> usize {
        self.timestamps().filter(|t| !bounds.contains(*t)).count()
    }
}

/// Inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBounds {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn from_timestamps<I>(timestamps: I) -> Option<Self>
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        timestamps.into_iter().fold(None, |bounds: Option<TimeBounds>, t| {
            Some(match bounds {
                Some(b) => TimeBounds::new(b.start.min(t), b.end.max(t)),
                None => TimeBounds::new(t, t),
            })
        })
    }

    pub fn merge(self, other: TimeBounds) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }

    pub fn is_ordered(&self) -> bool {
        self.start < self.end
    }
}

/// Folds absent, "main", "null" and empty labels into the unlabeled channel.
pub fn channel_key(channel: Option<&str>) -> Option<&str> {
    match channel {
        Some(c) if !c.is_empty() && c != MAIN_CHANNEL && c != "null" => Some(c),
        _ => None,
    }
}

/// Accepts RFC 3339 timestamps and the offset-less form the backend emits
/// for bucketed rows, which is read as UTC.
pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

pub(crate) fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    let naive = raw.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|t| t.and_utc())
        .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
}
