// Domain layer - plain data shared by every analysis component
pub mod export;
pub mod layout;
pub mod measurement;
pub mod palette;
pub mod segment;
pub mod sensor;
pub mod trace;

/// Test relation id; the backend keys measurements by it.
pub type SensorId = i64;
pub type TestId = i64;
pub type SegmentId = i64;
