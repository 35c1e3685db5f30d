use crate::types::{MergedSample, SensorKind, SensorReading};

/// Keeps the latest reading per sensor and pairs every update with the
/// other sensor's last known value.
#[derive(Debug, Clone, Default)]
pub struct SampleAggregator {
    accelerometer: SensorReading,
    gyroscope: SensorReading,
    merged_count: u64,
}

impl SampleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single-sensor update and emit the merged sample immediately.
    pub fn update(&mut self, kind: SensorKind, reading: SensorReading) -> MergedSample {
        match kind {
            SensorKind::Accelerometer => self.accelerometer = reading,
            SensorKind::Gyroscope => self.gyroscope = reading,
        }
        self.merged_count += 1;
        MergedSample::new(self.accelerometer, self.gyroscope)
    }

    pub fn latest(&self, kind: SensorKind) -> SensorReading {
        match kind {
            SensorKind::Accelerometer => self.accelerometer,
            SensorKind::Gyroscope => self.gyroscope,
        }
    }

    pub fn merged_count(&self) -> u64 {
        self.merged_count
    }
}
