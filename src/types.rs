use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// The two motion streams the engine listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Linear acceleration
    Accelerometer,
    /// Angular velocity
    Gyroscope,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::Accelerometer, SensorKind::Gyroscope];

    /// Name used by `termux-sensor -s`
    pub fn termux_name(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Gyroscope => "gyroscope",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Accelerometer => write!(f, "Accelerometer"),
            SensorKind::Gyroscope => write!(f, "Gyroscope"),
        }
    }
}

/// One three-axis reading from a single sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SensorReading {
    pub const ZERO: SensorReading = SensorReading {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Two-decimal, one axis per line rendering for display.
    pub fn formatted(&self) -> String {
        format!("x: {:.2}\ny: {:.2}\nz: {:.2}", self.x, self.y, self.z)
    }
}

/// Latest accelerometer and gyroscope values paired together.
///
/// Always carries both sensors, using the last known value for the one
/// that did not tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergedSample {
    pub accelerometer: SensorReading,
    pub gyroscope: SensorReading,
    pub timestamp: f64,
}

impl MergedSample {
    pub fn new(accelerometer: SensorReading, gyroscope: SensorReading) -> Self {
        Self {
            accelerometer,
            gyroscope,
            timestamp: current_timestamp(),
        }
    }
}

/// Result of the one-time availability probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorCapabilities {
    pub accelerometer: bool,
    pub gyroscope: bool,
}

impl SensorCapabilities {
    pub fn new(accelerometer: bool, gyroscope: bool) -> Self {
        Self {
            accelerometer,
            gyroscope,
        }
    }

    pub fn is_available(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Accelerometer => self.accelerometer,
            SensorKind::Gyroscope => self.gyroscope,
        }
    }

    pub fn any(&self) -> bool {
        self.accelerometer || self.gyroscope
    }

    pub fn available_kinds(&self) -> impl Iterator<Item = SensorKind> + '_ {
        SensorKind::ALL
            .into_iter()
            .filter(move |kind| self.is_available(*kind))
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_magnitude() {
        let reading = SensorReading::new(3.0, 4.0, 0.0);
        assert_eq!(reading.magnitude(), 5.0);
    }

    #[test]
    fn test_reading_formatted() {
        let reading = SensorReading::new(-5.365798, 0.076309, 6.320082);
        assert_eq!(reading.formatted(), "x: -5.37\ny: 0.08\nz: 6.32");
    }

    #[test]
    fn test_capabilities() {
        let caps = SensorCapabilities::new(false, true);
        assert!(caps.any());
        assert!(!caps.is_available(SensorKind::Accelerometer));
        let kinds: Vec<_> = caps.available_kinds().collect();
        assert_eq!(kinds, vec![SensorKind::Gyroscope]);

        assert!(!SensorCapabilities::default().any());
    }
}
